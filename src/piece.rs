//! Owns a piece's block list, expected hash, and completion state.
//! Completion requires *every* block complete, not just the first, and the
//! piece count is never confused with bitfield byte counts.

use crate::block::{Block, BlockState, BLOCK_LENGTH};
use sha1::{Digest, Sha1};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The block was recorded; the piece is not yet fully assembled.
    Pending,
    /// Every block was present; the piece hash was checked.
    Completed { verified: bool },
}

#[derive(Debug)]
pub struct Piece {
    pub index: usize,
    pub size: u32,
    expected_hash: [u8; 20],
    blocks: Vec<Block>,
    complete: bool,
}

impl Piece {
    pub fn new(index: usize, size: u32, expected_hash: [u8; 20]) -> Piece {
        Self::with_block_length(index, size, expected_hash, BLOCK_LENGTH)
    }

    /// As `new`, but with an overridable block length, used by tests that
    /// exercise multi-block tiling on pieces far smaller than 2^14 bytes.
    pub fn with_block_length(
        index: usize,
        size: u32,
        expected_hash: [u8; 20],
        block_length: u32,
    ) -> Piece {
        let full_blocks = size / block_length;
        let remainder = size % block_length;
        let mut blocks: Vec<Block> = (0..full_blocks).map(|_| Block::new(block_length)).collect();
        if remainder > 0 {
            blocks.push(Block::new(remainder));
        }
        Piece {
            index,
            size,
            expected_hash,
            blocks,
            complete: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The assembled piece bytes, once verified. Blocks keep their data
    /// after a successful verification (only a failed verification clears
    /// it), so this can be called any time after completion.
    pub fn assembled_bytes(&self) -> Option<Vec<u8>> {
        if !self.complete {
            return None;
        }
        let mut raw = Vec::with_capacity(self.size as usize);
        for block in &self.blocks {
            raw.extend_from_slice(&block.data);
        }
        Some(raw)
    }

    pub fn block_length(&self) -> u32 {
        self.blocks.first().map(|b| b.length).unwrap_or(BLOCK_LENGTH)
    }

    /// Promotes the first FREE block to PENDING and returns its (offset,
    /// length), or `None` if every block is PENDING or COMPLETE.
    pub fn reserve_block(&mut self) -> Option<(u32, u32)> {
        if self.complete {
            return None;
        }
        let block_length = self.block_length();
        for (i, block) in self.blocks.iter_mut().enumerate() {
            if block.state == BlockState::Free {
                block.reserve();
                return Some((i as u32 * block_length, block.length));
            }
        }
        None
    }

    /// Reverts any PENDING block older than `timeout` back to FREE.
    pub fn expire_stale(&mut self, timeout: Duration, now: Instant) {
        for block in &mut self.blocks {
            if block.is_stale(timeout, now) {
                block.reset();
            }
        }
    }

    /// Records a delivered block payload. Delivering the same `(begin,
    /// data)` twice is a no-op the second time.
    pub fn apply_block(&mut self, begin: u32, data: Vec<u8>) -> ApplyOutcome {
        if self.complete {
            return ApplyOutcome::Completed { verified: true };
        }
        let block_length = self.block_length();
        let idx = (begin / block_length) as usize;
        if let Some(block) = self.blocks.get_mut(idx) {
            if block.state != BlockState::Complete {
                block.complete(data);
            }
        }

        if !self.blocks.iter().all(|b| b.state == BlockState::Complete) {
            return ApplyOutcome::Pending;
        }

        let mut raw = Vec::with_capacity(self.size as usize);
        for block in &self.blocks {
            raw.extend_from_slice(&block.data);
        }
        let hash: [u8; 20] = Sha1::digest(&raw).into();
        if hash == self.expected_hash {
            self.complete = true;
            ApplyOutcome::Completed { verified: true }
        } else {
            for block in &mut self.blocks {
                block.reset();
            }
            ApplyOutcome::Completed { verified: false }
        }
    }
}
