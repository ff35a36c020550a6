//! Smallest transfer unit within a piece: fixed default length, a
//! three-way status, and a `last_ping` timestamp set when a block moves to
//! PENDING.

use std::time::Instant;

pub const BLOCK_LENGTH: u32 = 1 << 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Pending,
    Complete,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub length: u32,
    pub state: BlockState,
    pub data: Vec<u8>,
    pub last_ping: Option<Instant>,
}

impl Block {
    pub fn new(length: u32) -> Block {
        Block {
            length,
            state: BlockState::Free,
            data: Vec::new(),
            last_ping: None,
        }
    }

    pub fn reserve(&mut self) {
        self.state = BlockState::Pending;
        self.last_ping = Some(Instant::now());
    }

    pub fn complete(&mut self, data: Vec<u8>) {
        self.state = BlockState::Complete;
        self.data = data;
    }

    pub fn reset(&mut self) {
        self.state = BlockState::Free;
        self.data.clear();
        self.last_ping = None;
    }

    pub fn is_stale(&self, timeout: std::time::Duration, now: Instant) -> bool {
        self.state == BlockState::Pending
            && self
                .last_ping
                .map(|t| now.duration_since(t) > timeout)
                .unwrap_or(false)
    }
}
