//! Owns every `Piece` in a download and answers the scheduler's questions
//! about what remains. The piece count always comes from
//! `metainfo.num_pieces()`, never from `ceil(bitfield_bytes)`.

use crate::bitfield::BitField;
use crate::block::BLOCK_LENGTH;
use crate::metainfo::Metainfo;
use crate::piece::{ApplyOutcome, Piece};
use std::time::{Duration, Instant};

pub const BLOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PieceManager {
    pieces: Vec<Piece>,
    block_length: u32,
    block_timeout: Duration,
}

impl PieceManager {
    pub fn new(metainfo: &Metainfo) -> PieceManager {
        Self::with_config(metainfo, BLOCK_LENGTH, BLOCK_TIMEOUT)
    }

    /// As `new`, but with an overridable block length and stale-block
    /// timeout, used by callers that thread these through from a
    /// configuration source instead of taking the defaults.
    pub fn with_config(metainfo: &Metainfo, block_length: u32, block_timeout: Duration) -> PieceManager {
        let num_pieces = metainfo.num_pieces();
        let pieces = (0..num_pieces)
            .map(|i| Piece::with_block_length(i, metainfo.piece_size(i) as u32, metainfo.pieces()[i], block_length))
            .collect();
        PieceManager {
            pieces,
            block_length,
            block_timeout,
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// Indices not yet fully verified, in ascending order.
    pub fn required_pieces(&self) -> Vec<usize> {
        self.pieces
            .iter()
            .filter(|p| !p.is_complete())
            .map(|p| p.index)
            .collect()
    }

    /// `true` once every piece has been assembled and verified.
    pub fn all_complete(&self) -> bool {
        self.pieces.iter().all(|p| p.is_complete())
    }

    pub fn reserve_block(&mut self, piece_index: usize) -> Option<(u32, u32)> {
        self.pieces.get_mut(piece_index)?.reserve_block()
    }

    pub fn expire_stale(&mut self, now: Instant) {
        for piece in &mut self.pieces {
            piece.expire_stale(self.block_timeout, now);
        }
    }

    /// Applies a delivered block; returns whether the owning piece just
    /// finished and, if so, whether it passed verification.
    pub fn apply_block(&mut self, piece_index: usize, begin: u32, data: Vec<u8>) -> Option<ApplyOutcome> {
        let piece = self.pieces.get_mut(piece_index)?;
        Some(piece.apply_block(begin, data))
    }

    pub fn block_length(&self) -> u32 {
        self.block_length
    }

    pub fn piece_bytes(&self, piece_index: usize) -> Option<Vec<u8>> {
        self.pieces.get(piece_index)?.assembled_bytes()
    }

    /// A bitfield with exactly one bit per piece, never confused with the
    /// number of bytes needed to pack those bits.
    pub fn completed_bitfield(&self) -> BitField {
        let mut bf = BitField::for_pieces(self.pieces.len());
        for piece in &self.pieces {
            if piece.is_complete() {
                bf.set(piece.index);
            }
        }
        bf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::encode;
    use sha1::{Digest, Sha1};
    use std::collections::BTreeMap;

    fn dict(pairs: Vec<(&str, crate::bencode::Value)>) -> crate::bencode::Value {
        let mut d = BTreeMap::new();
        for (k, v) in pairs {
            d.insert(k.as_bytes().to_vec(), v);
        }
        crate::bencode::Value::Dict(d)
    }

    fn string(s: &str) -> crate::bencode::Value {
        crate::bencode::Value::Bytes(s.as_bytes().to_vec())
    }

    fn sample_metainfo() -> Metainfo {
        let hash = Sha1::digest(b"x");
        let pieces = hash.repeat(3);
        let info = dict(vec![
            ("length", crate::bencode::Value::Int(10)),
            ("name", string("f")),
            ("piece length", crate::bencode::Value::Int(4)),
            ("pieces", crate::bencode::Value::Bytes(pieces)),
        ]);
        let top = dict(vec![("announce", string("http://t")), ("info", info)]);
        Metainfo::from_bytes(&encode(&top)).unwrap()
    }

    #[test]
    fn tracks_required_pieces_until_all_verified() {
        let meta = sample_metainfo();
        let manager = PieceManager::new(&meta);
        assert_eq!(manager.num_pieces(), 3);
        assert_eq!(manager.required_pieces(), vec![0, 1, 2]);
        assert!(!manager.all_complete());
    }

    #[test]
    fn completed_bitfield_tracks_piece_count_not_byte_count() {
        let meta = sample_metainfo();
        let manager = PieceManager::new(&meta);
        let bf = manager.completed_bitfield();
        assert_eq!(bf.len(), 3);
    }

    #[test]
    fn reserve_and_apply_block_drains_required_pieces() {
        let meta = sample_metainfo();
        let mut manager = PieceManager::new(&meta);

        for piece_index in 0..3 {
            let expected = meta.pieces()[piece_index];
            let size = meta.piece_size(piece_index) as usize;
            let data = vec![b'x'; size];
            let hash: [u8; 20] = Sha1::digest(&data).into();
            assert_eq!(hash, expected);

            let (offset, length) = manager.reserve_block(piece_index).unwrap();
            assert_eq!(offset, 0);
            let outcome = manager
                .apply_block(piece_index, 0, data[..length as usize].to_vec())
                .unwrap();
            assert_eq!(outcome, ApplyOutcome::Completed { verified: true });
        }

        assert!(manager.all_complete());
        assert!(manager.required_pieces().is_empty());
    }

    #[test]
    fn expire_stale_frees_pending_blocks_after_timeout() {
        let meta = sample_metainfo();
        let mut manager = PieceManager::new(&meta);
        manager.reserve_block(0).unwrap();
        assert!(manager.reserve_block(0).is_none());

        let future = Instant::now() + BLOCK_TIMEOUT + Duration::from_secs(1);
        manager.expire_stale(future);
        assert!(manager.reserve_block(0).is_some());
    }
}
