//! Decoded, validated, immutable description of a `.torrent` file
//! file set, piece hashes, trackers, and the info-hash.

use crate::bencode::{self, BencodeError, Value};
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),
    #[error("missing or malformed field: {0}")]
    MissingField(&'static str),
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
    #[error("pieces length {0} is not a multiple of 20")]
    BadPiecesLength(usize),
    #[error("piece count {actual} does not match ceil(total_length / piece_length) = {expected}")]
    PieceCountMismatch { actual: usize, expected: usize },
}

pub type MetainfoResult<T> = std::result::Result<T, MetainfoError>;

/// One entry of the file list. For single-file torrents this is synthesized
/// as a single entry with `path = [name]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub path: Vec<String>,
    pub length: u64,
}

#[derive(Debug, Clone)]
pub struct Metainfo {
    name: String,
    piece_length: u64,
    pieces: Vec<[u8; 20]>,
    files: Vec<File>,
    total_length: u64,
    trackers: HashSet<String>,
    info_hash: [u8; 20],
}

impl Metainfo {
    pub fn from_bytes(bytes: &[u8]) -> MetainfoResult<Metainfo> {
        let (top, info_span) = bencode::decode_with_span(bytes, b"info")?;
        let info_span = info_span.ok_or(MetainfoError::MissingField("info"))?;
        let info_hash: [u8; 20] = Sha1::digest(&bytes[info_span]).into();

        let info = top.get("info").ok_or(MetainfoError::MissingField("info"))?;

        let name = info
            .get_str("name")
            .ok_or(MetainfoError::MissingField("info.name"))?;

        let piece_length = info
            .get("piece length")
            .and_then(Value::as_int)
            .filter(|n| *n > 0)
            .ok_or(MetainfoError::InvalidField("info.piece length"))?;
        let piece_length = piece_length as u64;

        let raw_pieces = info
            .get("pieces")
            .and_then(Value::as_bytes)
            .ok_or(MetainfoError::MissingField("info.pieces"))?;
        if raw_pieces.len() % 20 != 0 {
            return Err(MetainfoError::BadPiecesLength(raw_pieces.len()));
        }
        let pieces: Vec<[u8; 20]> = raw_pieces
            .chunks_exact(20)
            .map(|c| c.try_into().expect("chunks_exact(20) yields 20 bytes"))
            .collect();

        let files = parse_files(info, &name)?;
        let total_length: u64 = files.iter().map(|f| f.length).sum();

        let expected_pieces = ceil_div(total_length, piece_length);
        if pieces.len() != expected_pieces {
            return Err(MetainfoError::PieceCountMismatch {
                actual: pieces.len(),
                expected: expected_pieces,
            });
        }

        let trackers = parse_trackers(&top);

        Ok(Metainfo {
            name,
            piece_length,
            pieces,
            files,
            total_length,
            trackers,
            info_hash,
        })
    }

    pub fn from_file(path: &str) -> MetainfoResult<Metainfo> {
        let bytes = std::fs::read(path).map_err(|_| MetainfoError::MissingField("file"))?;
        Self::from_bytes(&bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn pieces(&self) -> &[[u8; 20]] {
        &self.pieces
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn trackers(&self) -> &HashSet<String> {
        &self.trackers
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    pub fn num_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// Length of `index`, accounting for the possibly-short last piece.
    pub fn piece_size(&self, index: usize) -> u64 {
        if index + 1 == self.pieces.len() {
            self.total_length - (self.pieces.len() as u64 - 1) * self.piece_length
        } else {
            self.piece_length
        }
    }
}

fn parse_files(info: &Value, name: &str) -> MetainfoResult<Vec<File>> {
    if let Some(length) = info.get("length").and_then(Value::as_int) {
        if length < 0 {
            return Err(MetainfoError::InvalidField("info.length"));
        }
        return Ok(vec![File {
            path: vec![name.to_string()],
            length: length as u64,
        }]);
    }

    let entries = info
        .get("files")
        .and_then(Value::as_list)
        .ok_or(MetainfoError::MissingField("info.length or info.files"))?;

    let mut files = Vec::with_capacity(entries.len());
    for entry in entries {
        let length = entry
            .get("length")
            .and_then(Value::as_int)
            .filter(|n| *n >= 0)
            .ok_or(MetainfoError::InvalidField("files[].length"))?;
        let path_list = entry
            .get("path")
            .and_then(Value::as_list)
            .ok_or(MetainfoError::MissingField("files[].path"))?;
        let path = path_list
            .iter()
            .map(|v| {
                v.as_bytes()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .ok_or(MetainfoError::InvalidField("files[].path[]"))
            })
            .collect::<MetainfoResult<Vec<String>>>()?;
        if path.is_empty() {
            return Err(MetainfoError::InvalidField("files[].path"));
        }
        files.push(File {
            path,
            length: length as u64,
        });
    }
    if files.is_empty() {
        return Err(MetainfoError::InvalidField("info.files"));
    }
    Ok(files)
}

fn parse_trackers(top: &Value) -> HashSet<String> {
    let mut trackers = HashSet::new();
    if let Some(announce) = top.get_str("announce") {
        trackers.insert(announce);
    }
    if let Some(list) = top.get("announce-list").and_then(Value::as_list) {
        for tier in list {
            if let Some(urls) = tier.as_list() {
                for url in urls {
                    if let Some(b) = url.as_bytes() {
                        trackers.insert(String::from_utf8_lossy(b).into_owned());
                    }
                }
            }
        }
    }
    trackers
}

fn ceil_div(a: u64, b: u64) -> usize {
    (((a + b - 1) / b)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::encode;
    use std::collections::BTreeMap;

    fn dict(pairs: Vec<(&str, Value)>) -> Value {
        let mut d = BTreeMap::new();
        for (k, v) in pairs {
            d.insert(k.as_bytes().to_vec(), v);
        }
        Value::Dict(d)
    }

    fn string(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    /// Single-file metainfo, built with the `info` dict properly nested.
    #[test]
    fn single_file_metainfo() {
        let hash = Sha1::digest(b"hell");
        let pieces = hash.repeat(3);
        let info = dict(vec![
            ("length", Value::Int(12)),
            ("name", string("hello")),
            ("piece length", Value::Int(4)),
            ("pieces", Value::Bytes(pieces)),
        ]);
        let top = dict(vec![("announce", string("udp://x:80")), ("info", info)]);
        let bytes = encode(&top);

        let meta = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(
            meta.files(),
            &[File {
                path: vec!["hello".to_string()],
                length: 12
            }]
        );
        assert_eq!(meta.piece_length(), 4);
        assert_eq!(meta.num_pieces(), 3);
        assert_eq!(meta.total_length(), 12);
        assert_eq!(
            meta.trackers(),
            &["udp://x:80".to_string()].into_iter().collect()
        );
    }

    /// Multi-file metainfo preserves path order across entries.
    #[test]
    fn multi_file_metainfo_preserves_path_order() {
        let hash = Sha1::digest(b"x");
        let pieces = hash.repeat(3);
        let file_a = dict(vec![
            ("length", Value::Int(5)),
            ("path", Value::List(vec![string("a")])),
        ]);
        let file_b = dict(vec![
            ("length", Value::Int(7)),
            ("path", Value::List(vec![string("b"), string("c")])),
        ]);
        let info = dict(vec![
            ("name", string("multi")),
            ("piece length", Value::Int(4)),
            ("pieces", Value::Bytes(pieces)),
            ("files", Value::List(vec![file_a, file_b])),
        ]);
        let top = dict(vec![("announce", string("http://t")), ("info", info)]);
        let bytes = encode(&top);

        let meta = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(meta.total_length(), 12);
        assert_eq!(meta.num_pieces(), 3);
        assert_eq!(
            meta.files(),
            &[
                File {
                    path: vec!["a".to_string()],
                    length: 5
                },
                File {
                    path: vec!["b".to_string(), "c".to_string()],
                    length: 7
                }
            ]
        );
    }

    /// Info-hash stability across repeated loads.
    #[test]
    fn info_hash_is_stable_across_loads() {
        let info = dict(vec![
            ("length", Value::Int(1)),
            ("name", string("f")),
            ("piece length", Value::Int(1)),
            ("pieces", Value::Bytes(Sha1::digest(b"x").to_vec())),
        ]);
        let top = dict(vec![("info", info)]);
        let bytes = encode(&top);

        let a = Metainfo::from_bytes(&bytes).unwrap();
        let b = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(a.info_hash(), b.info_hash());
    }

    /// Sum of file lengths equals total_length.
    #[test]
    fn total_length_identity() {
        let hash = Sha1::digest(b"x").repeat(2);
        let info = dict(vec![
            ("name", string("multi")),
            ("piece length", Value::Int(4)),
            ("pieces", Value::Bytes(hash)),
            (
                "files",
                Value::List(vec![
                    dict(vec![("length", Value::Int(3)), ("path", Value::List(vec![string("a")]))]),
                    dict(vec![("length", Value::Int(5)), ("path", Value::List(vec![string("b")]))]),
                ]),
            ),
        ]);
        let top = dict(vec![("info", info)]);
        let bytes = encode(&top);

        let meta = Metainfo::from_bytes(&bytes).unwrap();
        let sum: u64 = meta.files().iter().map(|f| f.length).sum();
        assert_eq!(sum, meta.total_length());
    }

    #[test]
    fn rejects_piece_count_mismatch() {
        let info = dict(vec![
            ("length", Value::Int(100)),
            ("name", string("f")),
            ("piece length", Value::Int(4)),
            ("pieces", Value::Bytes(Sha1::digest(b"x").to_vec())),
        ]);
        let top = dict(vec![("info", info)]);
        let bytes = encode(&top);

        assert!(matches!(
            Metainfo::from_bytes(&bytes),
            Err(MetainfoError::PieceCountMismatch { .. })
        ));
    }

    #[test]
    fn rejects_missing_info() {
        let top = dict(vec![("announce", string("http://t"))]);
        let bytes = encode(&top);
        assert!(matches!(
            Metainfo::from_bytes(&bytes),
            Err(MetainfoError::MissingField("info"))
        ));
    }
}
