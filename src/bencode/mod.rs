//! Strict bencode codec: ints, byte-strings, lists, dicts with keys in
//! lexicographic byte order. Values are a generic tree; callers project it
//! into a typed shape (see `crate::metainfo`).

mod decoder;
mod encoder;

use std::collections::BTreeMap;
use thiserror::Error;

pub use decoder::{decode, decode_with_span};
pub use encoder::encode;

/// A decoded bencode value. Byte-strings are the value domain, not UTF-8;
/// torrent metadata routinely carries non-UTF8 bytes in `pieces`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(i64),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?.get(key.as_bytes())
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(Value::as_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("bad token at offset {0}")]
    BadToken(usize),
    #[error("dictionary keys not strictly increasing at offset {0}")]
    BadKeyOrder(usize),
    #[error("invalid integer literal at offset {0}")]
    BadInteger(usize),
    #[error("trailing input after the top-level value")]
    TrailingInput,
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;
