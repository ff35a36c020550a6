use super::{BencodeError, BencodeResult, Value};
use std::collections::BTreeMap;

/// Decodes a single top-level bencode value from `bytes`, rejecting any
/// trailing bytes after it.
pub fn decode(bytes: &[u8]) -> BencodeResult<Value> {
    let (value, end) = decode_value(bytes, 0)?;
    if end != bytes.len() {
        return Err(BencodeError::TrailingInput);
    }
    Ok(value)
}

/// Decodes a top-level dictionary and also returns the exact byte range of
/// the value bound to `key`, if present. Used to hash the `info` dict
/// byte-for-byte instead of re-encoding the decoded tree.
pub fn decode_with_span(
    bytes: &[u8],
    key: &[u8],
) -> BencodeResult<(Value, Option<std::ops::Range<usize>>)> {
    let start = 0;
    let first = *bytes.first().ok_or(BencodeError::UnexpectedEof)?;
    if first != b'd' {
        let (value, end) = decode_value(bytes, start)?;
        if end != bytes.len() {
            return Err(BencodeError::TrailingInput);
        }
        return Ok((value, None));
    }

    let mut pos = start + 1;
    let mut dict = BTreeMap::new();
    let mut span = None;
    let mut last_key: Option<Vec<u8>> = None;

    loop {
        let b = *bytes.get(pos).ok_or(BencodeError::UnexpectedEof)?;
        if b == b'e' {
            pos += 1;
            break;
        }
        let (k, after_key) = decode_string(bytes, pos)?;
        if let Some(prev) = &last_key {
            if k.as_slice() <= prev.as_slice() {
                return Err(BencodeError::BadKeyOrder(pos));
            }
        }
        let value_start = after_key;
        let (v, value_end) = decode_value(bytes, value_start)?;
        if k == key {
            span = Some(value_start..value_end);
        }
        last_key = Some(k.clone());
        dict.insert(k, v);
        pos = value_end;
    }

    if pos != bytes.len() {
        return Err(BencodeError::TrailingInput);
    }

    Ok((Value::Dict(dict), span))
}

fn decode_value(bytes: &[u8], pos: usize) -> BencodeResult<(Value, usize)> {
    let b = *bytes.get(pos).ok_or(BencodeError::UnexpectedEof)?;
    match b {
        b'0'..=b'9' => {
            let (s, end) = decode_string(bytes, pos)?;
            Ok((Value::Bytes(s), end))
        }
        b'i' => decode_integer(bytes, pos),
        b'l' => decode_list(bytes, pos),
        b'd' => decode_dict(bytes, pos),
        _ => Err(BencodeError::BadToken(pos)),
    }
}

fn decode_string(bytes: &[u8], pos: usize) -> BencodeResult<(Vec<u8>, usize)> {
    let colon = find(bytes, pos, b':')?;
    let len_str = std::str::from_utf8(&bytes[pos..colon]).map_err(|_| BencodeError::BadToken(pos))?;
    if len_str.is_empty() || (len_str.len() > 1 && len_str.starts_with('0')) {
        return Err(BencodeError::BadToken(pos));
    }
    let len: usize = len_str.parse().map_err(|_| BencodeError::BadToken(pos))?;
    let start = colon + 1;
    let end = start
        .checked_add(len)
        .ok_or(BencodeError::UnexpectedEof)?;
    if end > bytes.len() {
        return Err(BencodeError::UnexpectedEof);
    }
    Ok((bytes[start..end].to_vec(), end))
}

fn decode_integer(bytes: &[u8], pos: usize) -> BencodeResult<(Value, usize)> {
    debug_assert_eq!(bytes[pos], b'i');
    let e = find(bytes, pos + 1, b'e')?;
    let num_str =
        std::str::from_utf8(&bytes[pos + 1..e]).map_err(|_| BencodeError::BadInteger(pos))?;
    if num_str.is_empty() {
        return Err(BencodeError::BadInteger(pos));
    }
    if num_str == "-0" {
        return Err(BencodeError::BadInteger(pos));
    }
    let digits = num_str.strip_prefix('-').unwrap_or(num_str);
    if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_digit()) {
        return Err(BencodeError::BadInteger(pos));
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(BencodeError::BadInteger(pos));
    }
    let n: i64 = num_str.parse().map_err(|_| BencodeError::BadInteger(pos))?;
    Ok((Value::Int(n), e + 1))
}

fn decode_list(bytes: &[u8], pos: usize) -> BencodeResult<(Value, usize)> {
    debug_assert_eq!(bytes[pos], b'l');
    let mut items = Vec::new();
    let mut cur = pos + 1;
    loop {
        let b = *bytes.get(cur).ok_or(BencodeError::UnexpectedEof)?;
        if b == b'e' {
            cur += 1;
            break;
        }
        let (v, end) = decode_value(bytes, cur)?;
        items.push(v);
        cur = end;
    }
    Ok((Value::List(items), cur))
}

fn decode_dict(bytes: &[u8], pos: usize) -> BencodeResult<(Value, usize)> {
    debug_assert_eq!(bytes[pos], b'd');
    let mut dict = BTreeMap::new();
    let mut cur = pos + 1;
    let mut last_key: Option<Vec<u8>> = None;
    loop {
        let b = *bytes.get(cur).ok_or(BencodeError::UnexpectedEof)?;
        if b == b'e' {
            cur += 1;
            break;
        }
        let (k, after_key) = decode_string(bytes, cur)?;
        if let Some(prev) = &last_key {
            if k.as_slice() <= prev.as_slice() {
                return Err(BencodeError::BadKeyOrder(cur));
            }
        }
        let (v, value_end) = decode_value(bytes, after_key)?;
        last_key = Some(k.clone());
        dict.insert(k, v);
        cur = value_end;
    }
    Ok((Value::Dict(dict), cur))
}

fn find(bytes: &[u8], from: usize, needle: u8) -> BencodeResult<usize> {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
        .ok_or(BencodeError::UnexpectedEof)
}
