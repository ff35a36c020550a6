//! Wire message encode/decode. Frames are `<length:u32 BE><payload>`;
//! `length == 0` is a keep-alive. The length prefix is a full `u32`, not a
//! single byte: a `u8` would silently truncate any bitfield or block
//! payload past 255 bytes, and both routinely exceed that.

use thiserror::Error;

#[derive(Debug, PartialEq, Clone)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request(u32, u32, u32),
    Piece(u32, u32, Vec<u8>),
    Cancel(u32, u32, u32),
    Port(u16),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("message too short to be valid")]
    TooShort,
    #[error("have message must carry exactly 4 bytes, got {0}")]
    BadHaveLength(usize),
    #[error("request/cancel message must carry exactly 12 bytes, got {0}")]
    BadRequestLength(usize),
    #[error("port message must carry exactly 2 bytes, got {0}")]
    BadPortLength(usize),
    #[error("unknown message id {0}")]
    UnknownId(u8),
}

impl Message {
    pub fn id(&self) -> u8 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke => 0,
            Message::Unchoke => 1,
            Message::Interested => 2,
            Message::NotInterested => 3,
            Message::Have(_) => 4,
            Message::Bitfield(_) => 5,
            Message::Request(_, _, _) => 6,
            Message::Piece(_, _, _) => 7,
            Message::Cancel(_, _, _) => 8,
            Message::Port(_) => 9,
        }
    }

    /// Payload length, i.e. the frame's 4-byte length prefix: 1 (id byte)
    /// plus however many body bytes this variant carries.
    pub fn payload_len(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 1,
            Message::Have(_) => 5,
            Message::Bitfield(bits) => 1 + bits.len() as u32,
            Message::Request(..) => 13,
            Message::Piece(_, _, block) => 9 + block.len() as u32,
            Message::Cancel(..) => 13,
            Message::Port(_) => 3,
        }
    }

    /// Encodes a full frame: length prefix followed by payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(4 + self.payload_len() as usize);
        frame.extend_from_slice(&self.payload_len().to_be_bytes());
        match self {
            Message::KeepAlive => {}
            Message::Choke => frame.push(0),
            Message::Unchoke => frame.push(1),
            Message::Interested => frame.push(2),
            Message::NotInterested => frame.push(3),
            Message::Have(index) => {
                frame.push(4);
                frame.extend_from_slice(&index.to_be_bytes());
            }
            Message::Bitfield(bits) => {
                frame.push(5);
                frame.extend_from_slice(bits);
            }
            Message::Request(index, begin, length) => {
                frame.push(6);
                frame.extend_from_slice(&index.to_be_bytes());
                frame.extend_from_slice(&begin.to_be_bytes());
                frame.extend_from_slice(&length.to_be_bytes());
            }
            Message::Piece(index, begin, block) => {
                frame.push(7);
                frame.extend_from_slice(&index.to_be_bytes());
                frame.extend_from_slice(&begin.to_be_bytes());
                frame.extend_from_slice(block);
            }
            Message::Cancel(index, begin, length) => {
                frame.push(8);
                frame.extend_from_slice(&index.to_be_bytes());
                frame.extend_from_slice(&begin.to_be_bytes());
                frame.extend_from_slice(&length.to_be_bytes());
            }
            Message::Port(port) => {
                frame.push(9);
                frame.extend_from_slice(&port.to_be_bytes());
            }
        }
        frame
    }

    /// Decodes a single message from its payload (the bytes after the
    /// 4-byte length prefix). `payload.is_empty()` is the keep-alive.
    pub fn decode_payload(payload: &[u8]) -> Result<Message, FrameError> {
        if payload.is_empty() {
            return Ok(Message::KeepAlive);
        }
        let id = payload[0];
        let body = &payload[1..];
        let msg = match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => {
                if body.len() != 4 {
                    return Err(FrameError::BadHaveLength(body.len()));
                }
                Message::Have(u32::from_be_bytes(body.try_into().unwrap()))
            }
            5 => Message::Bitfield(body.to_vec()),
            6 => {
                let (index, begin, length) = read_three_u32(body)?;
                Message::Request(index, begin, length)
            }
            7 => {
                if body.len() < 8 {
                    return Err(FrameError::TooShort);
                }
                let index = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let begin = u32::from_be_bytes(body[4..8].try_into().unwrap());
                Message::Piece(index, begin, body[8..].to_vec())
            }
            8 => {
                let (index, begin, length) = read_three_u32(body)?;
                Message::Cancel(index, begin, length)
            }
            9 => {
                if body.len() != 2 {
                    return Err(FrameError::BadPortLength(body.len()));
                }
                Message::Port(u16::from_be_bytes(body.try_into().unwrap()))
            }
            other => return Err(FrameError::UnknownId(other)),
        };
        Ok(msg)
    }
}

fn read_three_u32(body: &[u8]) -> Result<(u32, u32, u32), FrameError> {
    if body.len() != 12 {
        return Err(FrameError::BadRequestLength(body.len()));
    }
    let index = u32::from_be_bytes(body[0..4].try_into().unwrap());
    let begin = u32::from_be_bytes(body[4..8].try_into().unwrap());
    let length = u32::from_be_bytes(body[8..12].try_into().unwrap());
    Ok((index, begin, length))
}

/// Peeks the length prefix, if a full frame is buffered, and returns the
/// frame's payload plus the number of bytes to drain from the front of
/// `buffer`. Partial frames yield `None`.
pub fn take_frame(buffer: &[u8]) -> Option<(&[u8], usize)> {
    if buffer.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes(buffer[0..4].try_into().unwrap()) as usize;
    if buffer.len() < 4 + len {
        return None;
    }
    Some((&buffer[4..4 + len], 4 + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trips(msg: Message) {
        let encoded = msg.encode();
        let (payload, consumed) = take_frame(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(Message::decode_payload(payload).unwrap(), msg);
    }

    /// Every message kind survives an encode/decode round trip.
    #[test]
    fn round_trips_every_message_kind() {
        round_trips(Message::KeepAlive);
        round_trips(Message::Choke);
        round_trips(Message::Unchoke);
        round_trips(Message::Interested);
        round_trips(Message::NotInterested);
        round_trips(Message::Have(42));
        round_trips(Message::Bitfield(vec![0b1010_0000; 40]));
        round_trips(Message::Request(1, 2, 3));
        round_trips(Message::Piece(1, 2, vec![7; 1 << 14]));
        round_trips(Message::Cancel(1, 2, 3));
        round_trips(Message::Port(6881));
    }

    #[test]
    fn large_bitfield_length_prefix_does_not_truncate() {
        let bits = vec![0xFFu8; 300];
        let msg = Message::Bitfield(bits.clone());
        let encoded = msg.encode();
        let len = u32::from_be_bytes(encoded[0..4].try_into().unwrap());
        assert_eq!(len as usize, 1 + bits.len());
        round_trips(msg);
    }

    /// A single complete frame dispatches to exactly one message.
    #[test]
    fn single_frame_dispatches_once() {
        let bytes = [0, 0, 0, 1, 1];
        let (payload, consumed) = take_frame(&bytes).unwrap();
        assert_eq!(consumed, 5);
        assert_eq!(Message::decode_payload(payload).unwrap(), Message::Unchoke);
    }

    /// A partial frame yields nothing until the remaining bytes arrive.
    #[test]
    fn partial_frame_waits_for_remaining_bytes() {
        let mut buffer = vec![0, 0, 0, 5, 4, 0, 0, 0];
        assert!(take_frame(&buffer).is_none());
        buffer.push(42);
        let (payload, consumed) = take_frame(&buffer).unwrap();
        assert_eq!(consumed, buffer.len());
        assert_eq!(Message::decode_payload(payload).unwrap(), Message::Have(42));
    }

    #[test]
    fn zero_length_frame_is_keep_alive() {
        let bytes = [0, 0, 0, 0];
        let (payload, consumed) = take_frame(&bytes).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(Message::decode_payload(payload).unwrap(), Message::KeepAlive);
    }

    #[test]
    fn rejects_unknown_message_id() {
        assert_eq!(
            Message::decode_payload(&[200]),
            Err(FrameError::UnknownId(200))
        );
    }
}
