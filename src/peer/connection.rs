//! Per-peer TCP state, framing, and the CONNECTING → HANDSHAKING → ACTIVE →
//! CLOSED state machine. The coordinator owns one shared `mio::Poll`; a
//! `Connection` owns only its socket and protocol state, so opening many
//! peers concurrently never means one `Poll` per socket.

use crate::bitfield::BitField;
use crate::peer::handshake::{Handshake, HandshakeError, HANDSHAKE_LEN};
use crate::peer::message::{take_frame, FrameError, Message};
use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("bitfield length {actual} does not match the expected ceil(num_pieces/8) = {expected}")]
    BadBitfieldLength { actual: usize, expected: usize },
    #[error("peer closed the connection")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Handshaking,
    Active,
    Closed,
}

pub struct Connection {
    pub addr: SocketAddr,
    pub stream: TcpStream,
    pub state: ConnState,
    info_hash: [u8; 20],
    pub peer_id: Option<[u8; 20]>,
    pub expected_peer_id: Option<[u8; 20]>,
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
    pub bitfield: BitField,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    delivery_queue: VecDeque<(u32, u32, Vec<u8>)>,
    pub last_request: Option<Instant>,
    connect_started: Instant,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("peer_id", &self.peer_id)
            .field("am_choking", &self.am_choking)
            .field("am_interested", &self.am_interested)
            .field("peer_choking", &self.peer_choking)
            .field("peer_interested", &self.peer_interested)
            .finish()
    }
}

impl Connection {
    /// Opens a non-blocking TCP connection to `addr`. The socket isn't
    /// necessarily established yet; the coordinator registers it for
    /// writability and calls `on_connected` once it fires.
    pub fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        num_pieces: usize,
        expected_peer_id: Option<[u8; 20]>,
    ) -> io::Result<Connection> {
        let stream = TcpStream::connect(addr)?;
        Ok(Connection {
            addr,
            stream,
            state: ConnState::Connecting,
            info_hash,
            peer_id: None,
            expected_peer_id,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            bitfield: BitField::for_pieces(num_pieces),
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            delivery_queue: VecDeque::new(),
            last_request: None,
            connect_started: Instant::now(),
        })
    }

    /// Called when the socket first reports writable, signalling the TCP
    /// handshake completed. Queues our protocol handshake and moves to
    /// HANDSHAKING.
    pub fn on_connected(&mut self, my_id: [u8; 20]) {
        if self.state != ConnState::Connecting {
            return;
        }
        self.state = ConnState::Handshaking;
        let handshake = Handshake::new(self.info_hash, my_id);
        self.write_buf.extend_from_slice(&handshake.to_bytes());
    }

    pub fn is_connect_stale(&self, timeout: Duration, now: Instant) -> bool {
        self.state == ConnState::Connecting && now.duration_since(self.connect_started) > timeout
    }

    pub fn queue_message(&mut self, message: &Message) {
        self.write_buf.extend_from_slice(&message.encode());
    }

    /// Drains as much of the write buffer as the socket accepts without
    /// blocking. A zero-byte write closes the connection.
    pub fn flush_write(&mut self) -> Result<(), PeerError> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    self.state = ConnState::Closed;
                    return Err(PeerError::Closed);
                }
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.state = ConnState::Closed;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Reads whatever is available into the read buffer without blocking.
    pub fn read_available(&mut self) -> Result<(), PeerError> {
        let mut buf = [0u8; 16 * 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.state = ConnState::Closed;
                    return Err(PeerError::Closed);
                }
                Ok(n) => self.read_buf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    self.state = ConnState::Closed;
                    return Err(e.into());
                }
            }
        }
    }

    /// Consumes as many complete handshake/frames as are buffered,
    /// applying their effects to this connection's state. On any parse
    /// error the connection moves to CLOSED.
    pub fn process_buffered(&mut self) -> Result<(), PeerError> {
        if self.state == ConnState::Handshaking {
            if self.read_buf.len() < HANDSHAKE_LEN {
                return Ok(());
            }
            let handshake_bytes: Vec<u8> = self.read_buf.drain(..HANDSHAKE_LEN).collect();
            let handshake = Handshake::from_bytes(&handshake_bytes).map_err(|e| {
                self.state = ConnState::Closed;
                e
            })?;
            if let Err(e) = handshake.validate(&self.info_hash, self.expected_peer_id.as_ref()) {
                self.state = ConnState::Closed;
                return Err(e.into());
            }
            self.peer_id = Some(handshake.peer_id);
            self.state = ConnState::Active;
        }

        if self.state != ConnState::Active {
            return Ok(());
        }

        loop {
            let frame = match take_frame(&self.read_buf) {
                Some((payload, consumed)) => {
                    let message = Message::decode_payload(payload).map_err(|e| {
                        self.state = ConnState::Closed;
                        e
                    })?;
                    self.read_buf.drain(..consumed);
                    message
                }
                None => break,
            };
            self.apply_message(frame)?;
        }
        Ok(())
    }

    fn apply_message(&mut self, message: Message) -> Result<(), PeerError> {
        match message {
            Message::KeepAlive => {}
            Message::Choke => self.peer_choking = true,
            Message::Unchoke => self.peer_choking = false,
            Message::Interested => self.peer_interested = true,
            Message::NotInterested => self.peer_interested = false,
            Message::Have(index) => {
                if (index as usize) < self.bitfield.len() {
                    self.bitfield.set(index as usize);
                }
            }
            Message::Bitfield(bits) => {
                let expected = BitField::expected_byte_len(self.bitfield.len());
                if bits.len() != expected {
                    self.state = ConnState::Closed;
                    return Err(PeerError::BadBitfieldLength {
                        actual: bits.len(),
                        expected,
                    });
                }
                self.bitfield = BitField::from_payload(bits, self.bitfield.len());
                self.am_interested = true;
                self.queue_message(&Message::Interested);
            }
            Message::Request(..) => {
                // Upload is out of scope: recorded, not served.
            }
            Message::Piece(index, begin, block) => {
                self.delivery_queue.push_back((index, begin, block));
            }
            Message::Cancel(..) | Message::Port(_) => {}
        }
        Ok(())
    }

    pub fn drain_deliveries(&mut self) -> Vec<(u32, u32, Vec<u8>)> {
        self.delivery_queue.drain(..).collect()
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Eligible for a new request: ACTIVE, we're
    /// interested and not choked, and the per-peer cooldown has elapsed.
    pub fn is_eligible(&self, cooldown: Duration, now: Instant) -> bool {
        self.state == ConnState::Active
            && self.am_interested
            && !self.peer_choking
            && self
                .last_request
                .map(|t| now.duration_since(t) >= cooldown)
                .unwrap_or(true)
    }

    pub fn note_request_sent(&mut self, now: Instant) {
        self.last_request = Some(now);
    }

    pub fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.state = ConnState::Closed;
    }
}
