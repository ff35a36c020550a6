//! Owns the peer set and the piece manager; drives the readiness-poll loop
//! and the block-scheduling tick.

use crate::block::BLOCK_LENGTH;
use crate::error::{CoreError, CoreResult};
use crate::metainfo::Metainfo;
use crate::peer::connection::{ConnState, Connection, PeerError};
use crate::peer::message::Message;
use crate::picker::{self, REQUEST_COOLDOWN};
use crate::piece::ApplyOutcome;
use crate::piece_manager::{PieceManager, BLOCK_TIMEOUT};
use crate::storage::PieceSink;
use crate::tracker::http::{self, AnnounceParams, TrackerPeer};
use crate::utils::generate_peer_id;
use mio::{Events, Interest, Poll, Token};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub port: u16,
    pub max_concurrent_peers: usize,
    pub max_accumulated_peers: usize,
    pub connect_timeout: Duration,
    pub poll_timeout: Duration,
    pub block_length: u32,
    pub block_timeout: Duration,
    pub request_cooldown: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> CoordinatorConfig {
        CoordinatorConfig {
            port: 6881,
            max_concurrent_peers: 5,
            max_accumulated_peers: 50,
            connect_timeout: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(1),
            block_length: BLOCK_LENGTH,
            block_timeout: BLOCK_TIMEOUT,
            request_cooldown: REQUEST_COOLDOWN,
        }
    }
}

pub struct Coordinator<S: PieceSink> {
    poll: Poll,
    peers: HashMap<Token, Connection>,
    next_token: usize,
    pending: VecDeque<TrackerPeer>,
    piece_manager: PieceManager,
    metainfo: Metainfo,
    peer_id: [u8; 20],
    config: CoordinatorConfig,
    sink: S,
}

impl<S: PieceSink> Coordinator<S> {
    pub fn new(metainfo: Metainfo, config: CoordinatorConfig, sink: S) -> CoreResult<Coordinator<S>> {
        let piece_manager = PieceManager::with_config(&metainfo, config.block_length, config.block_timeout);
        let poll = Poll::new().map_err(CoreError::Resource)?;
        Ok(Coordinator {
            poll,
            peers: HashMap::new(),
            next_token: 0,
            pending: VecDeque::new(),
            piece_manager,
            metainfo,
            peer_id: generate_peer_id(),
            config,
            sink,
        })
    }

    /// Runs the full lifecycle: announce, connect, poll loop, scheduling,
    /// Have broadcasts, termination on `all_complete()`.
    pub fn run(&mut self) -> CoreResult<()> {
        self.announce()?;
        self.drive()
    }

    /// Bypasses the tracker announce and drives the loop against a
    /// caller-supplied peer list. Used by tests that don't reach a real
    /// tracker.
    #[cfg(test)]
    pub(crate) fn run_with_known_peers(&mut self, peers: Vec<TrackerPeer>) -> CoreResult<()> {
        self.pending.extend(peers);
        self.drive()
    }

    fn drive(&mut self) -> CoreResult<()> {
        self.top_up_connections();

        let mut events = Events::with_capacity(1024);
        while !self.piece_manager.all_complete() {
            self.poll
                .poll(&mut events, Some(self.config.poll_timeout))
                .map_err(CoreError::Resource)?;

            let mut closed = Vec::new();
            for event in events.iter() {
                let token = event.token();
                let writable = event.is_writable();
                let readable = event.is_readable();

                if writable {
                    if let Err(e) = self.on_writable(token) {
                        log::debug!("peer {:?} closed on write: {}", token, e);
                        closed.push(token);
                        continue;
                    }
                }
                if readable {
                    if let Err(e) = self.on_readable(token) {
                        log::debug!("peer {:?} closed on read: {}", token, e);
                        closed.push(token);
                    }
                }
            }

            for token in closed {
                self.remove_peer(token);
            }

            self.expire_stale_connects();
            self.tick_scheduler();
            self.top_up_connections();
        }
        Ok(())
    }

    fn announce(&mut self) -> CoreResult<()> {
        let params = AnnounceParams {
            info_hash: self.metainfo.info_hash(),
            peer_id: self.peer_id,
            port: self.config.port,
            uploaded: 0,
            downloaded: 0,
            left: self.metainfo.total_length(),
        };
        let peers = http::announce_all(
            self.metainfo.trackers(),
            &params,
            self.config.max_accumulated_peers,
        );
        if peers.is_empty() {
            return Err(CoreError::NoPeersFound);
        }
        self.pending.extend(peers);
        Ok(())
    }

    fn top_up_connections(&mut self) {
        while self.peers.len() < self.config.max_concurrent_peers {
            let candidate = match self.pending.pop_front() {
                Some(c) => c,
                None => break,
            };
            if let Err(e) = self.connect_peer(candidate) {
                log::debug!("failed to open peer connection: {}", e);
            }
        }
    }

    fn connect_peer(&mut self, candidate: TrackerPeer) -> std::io::Result<()> {
        let mut conn = Connection::connect(
            candidate.addr,
            self.metainfo.info_hash(),
            self.metainfo.num_pieces(),
            candidate.peer_id,
        )?;
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(&mut conn.stream, token, Interest::READABLE | Interest::WRITABLE)?;
        self.peers.insert(token, conn);
        Ok(())
    }

    fn on_writable(&mut self, token: Token) -> Result<(), PeerError> {
        let peer_id = self.peer_id;
        let conn = match self.peers.get_mut(&token) {
            Some(c) => c,
            None => return Ok(()),
        };
        if conn.state == ConnState::Connecting {
            conn.on_connected(peer_id);
        }
        conn.flush_write()
    }

    fn on_readable(&mut self, token: Token) -> Result<(), PeerError> {
        let conn = match self.peers.get_mut(&token) {
            Some(c) => c,
            None => return Ok(()),
        };
        conn.read_available()?;
        conn.process_buffered()?;
        let deliveries = conn.drain_deliveries();
        for (index, begin, data) in deliveries {
            self.apply_block(index as usize, begin, data);
        }
        Ok(())
    }

    fn apply_block(&mut self, piece_index: usize, begin: u32, data: Vec<u8>) {
        match self.piece_manager.apply_block(piece_index, begin, data) {
            Some(ApplyOutcome::Completed { verified: true }) => {
                if let Some(bytes) = self.piece_manager.piece_bytes(piece_index) {
                    if let Err(e) = self.sink.write_piece(piece_index, &bytes) {
                        log::warn!("failed to write piece {}: {}", piece_index, e);
                    }
                }
                self.broadcast_have(piece_index);
            }
            Some(ApplyOutcome::Completed { verified: false }) => {
                log::warn!("piece {} failed verification, rescheduling", piece_index);
            }
            Some(ApplyOutcome::Pending) | None => {}
        }
    }

    fn broadcast_have(&mut self, piece_index: usize) {
        let message = Message::Have(piece_index as u32);
        for conn in self.peers.values_mut() {
            if conn.state == ConnState::Active {
                conn.queue_message(&message);
                let _ = conn.flush_write();
            }
        }
    }

    fn expire_stale_connects(&mut self) {
        let now = Instant::now();
        let timeout = self.config.connect_timeout;
        let stale: Vec<Token> = self
            .peers
            .iter()
            .filter(|(_, c)| c.is_connect_stale(timeout, now))
            .map(|(t, _)| *t)
            .collect();
        for token in stale {
            self.remove_peer(token);
        }
    }

    fn tick_scheduler(&mut self) {
        let requests = picker::schedule_requests(
            &mut self.peers,
            &mut self.piece_manager,
            self.config.request_cooldown,
            Instant::now(),
        );
        for (token, message) in requests {
            if let Some(conn) = self.peers.get_mut(&token) {
                conn.queue_message(&message);
                let _ = conn.flush_write();
            }
        }
    }

    fn remove_peer(&mut self, token: Token) {
        if let Some(mut conn) = self.peers.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            conn.close();
        }
    }

    pub fn block_length(&self) -> u32 {
        self.config.block_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{self, Value};
    use crate::peer::handshake::Handshake;
    use crate::peer::message::take_frame;
    use crate::storage::NullSink;
    use sha1::{Digest, Sha1};
    use std::collections::BTreeMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

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

    fn single_piece_metainfo(data: &[u8]) -> Metainfo {
        let hash: [u8; 20] = Sha1::digest(data).into();
        let info = dict(vec![
            ("length", Value::Int(data.len() as i64)),
            ("name", string("f")),
            ("piece length", Value::Int(data.len() as i64)),
            ("pieces", Value::Bytes(hash.to_vec())),
        ]);
        let top = dict(vec![("announce", string("http://t")), ("info", info)]);
        Metainfo::from_bytes(&bencode::encode(&top)).unwrap()
    }

    fn read_frame(sock: &mut std::net::TcpStream) -> Message {
        let mut len_buf = [0u8; 4];
        sock.read_exact(&mut len_buf).unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        sock.read_exact(&mut payload).unwrap();
        let mut framed = len_buf.to_vec();
        framed.extend_from_slice(&payload);
        let (p, _) = take_frame(&framed).unwrap();
        Message::decode_payload(p).unwrap()
    }

    /// A peer that serves every block correctly causes the coordinator's
    /// loop to exit once `all_complete()` becomes true.
    #[test]
    fn terminates_once_every_piece_is_verified() {
        let data = b"abcd".to_vec();
        let metainfo = single_piece_metainfo(&data);
        let info_hash = metainfo.info_hash();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_data = data.clone();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 68];
            sock.read_exact(&mut buf).unwrap();
            let theirs = Handshake::from_bytes(&buf).unwrap();
            assert_eq!(theirs.info_hash, info_hash);

            let reply = Handshake::new(info_hash, [9u8; 20]);
            sock.write_all(&reply.to_bytes()).unwrap();
            sock.write_all(&Message::Bitfield(vec![0x80]).encode()).unwrap();
            sock.write_all(&Message::Unchoke.encode()).unwrap();

            // The client auto-sends Interested on receiving our bitfield.
            let interested = read_frame(&mut sock);
            assert_eq!(interested, Message::Interested);

            let request = read_frame(&mut sock);
            match request {
                Message::Request(index, begin, length) => {
                    assert_eq!(index, 0);
                    assert_eq!(begin, 0);
                    assert_eq!(length as usize, server_data.len());
                    sock.write_all(&Message::Piece(0, 0, server_data).encode())
                        .unwrap();
                }
                other => panic!("unexpected message {:?}", other),
            }
        });

        let config = CoordinatorConfig {
            max_concurrent_peers: 1,
            poll_timeout: Duration::from_millis(100),
            ..CoordinatorConfig::default()
        };
        let mut coordinator = Coordinator::new(metainfo, config, NullSink).unwrap();
        let peer = TrackerPeer {
            addr,
            peer_id: None,
        };
        coordinator.run_with_known_peers(vec![peer]).unwrap();

        assert!(coordinator.piece_manager.all_complete());
        server.join().unwrap();
    }
}
