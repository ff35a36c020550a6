//! Block scheduler: for every required piece, pick an eligible peer at
//! random and request one of its free blocks.

use crate::peer::connection::Connection;
use crate::peer::message::Message;
use crate::piece_manager::PieceManager;
use mio::Token;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const REQUEST_COOLDOWN: Duration = Duration::from_millis(200);

/// One scheduling tick: expires stale blocks, then greedily matches every
/// required piece to at most one eligible peer, producing the Request
/// frames to send. Marks `last_request` on each chosen peer immediately so
/// a single tick never double-books one peer across two pieces.
pub fn schedule_requests(
    peers: &mut HashMap<Token, Connection>,
    piece_manager: &mut PieceManager,
    cooldown: Duration,
    now: Instant,
) -> Vec<(Token, Message)> {
    piece_manager.expire_stale(now);

    let mut requests = Vec::new();
    for piece_index in piece_manager.required_pieces() {
        let mut eligible: Vec<Token> = peers
            .iter()
            .filter(|(_, conn)| conn.is_eligible(cooldown, now) && conn.has_piece(piece_index))
            .map(|(token, _)| *token)
            .collect();
        if eligible.is_empty() {
            continue;
        }
        eligible.shuffle(&mut rand::thread_rng());
        let token = eligible[0];

        if let Some((offset, length)) = piece_manager.reserve_block(piece_index) {
            let conn = peers.get_mut(&token).expect("token came from this map");
            conn.note_request_sent(now);
            requests.push((
                token,
                Message::Request(piece_index as u32, offset, length),
            ));
        }
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{self, Value};
    use crate::metainfo::Metainfo;
    use sha1::{Digest, Sha1};
    use std::collections::BTreeMap;
    use std::net::TcpListener;

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

    fn sample_metainfo() -> Metainfo {
        let hash = Sha1::digest(b"x");
        let pieces = hash.repeat(2);
        let info = dict(vec![
            ("length", Value::Int(8)),
            ("name", string("f")),
            ("piece length", Value::Int(4)),
            ("pieces", Value::Bytes(pieces)),
        ]);
        let top = dict(vec![("announce", string("http://t")), ("info", info)]);
        Metainfo::from_bytes(&bencode::encode(&top)).unwrap()
    }

    /// A connected-but-not-eligible peer (choked) never receives a request.
    #[test]
    fn choked_peer_is_never_selected() {
        let meta = sample_metainfo();
        let mut manager = PieceManager::new(&meta);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let conn = Connection::connect(addr, meta.info_hash(), meta.num_pieces(), None).unwrap();
        // peer_choking defaults to true and am_interested defaults to false,
        // so this connection starts ineligible regardless of ACTIVE state.

        let mut peers = HashMap::new();
        peers.insert(Token(0), conn);

        let requests = schedule_requests(&mut peers, &mut manager, REQUEST_COOLDOWN, Instant::now());
        assert!(requests.is_empty());
    }
}
