//! HTTP tracker announce: builds the query, speaks raw HTTP/1.1 over a
//! blocking mio socket, and accepts both the compact and dictionary
//! peer-list forms.

use crate::bencode::{self, Value};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const TRACKER_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_ANNOUNCE_PORT: u16 = 80;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid announce url: {0}")]
    Url(#[from] url::ParseError),
    #[error("announce url has no host")]
    NoHost,
    #[error("i/o error talking to tracker: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("malformed http response")]
    MalformedHttp,
    #[error("bencode error in tracker response: {0}")]
    Bencode(#[from] bencode::BencodeError),
    #[error("tracker response missing 'peers' key")]
    MissingPeers,
    #[error("malformed peer entry in tracker response")]
    BadPeerEntry,
    #[error("tracker reported failure: {0}")]
    TrackerFailure(String),
}

/// One peer as discovered from a tracker. `peer_id` is known only in the
/// dictionary response form; compact form never carries it, so any
/// peer_id is accepted when it's absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerPeer {
    pub addr: SocketAddr,
    pub peer_id: Option<[u8; 20]>,
}

pub struct AnnounceResponse {
    pub interval: u64,
    pub peers: Vec<TrackerPeer>,
}

pub struct AnnounceParams {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

pub fn announce_one(url: &str, params: &AnnounceParams) -> Result<AnnounceResponse, TrackerError> {
    let announce_url = Url::parse(url)?;
    let host = announce_url.host_str().ok_or(TrackerError::NoHost)?;
    let port = announce_url.port().unwrap_or(DEFAULT_ANNOUNCE_PORT);
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or(TrackerError::NoHost)?;

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
        urlencoding::encode_binary(&params.info_hash),
        urlencoding::encode_binary(&params.peer_id),
        params.port,
        params.uploaded,
        params.downloaded,
        params.left,
    );
    let path = if announce_url.query().is_some() {
        format!("{}&{}", announce_url.path(), query)
    } else {
        format!("{}?{}", announce_url.path(), query)
    };
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n",
        path = path,
        host = host,
    );

    let raw = blocking_http_round_trip(addr, request.as_bytes())?;
    parse_announce_response(&raw)
}

fn blocking_http_round_trip(addr: SocketAddr, request: &[u8]) -> Result<Vec<u8>, TrackerError> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(16);
    let token = Token(0);

    let mut stream = TcpStream::connect(addr)?;
    poll.registry()
        .register(&mut stream, token, Interest::WRITABLE)?;

    let mut written = 0;
    let mut response = Vec::new();
    loop {
        poll.poll(&mut events, Some(TRACKER_TIMEOUT))?;
        if events.is_empty() {
            return Err(TrackerError::Timeout(TRACKER_TIMEOUT));
        }
        for event in events.iter() {
            if event.is_writable() && written < request.len() {
                written += stream.write(&request[written..])?;
                if written == request.len() {
                    poll.registry()
                        .reregister(&mut stream, token, Interest::READABLE)?;
                }
            }
            if event.is_readable() {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) => return Ok(response),
                        Ok(n) => response.extend_from_slice(&buf[..n]),
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }
}

fn parse_announce_response(raw: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    let status = response
        .parse(raw)
        .map_err(|_| TrackerError::MalformedHttp)?;
    let header_len = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Err(TrackerError::MalformedHttp),
    };
    let body = &raw[header_len..];

    let value = bencode::decode(body)?;
    let dict = value.as_dict().ok_or(TrackerError::MalformedHttp)?;

    if let Some(reason) = dict
        .get("failure reason".as_bytes())
        .and_then(Value::as_bytes)
    {
        return Err(TrackerError::TrackerFailure(
            String::from_utf8_lossy(reason).into_owned(),
        ));
    }

    let interval = value.get("interval").and_then(Value::as_int).unwrap_or(0) as u64;
    let peers_value = value.get("peers").ok_or(TrackerError::MissingPeers)?;
    let peers = parse_peers(peers_value)?;

    Ok(AnnounceResponse { interval, peers })
}

fn parse_peers(value: &Value) -> Result<Vec<TrackerPeer>, TrackerError> {
    if let Some(bytes) = value.as_bytes() {
        return parse_compact_peers(bytes);
    }
    if let Some(list) = value.as_list() {
        return list.iter().map(parse_dict_peer).collect();
    }
    Err(TrackerError::BadPeerEntry)
}

fn parse_compact_peers(bytes: &[u8]) -> Result<Vec<TrackerPeer>, TrackerError> {
    let mut peers = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if i + 6 <= bytes.len() {
            let ip = Ipv4Addr::new(bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]);
            let port = u16::from_be_bytes([bytes[i + 4], bytes[i + 5]]);
            peers.push(TrackerPeer {
                addr: SocketAddr::V4(SocketAddrV4::new(ip, port)),
                peer_id: None,
            });
            i += 6;
        } else if i + 18 <= bytes.len() {
            let octets: [u8; 16] = bytes[i..i + 16].try_into().unwrap();
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([bytes[i + 16], bytes[i + 17]]);
            peers.push(TrackerPeer {
                addr: SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)),
                peer_id: None,
            });
            i += 18;
        } else {
            return Err(TrackerError::BadPeerEntry);
        }
    }
    Ok(peers)
}

fn parse_dict_peer(entry: &Value) -> Result<TrackerPeer, TrackerError> {
    let ip = entry
        .get_str("ip")
        .ok_or(TrackerError::BadPeerEntry)?;
    let port = entry
        .get("port")
        .and_then(Value::as_int)
        .ok_or(TrackerError::BadPeerEntry)? as u16;
    let addr = (ip.as_str(), port)
        .to_socket_addrs()
        .map_err(|_| TrackerError::BadPeerEntry)?
        .next()
        .ok_or(TrackerError::BadPeerEntry)?;
    let peer_id = entry.get("peer id").and_then(Value::as_bytes).map(|b| {
        let mut id = [0u8; 20];
        let n = b.len().min(20);
        id[..n].copy_from_slice(&b[..n]);
        id
    });
    Ok(TrackerPeer { addr, peer_id })
}

/// Announces to every tracker in `trackers`, isolating per-tracker
/// failures (they are non-fatal to the download) and
/// deduplicating by address, stopping early once `cap` peers accumulate.
pub fn announce_all(
    trackers: &HashSet<String>,
    params: &AnnounceParams,
    cap: usize,
) -> Vec<TrackerPeer> {
    let mut seen = HashSet::new();
    let mut peers = Vec::new();
    for url in trackers {
        if peers.len() >= cap {
            break;
        }
        match announce_one(url, params) {
            Ok(response) => {
                for peer in response.peers {
                    if peers.len() >= cap {
                        break;
                    }
                    if seen.insert(peer.addr) {
                        peers.push(peer);
                    }
                }
            }
            Err(e) => log::warn!("tracker {} failed: {}", url, e),
        }
    }
    peers
}
