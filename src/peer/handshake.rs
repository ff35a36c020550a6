//! The 68-byte opening exchange: `<19>"BitTorrent protocol"<8 zero
//! bytes><info_hash:20><peer_id:20>`.

use thiserror::Error;

pub const PSTR: &str = "BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 68;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake must be exactly {HANDSHAKE_LEN} bytes, got {0}")]
    WrongLength(usize),
    #[error("handshake pstrlen must be 19, got {0}")]
    WrongPstrLen(u8),
    #[error("handshake protocol string mismatch")]
    WrongPstr,
    #[error("handshake info_hash does not match ours")]
    InfoHashMismatch,
    #[error("handshake peer_id does not match the tracker-advertised id")]
    PeerIdMismatch,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Handshake {
        Handshake { info_hash, peer_id }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut bytes = [0u8; HANDSHAKE_LEN];
        bytes[0] = 19;
        bytes[1..20].copy_from_slice(PSTR.as_bytes());
        // bytes[20..28] stay zero (reserved)
        bytes[28..48].copy_from_slice(&self.info_hash);
        bytes[48..68].copy_from_slice(&self.peer_id);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Handshake, HandshakeError> {
        if bytes.len() != HANDSHAKE_LEN {
            return Err(HandshakeError::WrongLength(bytes.len()));
        }
        if bytes[0] != 19 {
            return Err(HandshakeError::WrongPstrLen(bytes[0]));
        }
        if &bytes[1..20] != PSTR.as_bytes() {
            return Err(HandshakeError::WrongPstr);
        }
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&bytes[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&bytes[48..68]);
        Ok(Handshake { info_hash, peer_id })
    }

    /// Validates a received handshake against our info_hash and, when the
    /// remote peer_id is already known (tracker dict form), against it too.
    /// Compact-form trackers never supply a peer_id, so `expected_peer_id`
    /// is `None` in that case and any peer_id is accepted.
    pub fn validate(
        &self,
        our_info_hash: &[u8; 20],
        expected_peer_id: Option<&[u8; 20]>,
    ) -> Result<(), HandshakeError> {
        if &self.info_hash != our_info_hash {
            return Err(HandshakeError::InfoHashMismatch);
        }
        if let Some(expected) = expected_peer_id {
            if &self.peer_id != expected {
                return Err(HandshakeError::PeerIdMismatch);
            }
        }
        Ok(())
    }
}
