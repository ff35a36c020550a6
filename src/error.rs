//! Crate-wide error taxonomy: PARSE, NETWORK, PROTOCOL, VERIFICATION,
//! RESOURCE. Per-peer and per-piece errors are handled at the point they
//! occur and never reach this type; only metainfo-load and resource errors
//! are meant to surface to the caller of the coordinator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to load metainfo: {0}")]
    Metainfo(#[from] crate::metainfo::MetainfoError),

    #[error("no usable trackers responded")]
    NoPeersFound,

    #[error("resource error: {0}")]
    Resource(#[from] std::io::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
