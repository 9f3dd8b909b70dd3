//! Remote Protocol Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no connection to the volume \"{0}\"")]
    NoConnection(String),

    /// A server-side error surfaced through the protocol, unchanged.
    #[error("network file client: rpc {op} error: {status}")]
    Rpc {
        op: &'static str,
        status: tonic::Status,
    },

    #[error("network file client: writer is closed")]
    Closed,

    #[error("network file client: already closed")]
    AlreadyClosed,

    #[error("invalid slice key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}
