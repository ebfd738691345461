use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds shared by every subsystem.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is malformed or internally inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Engine, iterator or other unrecoverable internal failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// Key or value encoding/decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An RPC peer is down; recoverable at the caller's discretion.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}
