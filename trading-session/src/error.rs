use crate::client::SessionState;
use thiserror::Error;
use trading_protocol::CodecError;

/// Errors surfaced by the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is already connected")]
    AlreadyConnected,
    #[error("server is already running")]
    AlreadyRunning,
    #[error("operation requires a connected session (state: {0})")]
    InvalidState(SessionState),
    #[error("could not resolve address {0}")]
    AddressResolution(String),
    #[error("failed to connect")]
    ConnectFailed(#[source] std::io::Error),
    #[error("failed to bind listener")]
    Bind(#[source] std::io::Error),
    #[error("connection is closed")]
    Closed,
    #[error("client id {0:?} is already registered")]
    DuplicateId(String),
    #[error("session registry is full ({capacity} entries)")]
    RegistryFull { capacity: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
