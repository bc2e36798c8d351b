/// error.rs — Error taxonomy
///
/// `EngineError` is what the in-memory engine returns; every variant is
/// recoverable at the call site.  `SnapshotError` is the only condition that
/// stops the process, and only at startup.  `CommandError` is the reply type
/// of the message-passing command interface.
use thiserror::Error;

use crate::models::{TokenId, UserId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("unknown user {0}")]
    NotFound(UserId),

    #[error("user {user} is not tracking token {token}")]
    NotTracked { user: UserId, token: TokenId },

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("invalid price {price} for token {token}")]
    InvalidPrice { token: TokenId, price: f64 },
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid snapshot: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("no current price available for token {0}")]
    PriceUnavailable(TokenId),

    #[error("tracker service is not running")]
    ServiceStopped,
}
