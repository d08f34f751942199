//! Error taxonomy for Docket.

use thiserror::Error;

/// All errors surfaced by Docket components.
#[derive(Debug, Error)]
pub enum DocketError {
    /// A node, rule, task, case or cost does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// Bad input: missing rule fields, negative threshold, progress out of range.
    #[error("validation error: {0}")]
    Validation(String),

    /// A stored value could not be interpreted (malformed date, unknown status).
    #[error("computation error: {0}")]
    Computation(String),

    /// An external delivery channel failed.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DocketError {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DocketError>;
