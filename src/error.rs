//! Errors raised by tracker operations.
//!
//! Every failure is handled where it happens: validation errors stop an operation before the
//! store is contacted, store errors leave local state untouched, and data errors are recovered by
//! dropping the broken entity.

use crate::model::RecordId;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Missing activity, missing category, bad segment bounds and similar input problems.
    #[error("{0}")]
    Validation(String),

    #[error("request to record store failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("record store answered {status}: {message}")]
    Api { status: u16, message: String },

    /// The store answered with `success: false`.
    #[error("record store rejected the request: {0}")]
    Rejected(String),

    #[error("malformed record store response: {0}")]
    Decode(String),

    /// Recovered by forgetting the record locally.
    #[error("record {0} not found")]
    NotFound(RecordId),
}

impl TrackerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
