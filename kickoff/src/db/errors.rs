//! Storage error types.

use thiserror::Error;

use super::timeouts::TimeoutError;
use crate::game::{MatchError, entities::MatchId};

/// Errors raised by the durable store adapters
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Query exceeded its deadline
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// Stored JSON could not be read back
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Match not found
    #[error("Match not found: {0}")]
    MatchNotFound(MatchId),

    /// Stored column held a value this build cannot interpret
    #[error("Invalid stored value: {0}")]
    InvalidRow(String),

    /// Row already exists
    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    /// Test hook: the store was told to fail
    #[error("Store unavailable")]
    Unavailable,
}

impl StoreError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            StoreError::MatchNotFound(_) => "Match not found".to_string(),
            StoreError::Duplicate(_) => "Already exists".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<StoreError> for MatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MatchNotFound(id) => MatchError::MatchNotFound(id),
            other => MatchError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
