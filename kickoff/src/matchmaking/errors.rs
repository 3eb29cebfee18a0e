//! Matchmaking error types.

use thiserror::Error;

use crate::{db::StoreError, game::MatchError};

/// Matchmaking errors
#[derive(Debug, Error)]
pub enum MatchmakingError {
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The match rejected the transition
    #[error(transparent)]
    Match(#[from] MatchError),

    /// No pending ticket for this player
    #[error("No pending ticket")]
    TicketNotFound,

    /// Invite code unknown or already used
    #[error("Invite code not found: {0}")]
    InviteNotFound(String),

    /// Deck missing or not owned by the requester
    #[error("Deck not found: {0}")]
    DeckNotFound(i64),

    /// Player already queued or seated in an open match
    #[error("Already searching for a match")]
    AlreadyQueued,
}

impl MatchmakingError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            MatchmakingError::Store(err) => err.client_message(),
            MatchmakingError::Match(err) => err.client_message(),
            MatchmakingError::DeckNotFound(_) => "Deck not found".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for matchmaking operations
pub type MatchmakingResult<T> = Result<T, MatchmakingError>;
