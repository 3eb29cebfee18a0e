//! Match error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entities::{Cell, MatchId, Zone};

/// Everything a match command can fail with.
///
/// Validation failures are recoverable and never mutate state. `Retry` is a
/// second lost compare-and-swap. `MatchNotFound` and `MatchCompleted` are
/// fatal for the command and must not be retried.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum MatchError {
    // Placement validation
    #[error("not your turn")]
    NotYourTurn,
    #[error("card is not in your deck")]
    CardNotInDeck,
    #[error("card is already on the board")]
    CardAlreadyPlaced,
    #[error("cell {0} is occupied")]
    CellOccupied(Cell),
    #[error("zone {0:?} is full")]
    ZoneFull(Zone),
    #[error("placing this card costs {required} CP, {available} CP left")]
    BudgetExceeded { required: u32, available: u32 },
    #[error("first card placed must be a midfielder")]
    FirstCardMustBeMidfield,
    #[error("cell {0} is off the board")]
    InvalidCell(Cell),

    // Move validation
    #[error("action not allowed during {0}")]
    InvalidActionForPhase(String),
    #[error("no card of yours can act from that cell")]
    EmptyActorCell,
    #[error("actor is too far from the ball")]
    ActorOutOfReach,
    #[error("target is not reachable for this action")]
    IllegalTarget,
    #[error("bonus card unavailable")]
    BonusCardUnavailable,
    #[error("substitution unavailable")]
    SubstituteUnavailable,

    // Lifecycle
    #[error("player is not seated in this match")]
    NotSeated,
    #[error("match has no open seat")]
    SeatTaken,
    #[error("cannot join your own match")]
    SelfMatch,
    #[error("phase deadline has not passed")]
    DeadlineNotReached,

    // Concurrency and transport
    #[error("match changed concurrently, retry the command")]
    Retry,
    #[error("connection lost")]
    ConnectionLost,

    // Fatal
    #[error("match {0} not found")]
    MatchNotFound(MatchId),
    #[error("match {0} is completed")]
    MatchCompleted(MatchId),

    #[error("storage error: {0}")]
    Storage(String),
}

impl MatchError {
    /// Validation failures the player can correct and resubmit.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::MatchNotFound(_)
                | Self::MatchCompleted(_)
                | Self::Storage(_)
                | Self::ConnectionLost
        )
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MatchNotFound(_) | Self::MatchCompleted(_))
    }

    /// Stable machine-readable code for the wire.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotYourTurn => "not_your_turn",
            Self::CardNotInDeck => "card_not_in_deck",
            Self::CardAlreadyPlaced => "card_already_placed",
            Self::CellOccupied(_) => "cell_occupied",
            Self::ZoneFull(_) => "zone_full",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::FirstCardMustBeMidfield => "first_card_must_be_midfield",
            Self::InvalidCell(_) => "invalid_cell",
            Self::InvalidActionForPhase(_) => "invalid_action_for_phase",
            Self::EmptyActorCell => "empty_actor_cell",
            Self::ActorOutOfReach => "actor_out_of_reach",
            Self::IllegalTarget => "illegal_target",
            Self::BonusCardUnavailable => "bonus_card_unavailable",
            Self::SubstituteUnavailable => "substitute_unavailable",
            Self::NotSeated => "not_seated",
            Self::SeatTaken => "seat_taken",
            Self::SelfMatch => "self_match",
            Self::DeadlineNotReached => "deadline_not_reached",
            Self::Retry => "retry",
            Self::ConnectionLost => "connection_lost",
            Self::MatchNotFound(_) => "match_not_found",
            Self::MatchCompleted(_) => "match_completed",
            Self::Storage(_) => "internal",
        }
    }

    /// Get a client-safe error message that doesn't leak storage details.
    pub fn client_message(&self) -> String {
        match self {
            Self::Storage(_) => "Internal server error".to_string(),
            Self::MatchNotFound(_) => "Match not found".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for match operations
pub type MatchResult<T> = Result<T, MatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_details_are_hidden() {
        let err = MatchError::Storage("relation \"matches\" does not exist".to_string());
        assert_eq!(err.client_message(), "Internal server error");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn validation_errors_are_recoverable() {
        assert!(MatchError::ZoneFull(Zone::Midfield).is_recoverable());
        assert!(MatchError::NotYourTurn.is_recoverable());
        assert!(MatchError::Retry.is_recoverable());
        assert!(MatchError::MatchCompleted(uuid::Uuid::nil()).is_fatal());
    }
}
