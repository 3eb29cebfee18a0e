//! Matchmaking data models.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::game::entities::{DeckId, MatchId, MatchMode, PlayerId};

/// A pending search. Deleted once paired or cancelled.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ticket {
    pub player_id: PlayerId,
    pub rating: i32,
    pub mode: MatchMode,
    pub deck_id: Option<DeckId>,
    pub created_at: DateTime<Utc>,
}

/// Allocator tuning
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatchmakingConfig {
    /// First search window around the requester's rating
    pub primary_band: i32,
    /// Second window, only for modes that allow it
    pub widened_band: i32,
    /// Waiting matches older than this are abandoned
    pub stale_after_secs: i64,
    /// Candidates fetched per search
    pub search_limit: i64,
    pub invite_code_len: usize,
    /// Rating assumed for players without history
    pub default_rating: i32,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            primary_band: 200,
            widened_band: 500,
            stale_after_secs: 300,
            search_limit: 20,
            invite_code_len: 6,
            default_rating: 1000,
        }
    }
}

impl MatchmakingConfig {
    #[must_use]
    pub fn stale_after(&self) -> TimeDelta {
        TimeDelta::seconds(self.stale_after_secs)
    }
}

/// Where a ticket ended up.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Allocation {
    /// Took the open seat of an existing match, which is now in its coin toss.
    Joined { match_id: MatchId },
    /// Opened a new match and waits for an opponent.
    Created {
        match_id: MatchId,
        invite_code: Option<String>,
    },
}

impl Allocation {
    #[must_use]
    pub fn match_id(&self) -> MatchId {
        match self {
            Self::Joined { match_id } | Self::Created { match_id, .. } => *match_id,
        }
    }
}
