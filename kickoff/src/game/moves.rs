//! Append-only audit records: the move log and the placement log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{
    entities::{ActionKind, CardId, Cell, MatchId, PlayerId, Side},
    resolution::Resolution,
};

/// One resolved action. Never mutated once sealed.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Move {
    pub match_id: MatchId,
    pub turn: u32,
    /// Position within the turn; a bonus played before the action is 0.
    pub sequence: u32,
    pub player_id: PlayerId,
    pub side: Side,
    pub kind: ActionKind,
    pub actor_cell: Cell,
    pub target_cell: Option<Cell>,
    pub card_ref: Option<CardId>,
    pub resolution: Option<Resolution>,
    /// Synthesized by the engine after the turn deadline.
    pub auto: bool,
    pub created_at: DateTime<Utc>,
    pub integrity_hash: String,
}

/// Borrowed view of every hashed field, in a fixed order.
#[derive(Serialize)]
struct MoveBody<'a> {
    match_id: &'a MatchId,
    turn: u32,
    sequence: u32,
    player_id: PlayerId,
    side: Side,
    kind: ActionKind,
    actor_cell: Cell,
    target_cell: Option<Cell>,
    card_ref: Option<CardId>,
    resolution: &'a Option<Resolution>,
    auto: bool,
    created_at: &'a DateTime<Utc>,
}

impl Move {
    /// Fill in the integrity hash.
    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.integrity_hash = self.compute_hash();
        self
    }

    /// Hex SHA-256 over the canonical JSON of every field but the hash.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let body = MoveBody {
            match_id: &self.match_id,
            turn: self.turn,
            sequence: self.sequence,
            player_id: self.player_id,
            side: self.side,
            kind: self.kind,
            actor_cell: self.actor_cell,
            target_cell: self.target_cell,
            card_ref: self.card_ref,
            resolution: &self.resolution,
            auto: self.auto,
            created_at: &self.created_at,
        };
        let canonical = serde_json::to_vec(&body).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    #[must_use]
    pub fn verify(&self) -> bool {
        self.integrity_hash == self.compute_hash()
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.resolution.as_ref().is_some_and(|r| r.success)
    }
}

/// One card assigned to one cell, including substitutions.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Placement {
    pub match_id: MatchId,
    pub placement_order: u32,
    pub player_id: PlayerId,
    pub side: Side,
    pub card_id: CardId,
    pub cell: Cell,
    pub substitute: bool,
    pub expelled_until_turn: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::resolution::{Duel, Resolution};

    fn sample() -> Move {
        Move {
            match_id: uuid::Uuid::new_v4(),
            turn: 3,
            sequence: 1,
            player_id: 7,
            side: Side::A,
            kind: ActionKind::Dribble,
            actor_cell: 5,
            target_cell: Some(6),
            card_ref: None,
            resolution: Some(Resolution {
                initial_roll: 4,
                duel: Some(Duel {
                    attacker_roll: 3,
                    defender_roll: 2,
                    attacker_total: 4,
                    defender_total: 2,
                }),
                modifiers: Vec::new(),
                success: true,
                critical: false,
            }),
            auto: false,
            created_at: Utc::now(),
            integrity_hash: String::new(),
        }
        .sealed()
    }

    #[test]
    fn sealed_move_verifies() {
        let mv = sample();
        assert_eq!(mv.integrity_hash.len(), 64);
        assert!(mv.verify());
    }

    #[test]
    fn tampering_breaks_the_hash() {
        let mut mv = sample();
        if let Some(resolution) = mv.resolution.as_mut() {
            resolution.success = false;
        }
        assert!(!mv.verify());
    }
}
