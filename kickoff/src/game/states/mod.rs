//! Match phases.
//!
//! Each phase is its own struct carrying the data only that phase needs
//! (deadlines, confirmations, the sub-state of `Placement` and `Active`).
//! [`Phase`] ties them together and dispatches [`PhaseInfo`] without boxing.

use chrono::{DateTime, Utc};
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use crate::game::entities::Side;

/// Behaviour every phase exposes to the engine and the deadline poller.
#[enum_dispatch]
pub trait PhaseInfo {
    fn name(&self) -> &'static str;

    /// When the engine acts on the players' behalf if they have not.
    fn deadline(&self) -> Option<DateTime<Utc>>;

    /// Side whose input the phase is waiting on, if exactly one.
    fn awaiting(&self) -> Option<Side> {
        None
    }

    fn is_terminal(&self) -> bool {
        false
    }
}

/// Freshly allocated, not yet visible to matchmaking.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Initializing {}

/// One seat filled, waiting for an opponent.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct WaitingForPlayers {
    pub since: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CoinToss {
    pub deadline: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PlacementTurn {
    TeamA,
    TeamB,
}

impl From<Side> for PlacementTurn {
    fn from(side: Side) -> Self {
        match side {
            Side::A => Self::TeamA,
            Side::B => Self::TeamB,
        }
    }
}

impl From<PlacementTurn> for Side {
    fn from(turn: PlacementTurn) -> Self {
        match turn {
            PlacementTurn::TeamA => Side::A,
            PlacementTurn::TeamB => Side::B,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementRound {
    Initial,
    SecondHalf,
}

/// Players alternate placing one card each.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Placement {
    pub team: PlacementTurn,
    pub round: PlacementRound,
    pub deadline: DateTime<Utc>,
}

/// Both line-ups are complete; waiting for confirmations or the lock window.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PlacementLocked {
    pub round: PlacementRound,
    pub confirmations: [bool; 2],
    pub deadline: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ActiveTurn {
    TurnA,
    TurnB,
}

impl From<Side> for ActiveTurn {
    fn from(side: Side) -> Self {
        match side {
            Side::A => Self::TurnA,
            Side::B => Self::TurnB,
        }
    }
}

impl From<ActiveTurn> for Side {
    fn from(turn: ActiveTurn) -> Self {
        match turn {
            ActiveTurn::TurnA => Side::A,
            ActiveTurn::TurnB => Side::B,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Active {
    pub owner: ActiveTurn,
    pub deadline: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HalfTime {
    pub confirmations: [bool; 2],
    pub deadline: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionReason {
    FullTime,
    Forfeit { by: Side },
    /// Nobody took the open seat in time.
    Abandoned,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Completed {
    pub winner: Option<Side>,
    pub scores: [u32; 2],
    pub reason: CompletionReason,
    pub at: DateTime<Utc>,
}

#[enum_dispatch(PhaseInfo)]
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    WaitingForPlayers,
    CoinToss,
    Placement,
    PlacementLocked,
    Active,
    HalfTime,
    Completed,
}

impl Default for Phase {
    fn default() -> Self {
        Initializing::default().into()
    }
}

impl Phase {
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }
}

impl PhaseInfo for Initializing {
    fn name(&self) -> &'static str {
        "initializing"
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl PhaseInfo for WaitingForPlayers {
    fn name(&self) -> &'static str {
        "waiting_for_players"
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl PhaseInfo for CoinToss {
    fn name(&self) -> &'static str {
        "coin_toss"
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        Some(self.deadline)
    }
}

impl PhaseInfo for Placement {
    fn name(&self) -> &'static str {
        "placement"
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        Some(self.deadline)
    }

    fn awaiting(&self) -> Option<Side> {
        Some(self.team.into())
    }
}

impl PhaseInfo for PlacementLocked {
    fn name(&self) -> &'static str {
        "placement_locked"
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        Some(self.deadline)
    }
}

impl PhaseInfo for Active {
    fn name(&self) -> &'static str {
        "active"
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        Some(self.deadline)
    }

    fn awaiting(&self) -> Option<Side> {
        Some(self.owner.into())
    }
}

impl PhaseInfo for HalfTime {
    fn name(&self) -> &'static str {
        "half_time"
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        Some(self.deadline)
    }
}

impl PhaseInfo for Completed {
    fn name(&self) -> &'static str {
        "completed"
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn is_terminal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_serializes_with_tag() {
        let phase: Phase = Active {
            owner: ActiveTurn::TurnB,
            deadline: DateTime::<Utc>::UNIX_EPOCH,
        }
        .into();
        let json = serde_json::to_value(&phase).unwrap();
        assert_eq!(json["phase"], "active");
        assert_eq!(json["owner"], "TurnB");
        let back: Phase = serde_json::from_value(json).unwrap();
        assert_eq!(back, phase);
    }

    #[test]
    fn awaiting_follows_sub_state() {
        let phase: Phase = Placement {
            team: PlacementTurn::TeamB,
            round: PlacementRound::Initial,
            deadline: DateTime::<Utc>::UNIX_EPOCH,
        }
        .into();
        assert_eq!(phase.awaiting(), Some(Side::B));
        assert_eq!(phase.name(), "placement");
        assert!(phase.is_due(DateTime::<Utc>::UNIX_EPOCH));
        assert!(!Phase::default().is_due(Utc::now()));
    }
}
