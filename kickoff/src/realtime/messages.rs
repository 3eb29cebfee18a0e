//! Wire messages exchanged over a match's websocket.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::sync::Scoreboard;
use crate::game::{
    Move, Phase, Placement,
    entities::{ActionRequest, CardId, Cell, MatchId, PlayerId},
    state_machine::MatchRecord,
};

/// Client-assigned id used to match acknowledgements to optimistic commands.
pub type CommandId = u64;

/// A command sent by a client.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    PlaceCard {
        card_id: CardId,
        cell: Cell,
    },
    ConfirmPlacement,
    MakeMove {
        #[serde(flatten)]
        action: ActionRequest,
    },
    PlayBonusCard {
        card_ref: CardId,
    },
    Forfeit,
    /// Full authoritative state, used after a reconnect instead of replaying the log.
    RequestState,
    /// Ephemeral message relayed to the opponent, never persisted.
    Broadcast {
        payload: serde_json::Value,
    },
}

impl ClientCommand {
    /// Commands that go through the state machine.
    #[must_use]
    pub const fn mutates_match(&self) -> bool {
        !matches!(self, Self::RequestState | Self::Broadcast { .. })
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::PlaceCard { .. } => "place_card",
            Self::ConfirmPlacement => "confirm_placement",
            Self::MakeMove { .. } => "make_move",
            Self::PlayBonusCard { .. } => "play_bonus_card",
            Self::Forfeit => "forfeit",
            Self::RequestState => "request_state",
            Self::Broadcast { .. } => "broadcast",
        };
        write!(f, "{repr}")
    }
}

/// What actually travels from client to server.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClientEnvelope {
    #[serde(default)]
    pub command_id: Option<CommandId>,
    #[serde(flatten)]
    pub command: ClientCommand,
}

/// Everything the server pushes to subscribers.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    PhaseTransition {
        match_id: MatchId,
        phase: Phase,
        version: i64,
    },
    MoveResolved {
        #[serde(rename = "move")]
        mv: Move,
    },
    PlacementRecorded {
        placement: Placement,
    },
    PresenceChanged {
        match_id: MatchId,
        player_id: PlayerId,
        online: bool,
    },
    RecordChanged {
        record: Box<MatchRecord>,
    },
    Scoreboard {
        scoreboard: Scoreboard,
    },
    Broadcast {
        match_id: MatchId,
        from: PlayerId,
        payload: serde_json::Value,
    },
    /// Reply to `request_state`.
    State {
        record: Box<MatchRecord>,
        remaining_turn_ms: Option<i64>,
    },
    /// The command was applied; `version` is the record version it produced.
    Ack {
        command_id: CommandId,
        version: i64,
    },
    Rejected {
        command_id: Option<CommandId>,
        code: String,
        message: String,
        retry: bool,
    },
}

impl ServerEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhaseTransition { .. } => "phase_transition",
            Self::MoveResolved { .. } => "move_resolved",
            Self::PlacementRecorded { .. } => "placement_recorded",
            Self::PresenceChanged { .. } => "presence_changed",
            Self::RecordChanged { .. } => "record_changed",
            Self::Scoreboard { .. } => "scoreboard",
            Self::Broadcast { .. } => "broadcast",
            Self::State { .. } => "state",
            Self::Ack { .. } => "ack",
            Self::Rejected { .. } => "rejected",
        }
    }

    /// Record version carried by the event, if it reflects one.
    #[must_use]
    pub fn version(&self) -> Option<i64> {
        match self {
            Self::PhaseTransition { version, .. } | Self::Ack { version, .. } => Some(*version),
            Self::RecordChanged { record } | Self::State { record, .. } => Some(record.version),
            _ => None,
        }
    }
}
