//! # Kickoff
//!
//! Authoritative match engine for a two-player, turn-based football card game.
//!
//! The server owns every rule: clients send intents, the engine validates
//! them, rolls the dice, advances a pure phase state machine, and persists
//! the result with a compare-and-swap on the record version.
//!
//! ## Architecture
//!
//! A match moves through eight phases:
//!
//! - **Initializing**: record created, not yet visible to matchmaking
//! - **WaitingForPlayers**: one seat filled, open to the allocator
//! - **CoinToss**: decides who places first and kicks off
//! - **Placement**: players alternate placing cards on the ten-cell board
//! - **PlacementLocked**: line-ups fixed, awaiting both confirmations
//! - **Active**: players alternate passes, shots, dribbles, substitutions
//! - **HalfTime**: board reset and bonus redistribution after turn 5
//! - **Completed**: terminal; the result is recorded exactly once
//!
//! ## Core Modules
//!
//! - [`game`]: Entities, validators, dice resolution, and the state machine
//! - [`matchmaking`]: Rating-band allocator and friendly invites
//! - [`arena`]: Command service and deadline poller
//! - [`realtime`]: Channels, scoreboard sync, reconnection, optimistic commands
//! - [`db`]: PostgreSQL and in-memory store adapters
//! - [`auth`]: Bearer token verification
//!
//! ## Example
//!
//! ```
//! use chrono::Utc;
//! use kickoff::game::{
//!     MatchEvent, MatchRules, Phase, transition,
//!     catalog::{starter_bonus_cards, starter_deck},
//!     entities::{MatchMode, PlayerSlot},
//!     state_machine::MatchRecord,
//! };
//!
//! let now = Utc::now();
//! let creator = PlayerSlot::new(1, 1000, starter_deck(), starter_bonus_cards());
//! let record = MatchRecord::new(uuid::Uuid::new_v4(), MatchMode::Quick, creator, now);
//! let opened = transition(&record, MatchEvent::Open, &MatchRules::default(), now).unwrap();
//! assert!(matches!(opened.record.phase, Phase::WaitingForPlayers(_)));
//! ```

/// Match orchestration over the store.
pub mod arena;

/// Bearer token verification.
pub mod auth;

/// Durable store adapters.
pub mod db;

/// Core game logic, entities, and state machine.
pub mod game;

/// Pairing waiting players.
pub mod matchmaking;

/// Realtime propagation of authoritative state.
pub mod realtime;

pub use game::{
    MatchError, MatchEvent, MatchResult, MatchRules, Phase, RulesConfig,
    constants,
    entities::{self, ActionKind, ActionRequest, MatchMode, Side},
    transition,
};
