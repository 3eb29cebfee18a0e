//! Match engine: rules, validation, dice resolution, and the phase state machine.
//!
//! Everything in this module is synchronous and free of I/O. The arena
//! service feeds it events and persists what comes out.

pub mod catalog;
pub mod constants;
pub mod dice;
pub mod entities;
pub mod errors;
pub mod moves;
pub mod policy;
pub mod rating;
pub mod resolution;
pub mod state_machine;
pub mod states;
pub mod validator;

pub use dice::{DiceRolls, DiceSource, ScriptedDice, SeededDice, ThreadDice};
pub use errors::{MatchError, MatchResult};
pub use moves::{Move, Placement};
pub use policy::{
    BonusRedistributionPolicy, CoinTossPolicy, FairCoin, MatchRules, NoRedistribution,
    RulesConfig, TrailingPlayerBoost,
};
pub use resolution::{DuelInput, Resolution, resolve};
pub use state_machine::{Effect, MatchEvent, MatchRecord, MatchSummary, Transition, transition};
pub use states::{Phase, PhaseInfo};
pub use validator::{CheckedAction, validate_move, validate_placement};
