//! Match orchestration: the command service and the deadline poller.

pub mod effects;
pub mod poller;
pub mod service;

pub use poller::{DeadlinePoller, PollReport};
pub use service::{MatchService, MatchSnapshot, RollProvider, ScriptedRolls, SeededRolls};
