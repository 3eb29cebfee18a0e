//! Matchmaking: tickets, rating bands, and the seat-claiming allocator.

pub mod allocator;
pub mod errors;
pub mod models;

pub use allocator::Allocator;
pub use errors::{MatchmakingError, MatchmakingResult};
pub use models::{Allocation, MatchmakingConfig, Ticket};
