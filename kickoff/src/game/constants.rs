//! Fixed rule constants. `RulesConfig::default()` is built from these.

/// Seconds a player has to submit an action once their turn starts.
pub const TURN_DURATION_SECS: i64 = 45;

/// Seconds a player has to place one card during a placement round.
pub const PLACEMENT_SLOT_SECS: i64 = 20;

/// Shortened slot used by the half-time placement sub-round.
pub const HALF_TIME_PLACEMENT_SLOT_SECS: i64 = 10;

/// Window after both sides placed their cards before play starts.
pub const PLACEMENT_LOCK_SECS: i64 = 5;

pub const HALF_TIME_SECS: i64 = 60;

/// Delay before the server flips the coin once both players are seated.
pub const COIN_TOSS_SECS: i64 = 3;

pub const MAX_TURNS: u32 = 10;

/// Completing this turn sends the match through half time.
pub const HALF_TIME_TURN: u32 = 5;

pub const BOARD_CELLS: u8 = 10;
pub const ZONE_CAPACITY: usize = 3;
pub const DECK_SIZE: usize = 8;

/// Cost points a player may spend on placed cards per round.
pub const CP_BUDGET: u32 = 20;

/// Cards each player must place per placement round.
pub const REQUIRED_PLACEMENTS: u8 = 4;

pub const MAX_SUBSTITUTES: u8 = 3;

/// Turns an expelled card stays out of play.
pub const EXPULSION_TURNS: u32 = 2;

pub const SHOT_RANGE: u8 = 3;
pub const PASS_RANGE: u8 = 3;

/// Every duel total is capped at this value.
pub const MAX_TOTAL: u8 = 6;
