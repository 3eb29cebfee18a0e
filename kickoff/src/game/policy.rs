//! Rule configuration and the pluggable policies for the coin toss and the
//! half-time bonus redistribution.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    constants::{
        COIN_TOSS_SECS, CP_BUDGET, EXPULSION_TURNS, HALF_TIME_PLACEMENT_SLOT_SECS, HALF_TIME_SECS,
        HALF_TIME_TURN, MAX_SUBSTITUTES, MAX_TURNS, PASS_RANGE, PLACEMENT_LOCK_SECS,
        PLACEMENT_SLOT_SECS, REQUIRED_PLACEMENTS, SHOT_RANGE, TURN_DURATION_SECS, ZONE_CAPACITY,
    },
    entities::{BonusCard, BonusScope, CardId, Side},
    state_machine::MatchRecord,
};

/// Tunable rule values. `Default` matches the published game rules.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RulesConfig {
    pub turn_duration_secs: i64,
    pub placement_slot_secs: i64,
    pub half_time_placement_slot_secs: i64,
    pub placement_lock_secs: i64,
    pub half_time_secs: i64,
    pub coin_toss_secs: i64,
    pub max_turns: u32,
    pub half_time_turn: u32,
    pub zone_capacity: usize,
    pub cp_budget: u32,
    pub required_placements: u8,
    pub max_substitutes: u8,
    pub expulsion_turns: u32,
    pub shot_range: u8,
    pub pass_range: u8,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            turn_duration_secs: TURN_DURATION_SECS,
            placement_slot_secs: PLACEMENT_SLOT_SECS,
            half_time_placement_slot_secs: HALF_TIME_PLACEMENT_SLOT_SECS,
            placement_lock_secs: PLACEMENT_LOCK_SECS,
            half_time_secs: HALF_TIME_SECS,
            coin_toss_secs: COIN_TOSS_SECS,
            max_turns: MAX_TURNS,
            half_time_turn: HALF_TIME_TURN,
            zone_capacity: ZONE_CAPACITY,
            cp_budget: CP_BUDGET,
            required_placements: REQUIRED_PLACEMENTS,
            max_substitutes: MAX_SUBSTITUTES,
            expulsion_turns: EXPULSION_TURNS,
            shot_range: SHOT_RANGE,
            pass_range: PASS_RANGE,
        }
    }
}

impl RulesConfig {
    #[must_use]
    pub fn turn_duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.turn_duration_secs)
    }

    #[must_use]
    pub fn placement_slot(&self, second_half: bool) -> TimeDelta {
        if second_half {
            TimeDelta::seconds(self.half_time_placement_slot_secs)
        } else {
            TimeDelta::seconds(self.placement_slot_secs)
        }
    }

    #[must_use]
    pub fn placement_lock(&self) -> TimeDelta {
        TimeDelta::seconds(self.placement_lock_secs)
    }

    #[must_use]
    pub fn half_time(&self) -> TimeDelta {
        TimeDelta::seconds(self.half_time_secs)
    }

    #[must_use]
    pub fn coin_toss(&self) -> TimeDelta {
        TimeDelta::seconds(self.coin_toss_secs)
    }
}

/// Decides who places first and kicks off the first half.
pub trait CoinTossPolicy: Send + Sync + std::fmt::Debug {
    fn winner(&self, die: u8) -> Side;
}

/// Odd die means side A wins the toss.
#[derive(Clone, Copy, Debug, Default)]
pub struct FairCoin;

impl CoinTossPolicy for FairCoin {
    fn winner(&self, die: u8) -> Side {
        if die % 2 == 1 { Side::A } else { Side::B }
    }
}

/// Bonus cards handed out at half time, indexed by side.
pub trait BonusRedistributionPolicy: Send + Sync + std::fmt::Debug {
    fn redistribute(&self, record: &MatchRecord) -> [Vec<BonusCard>; 2];
}

/// Gives the player trailing at half time one extra `+1` bonus usable on
/// any action. A level score hands out nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrailingPlayerBoost;

/// Ids below zero are reserved for cards minted by the engine.
pub const HALF_TIME_BOOST_ID: CardId = -1;

impl BonusRedistributionPolicy for TrailingPlayerBoost {
    fn redistribute(&self, record: &MatchRecord) -> [Vec<BonusCard>; 2] {
        let mut grants = [Vec::new(), Vec::new()];
        let [a, b] = record.scores;
        let trailing = match a.cmp(&b) {
            std::cmp::Ordering::Less => Side::A,
            std::cmp::Ordering::Greater => Side::B,
            std::cmp::Ordering::Equal => return grants,
        };
        grants[trailing.index()].push(BonusCard {
            id: HALF_TIME_BOOST_ID,
            name: "Half-time boost".to_string(),
            scope: BonusScope::Any,
            modifier: 1,
        });
        grants
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoRedistribution;

impl BonusRedistributionPolicy for NoRedistribution {
    fn redistribute(&self, _record: &MatchRecord) -> [Vec<BonusCard>; 2] {
        [Vec::new(), Vec::new()]
    }
}

/// Rule values plus policy hooks, shared by every transition.
#[derive(Clone, Debug)]
pub struct MatchRules {
    pub config: RulesConfig,
    pub coin_toss: Arc<dyn CoinTossPolicy>,
    pub redistribution: Arc<dyn BonusRedistributionPolicy>,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self::new(RulesConfig::default())
    }
}

impl MatchRules {
    #[must_use]
    pub fn new(config: RulesConfig) -> Self {
        Self {
            config,
            coin_toss: Arc::new(FairCoin),
            redistribution: Arc::new(TrailingPlayerBoost),
        }
    }

    #[must_use]
    pub fn with_coin_toss(mut self, policy: impl CoinTossPolicy + 'static) -> Self {
        self.coin_toss = Arc::new(policy);
        self
    }

    #[must_use]
    pub fn with_redistribution(mut self, policy: impl BonusRedistributionPolicy + 'static) -> Self {
        self.redistribution = Arc::new(policy);
        self
    }
}
