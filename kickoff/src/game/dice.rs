//! Dice sources for the resolution engine.
//!
//! Resolution itself never draws randomness: callers draw a [`DiceRolls`]
//! triple up front and pass it in, which keeps the state machine pure and
//! lets a recorded move be replayed exactly.

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use super::entities::MatchId;

pub const DIE_FACES: u8 = 6;

/// Anything that can produce fair six-sided rolls.
pub trait DiceSource {
    /// A roll in `1..=6`.
    fn roll(&mut self) -> u8;

    fn roll_set(&mut self) -> DiceRolls {
        DiceRolls {
            initial: self.roll(),
            attacker: self.roll(),
            defender: self.roll(),
        }
    }
}

/// The three dice one action may consume. The duel dice are ignored when the
/// initial roll is decisive.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DiceRolls {
    pub initial: u8,
    pub attacker: u8,
    pub defender: u8,
}

impl DiceRolls {
    #[must_use]
    pub const fn new(initial: u8, attacker: u8, defender: u8) -> Self {
        Self {
            initial,
            attacker,
            defender,
        }
    }
}

/// Deterministic dice derived from a match id and a move position, so the
/// server can reproduce any roll it handed out.
#[derive(Debug)]
pub struct SeededDice {
    rng: StdRng,
}

impl SeededDice {
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed from `(match_id, turn, sequence)`.
    #[must_use]
    pub fn for_move(match_id: MatchId, turn: u32, sequence: u32, salt: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(match_id.as_bytes());
        hasher.update(turn.to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        hasher.update(salt.to_be_bytes());
        let digest = hasher.finalize();
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        Self::from_seed(u64::from_be_bytes(seed))
    }
}

impl DiceSource for SeededDice {
    fn roll(&mut self) -> u8 {
        self.rng.random_range(1..=DIE_FACES)
    }
}

/// Fair dice from the thread-local generator.
#[derive(Debug, Default)]
pub struct ThreadDice;

impl DiceSource for ThreadDice {
    fn roll(&mut self) -> u8 {
        rand::rng().random_range(1..=DIE_FACES)
    }
}

/// Plays back a fixed sequence of rolls. Panics when exhausted, which makes
/// a test fail loudly if the engine consumed more dice than scripted.
#[derive(Debug, Default)]
pub struct ScriptedDice {
    rolls: VecDeque<u8>,
}

impl ScriptedDice {
    #[must_use]
    pub fn new(rolls: impl IntoIterator<Item = u8>) -> Self {
        Self {
            rolls: rolls.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rolls.len()
    }
}

impl DiceSource for ScriptedDice {
    #[allow(clippy::expect_used)]
    fn roll(&mut self) -> u8 {
        self.rolls.pop_front().expect("scripted dice exhausted")
    }
}
