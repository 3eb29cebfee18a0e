//! Elo rating adjustment applied when a rated match completes.

use serde::{Deserialize, Serialize};

pub const ELO_K: f64 = 32.0;

/// Ratings of both seats before and after a match.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RatingChange {
    pub before: [i32; 2],
    pub after: [i32; 2],
}

impl RatingChange {
    #[must_use]
    pub fn deltas(&self) -> [i32; 2] {
        [
            self.after[0] - self.before[0],
            self.after[1] - self.before[1],
        ]
    }
}

/// Probability that a player rated `rating` beats one rated `opponent`.
#[must_use]
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

/// New ratings given side A's score (1 win, 0.5 draw, 0 loss).
#[must_use]
pub fn adjust(ratings: [i32; 2], score_a: f64) -> RatingChange {
    let [a, b] = ratings;
    let delta_a = (ELO_K * (score_a - expected_score(a, b))).round() as i32;
    RatingChange {
        before: ratings,
        after: [a + delta_a, b - delta_a],
    }
}
