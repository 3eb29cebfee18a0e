//! Backoff-driven resume after a dropped connection.
//!
//! The delay schedule is a pure function of the attempt number and a jitter
//! sample so it can be tested without a clock. Each attempt re-fetches the
//! authoritative record rather than replaying the log.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::game::{
    MatchError, MatchResult, MatchRules,
    entities::MatchId,
    state_machine::MatchRecord,
};

/// Exponential backoff parameters.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before `attempt` (0-based): `min(cap, base * 2^attempt)`, scaled
    /// by `jitter` in `[0, 1]` into the upper half of that window.
    ///
    /// Returns `None` once attempts are exhausted.
    #[must_use]
    pub fn delay(&self, attempt: u32, jitter: f64) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let exponential = self
            .base
            .checked_mul(2u32.checked_pow(attempt).unwrap_or(u32::MAX))
            .unwrap_or(self.cap)
            .min(self.cap);
        let jitter = jitter.clamp(0.0, 1.0);
        Some(exponential.mul_f64(0.5 + jitter / 2.0))
    }
}

/// Where a successful resume leaves the client.
#[derive(Clone, Debug, PartialEq)]
pub struct Resumed {
    pub record: MatchRecord,
    /// Time left in the current turn, recomputed from the persisted turn start.
    pub remaining_turn: Option<TimeDelta>,
    pub attempts: u32,
}

/// Fetches authoritative state; the server API on the client side, the
/// store in tests.
#[async_trait]
pub trait StateFetcher: Send + Sync {
    async fn fetch(&self, match_id: MatchId) -> MatchResult<MatchRecord>;
}

/// Drives reconnection attempts for one session.
pub struct ReconnectionHandler<F> {
    fetcher: F,
    policy: BackoffPolicy,
    rules: MatchRules,
}

impl<F: StateFetcher> ReconnectionHandler<F> {
    pub fn new(fetcher: F, policy: BackoffPolicy, rules: MatchRules) -> Self {
        Self {
            fetcher,
            policy,
            rules,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// One attempt: fetch and derive the resume point.
    ///
    /// # Errors
    ///
    /// * `MatchCompleted` - Nothing to resume; callers stop retrying
    /// * anything the fetcher returns
    pub async fn attempt(
        &self,
        match_id: MatchId,
        now: DateTime<Utc>,
    ) -> MatchResult<(MatchRecord, Option<TimeDelta>)> {
        let record = self.fetcher.fetch(match_id).await?;
        if record.is_completed() {
            return Err(MatchError::MatchCompleted(match_id));
        }
        let remaining = record.remaining_turn_time(now, &self.rules);
        Ok((record, remaining))
    }

    /// Retry until an attempt succeeds, a fatal error occurs, or attempts run out.
    ///
    /// # Errors
    ///
    /// * fatal errors from [`Self::attempt`] immediately
    /// * `ConnectionLost` after the last attempt fails
    pub async fn resume(&self, match_id: MatchId) -> MatchResult<Resumed> {
        let mut attempt = 0;
        while let Some(delay) = self.policy.delay(attempt, rand::random::<f64>()) {
            tokio::time::sleep(delay).await;
            attempt += 1;
            match self.attempt(match_id, Utc::now()).await {
                Ok((record, remaining_turn)) => {
                    log::info!("Resumed match {match_id} after {attempt} attempt(s)");
                    return Ok(Resumed {
                        record,
                        remaining_turn,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("Reconnect attempt {attempt} for match {match_id} failed: {e}");
                }
            }
        }
        Err(MatchError::ConnectionLost)
    }
}
