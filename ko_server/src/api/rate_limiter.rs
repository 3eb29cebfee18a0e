//! Per-connection command throttling.
//!
//! A websocket session may send at most a short burst of commands per second
//! and a larger number per minute. Both limits are sliding windows over the
//! timestamps of accepted commands.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window limiter
#[derive(Debug)]
pub struct RateLimiter {
    /// Timestamps of accepted requests
    timestamps: VecDeque<Instant>,
    /// Maximum number of requests allowed in the window
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    ///
    /// * `max_requests` - Maximum number of requests allowed in the time window
    /// * `window` - Time window duration
    ///
    /// # Example
    ///
    /// ```
    /// use ko_server::api::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(10, Duration::from_secs(1));
    /// assert_eq!(limiter.remaining(), 10);
    /// ```
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(max_requests),
            max_requests,
            window,
        }
    }

    /// Whether a request at `now` fits, recording it if so.
    pub fn check_at(&mut self, now: Instant) -> bool {
        while let Some(ts) = self.timestamps.front() {
            if now.duration_since(*ts) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        if self.timestamps.len() >= self.max_requests {
            return false;
        }

        self.timestamps.push_back(now);
        true
    }

    /// Check if a request should be allowed right now
    ///
    /// # Example
    ///
    /// ```
    /// # use ko_server::api::rate_limiter::RateLimiter;
    /// # use std::time::Duration;
    /// let mut limiter = RateLimiter::new(5, Duration::from_secs(1));
    ///
    /// for _ in 0..5 {
    ///     assert!(limiter.check());
    /// }
    /// assert!(!limiter.check());
    /// ```
    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    /// Requests still allowed in the current window
    pub fn remaining(&self) -> usize {
        self.max_requests.saturating_sub(self.timestamps.len())
    }
}

/// Which limit a throttled command hit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Throttle {
    Burst,
    Sustained,
}

impl Throttle {
    pub fn as_str(self) -> &'static str {
        match self {
            Throttle::Burst => "burst",
            Throttle::Sustained => "sustained",
        }
    }

    /// Message sent back to the client.
    pub fn message(self) -> &'static str {
        match self {
            Throttle::Burst => "Rate limit exceeded. Please slow down.",
            Throttle::Sustained => "Too many messages. Please wait before sending more.",
        }
    }
}

/// Burst and sustained limits of one websocket session
#[derive(Debug)]
pub struct CommandLimiter {
    burst: RateLimiter,
    sustained: RateLimiter,
}

impl Default for CommandLimiter {
    /// 10 commands per second, 100 per minute
    fn default() -> Self {
        Self::new(
            RateLimiter::new(10, Duration::from_secs(1)),
            RateLimiter::new(100, Duration::from_secs(60)),
        )
    }
}

impl CommandLimiter {
    pub fn new(burst: RateLimiter, sustained: RateLimiter) -> Self {
        Self { burst, sustained }
    }

    /// Admit a command at `now`, or name the limit it hit.
    pub fn admit_at(&mut self, now: Instant) -> Result<(), Throttle> {
        if !self.burst.check_at(now) {
            return Err(Throttle::Burst);
        }
        if !self.sustained.check_at(now) {
            return Err(Throttle::Sustained);
        }
        Ok(())
    }

    pub fn admit(&mut self) -> Result<(), Throttle> {
        self.admit_at(Instant::now())
    }
}
