//! Stateless deadline poller.
//!
//! Deadlines live in the store, so any process can fire them and a restart
//! loses nothing: each tick asks the store which matches are overdue and
//! sends each one a timeout.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::service::MatchService;
use crate::game::PhaseInfo;

/// Default polling interval
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Overdue matches handled per tick
pub const POLL_BATCH: i64 = 100;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PollReport {
    pub expired: usize,
    pub failed: usize,
    pub abandoned: usize,
}

pub struct DeadlinePoller {
    service: Arc<MatchService>,
    interval: Duration,
    batch: i64,
}

impl DeadlinePoller {
    pub fn new(service: Arc<MatchService>) -> Self {
        Self {
            service,
            interval: POLL_INTERVAL,
            batch: POLL_BATCH,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One pass over overdue matches and stale lobbies.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> PollReport {
        let mut report = PollReport::default();

        let due = match self.service.store().due_matches(now, self.batch).await {
            Ok(due) => due,
            Err(e) => {
                log::error!("Deadline poll failed: {e}");
                return report;
            }
        };

        for match_id in due {
            match self.service.expire(match_id).await {
                Ok(Some(record)) => {
                    report.expired += 1;
                    log::debug!(
                        "Match {match_id}: deadline fired, now in {}",
                        record.phase.name()
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    log::warn!("Match {match_id}: timeout failed: {e}");
                }
            }
        }

        match self.service.allocator().abandon_stale(now).await {
            Ok(abandoned) => report.abandoned = abandoned.len(),
            Err(e) => log::warn!("Stale lobby sweep failed: {e}"),
        }

        report
    }

    /// Poll on every interval tick until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!("Deadline poller started (interval {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Deadline poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::MatchRepository;
    use crate::{
        db::InMemoryStore,
        game::{MatchRules, Phase, RulesConfig, entities::MatchMode},
        matchmaking::MatchmakingConfig,
        realtime::ChannelManager,
    };
    use chrono::TimeDelta;

    #[tokio::test]
    async fn test_coin_toss_resolves_after_deadline() {
        let store = Arc::new(InMemoryStore::new());
        let rules = MatchRules::new(RulesConfig {
            coin_toss_secs: 0,
            ..RulesConfig::default()
        });
        let service = Arc::new(MatchService::new(
            store.clone(),
            Arc::new(ChannelManager::default()),
            Arc::new(rules),
            MatchmakingConfig::default(),
        ));
        let first = service.request_match(1, MatchMode::Quick, None).await.unwrap();
        service.request_match(2, MatchMode::Quick, None).await.unwrap();

        let poller = DeadlinePoller::new(service.clone());
        let report = poller.poll_once(Utc::now()).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.failed, 0);

        let record = store.load_match(first.match_id()).await.unwrap().unwrap();
        assert!(matches!(record.phase, Phase::Placement(_)));
        assert!(record.first_half_starter.is_some());
    }

    #[tokio::test]
    async fn test_nothing_due_before_deadline() {
        let store = Arc::new(InMemoryStore::new());
        let service = Arc::new(MatchService::new(
            store.clone(),
            Arc::new(ChannelManager::default()),
            Arc::new(MatchRules::default()),
            MatchmakingConfig::default(),
        ));
        service.request_match(1, MatchMode::Quick, None).await.unwrap();
        service.request_match(2, MatchMode::Quick, None).await.unwrap();

        let report = DeadlinePoller::new(service).poll_once(Utc::now()).await;
        assert_eq!(report, PollReport::default());
    }

    #[tokio::test]
    async fn test_stale_lobbies_are_swept() {
        let store = Arc::new(InMemoryStore::new());
        let service = Arc::new(MatchService::new(
            store.clone(),
            Arc::new(ChannelManager::default()),
            Arc::new(MatchRules::default()),
            MatchmakingConfig::default(),
        ));
        service.request_match(1, MatchMode::Ranked, None).await.unwrap();

        let poller = DeadlinePoller::new(service);
        let report = poller.poll_once(Utc::now() + TimeDelta::minutes(10)).await;
        assert_eq!(report.abandoned, 1);
    }
}
