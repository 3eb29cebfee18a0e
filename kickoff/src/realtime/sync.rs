//! Periodic reconciliation of the scoreboard projection.
//!
//! Observed changes (scores, token, turn pointer, phase) are batched per
//! match. Every flush applies each batch to the stored scoreboard
//! last-writer-wins per field, persists it, and rebroadcasts. A batch that
//! fails to persist goes back into the pending set.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};

use super::{hub::ChannelManager, messages::ServerEvent};
use crate::{
    db::{StoreResult, repository::Store},
    game::{
        PhaseInfo,
        entities::{Cell, MatchId, Side},
        state_machine::MatchRecord,
    },
};

/// Default flush interval.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// A value with the time it was observed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Stamped<T> {
    pub value: T,
    pub at: DateTime<Utc>,
}

impl<T> Stamped<T> {
    pub fn new(value: T, at: DateTime<Utc>) -> Self {
        Self { value, at }
    }
}

/// Keep whichever observation is newer; ties go to `incoming`.
fn newer<T>(current: Option<Stamped<T>>, incoming: Option<Stamped<T>>) -> Option<Stamped<T>> {
    match (current, incoming) {
        (Some(current), Some(incoming)) if current.at > incoming.at => Some(current),
        (current, None) => current,
        (_, incoming) => incoming,
    }
}

/// Read model clients use for the score header.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Scoreboard {
    pub match_id: MatchId,
    pub scores: [u32; 2],
    pub token: Cell,
    pub turn: u32,
    pub current_turn: Option<Side>,
    pub phase: String,
    pub stamps: FieldStamps,
}

/// When each scoreboard field was last written.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FieldStamps {
    pub scores: Option<DateTime<Utc>>,
    pub token: Option<DateTime<Utc>>,
    pub turn: Option<DateTime<Utc>>,
    pub phase: Option<DateTime<Utc>>,
}

impl Scoreboard {
    #[must_use]
    pub fn new(match_id: MatchId) -> Self {
        Self {
            match_id,
            scores: [0, 0],
            token: 0,
            turn: 0,
            current_turn: None,
            phase: String::new(),
            stamps: FieldStamps::default(),
        }
    }

    /// Apply a batch, field by field, skipping anything older than what is stored.
    ///
    /// # Returns
    ///
    /// * `bool` - Whether any field changed
    pub fn apply(&mut self, batch: &PendingChanges) -> bool {
        fn wins(stored: Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
            stored.is_none_or(|stored| at >= stored)
        }

        let before = self.clone();
        if let Some(scores) = &batch.scores
            && wins(self.stamps.scores, scores.at)
        {
            self.scores = scores.value;
            self.stamps.scores = Some(scores.at);
        }
        if let Some(token) = &batch.token
            && wins(self.stamps.token, token.at)
        {
            self.token = token.value;
            self.stamps.token = Some(token.at);
        }
        if let Some(turn) = &batch.turn
            && wins(self.stamps.turn, turn.at)
        {
            (self.turn, self.current_turn) = turn.value;
            self.stamps.turn = Some(turn.at);
        }
        if let Some(phase) = &batch.phase
            && wins(self.stamps.phase, phase.at)
        {
            self.phase.clone_from(&phase.value);
            self.stamps.phase = Some(phase.at);
        }
        *self != before
    }
}

/// One observed change.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncChange {
    Scores([u32; 2]),
    Token(Cell),
    Turn { turn: u32, current: Option<Side> },
    Phase(String),
}

/// Changes waiting for the next flush, newest observation per field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PendingChanges {
    pub scores: Option<Stamped<[u32; 2]>>,
    pub token: Option<Stamped<Cell>>,
    pub turn: Option<Stamped<(u32, Option<Side>)>>,
    pub phase: Option<Stamped<String>>,
}

impl PendingChanges {
    pub fn observe(&mut self, change: SyncChange, at: DateTime<Utc>) {
        let mut single = Self::default();
        match change {
            SyncChange::Scores(scores) => single.scores = Some(Stamped::new(scores, at)),
            SyncChange::Token(cell) => single.token = Some(Stamped::new(cell, at)),
            SyncChange::Turn { turn, current } => {
                single.turn = Some(Stamped::new((turn, current), at));
            }
            SyncChange::Phase(phase) => single.phase = Some(Stamped::new(phase, at)),
        }
        self.merge(single);
    }

    /// Field-wise last-writer-wins merge.
    pub fn merge(&mut self, other: Self) {
        self.scores = newer(self.scores.take(), other.scores);
        self.token = newer(self.token.take(), other.token);
        self.turn = newer(self.turn.take(), other.turn);
        self.phase = newer(self.phase.take(), other.phase);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_none() && self.token.is_none() && self.turn.is_none() && self.phase.is_none()
    }
}

/// Outcome of one flush.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlushReport {
    pub flushed: usize,
    pub requeued: usize,
}

/// Batches scoreboard changes and reconciles them on an interval.
pub struct SyncManager {
    store: Arc<dyn Store>,
    hub: Arc<ChannelManager>,
    pending: Mutex<HashMap<MatchId, PendingChanges>>,
    interval: Duration,
}

impl SyncManager {
    pub fn new(store: Arc<dyn Store>, hub: Arc<ChannelManager>) -> Self {
        Self::with_interval(store, hub, SYNC_INTERVAL)
    }

    pub fn with_interval(store: Arc<dyn Store>, hub: Arc<ChannelManager>, interval: Duration) -> Self {
        Self {
            store,
            hub,
            pending: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Queue one change for the next flush.
    pub async fn observe(&self, match_id: MatchId, change: SyncChange, at: DateTime<Utc>) {
        self.pending
            .lock()
            .await
            .entry(match_id)
            .or_default()
            .observe(change, at);
    }

    /// Queue every scoreboard field of a freshly persisted record.
    pub async fn observe_record(&self, record: &MatchRecord) {
        let at = record.updated_at;
        let mut batch = PendingChanges::default();
        batch.observe(SyncChange::Scores(record.scores), at);
        batch.observe(SyncChange::Token(record.token), at);
        batch.observe(
            SyncChange::Turn {
                turn: record.turn,
                current: record.current_turn,
            },
            at,
        );
        batch.observe(SyncChange::Phase(record.phase.name().to_string()), at);
        self.pending
            .lock()
            .await
            .entry(record.id)
            .or_default()
            .merge(batch);
    }

    pub async fn pending_matches(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Reconcile every pending batch.
    ///
    /// Failed batches are merged back ahead of anything observed meanwhile:
    /// a newer observation of the same field still wins.
    pub async fn flush(&self) -> FlushReport {
        let batches = std::mem::take(&mut *self.pending.lock().await);
        let mut report = FlushReport::default();

        for (match_id, batch) in batches {
            if batch.is_empty() {
                continue;
            }
            match self.reconcile(match_id, &batch).await {
                Ok(scoreboard) => {
                    report.flushed += 1;
                    self.hub
                        .publish(match_id, ServerEvent::Scoreboard { scoreboard })
                        .await;
                }
                Err(e) => {
                    log::warn!("Scoreboard sync for match {match_id} failed, requeueing: {e}");
                    report.requeued += 1;
                    let mut pending = self.pending.lock().await;
                    let newer = pending.remove(&match_id).unwrap_or_default();
                    let mut restored = batch;
                    restored.merge(newer);
                    pending.insert(match_id, restored);
                }
            }
        }

        if report.flushed + report.requeued > 0 {
            metrics::counter!("sync_flushes_total").increment(report.flushed as u64);
            log::debug!(
                "Sync flush: {} flushed, {} requeued",
                report.flushed,
                report.requeued
            );
        }
        report
    }

    async fn reconcile(&self, match_id: MatchId, batch: &PendingChanges) -> StoreResult<Scoreboard> {
        let mut scoreboard = self
            .store
            .load_scoreboard(match_id)
            .await?
            .unwrap_or_else(|| Scoreboard::new(match_id));
        if scoreboard.apply(batch) {
            self.store.save_scoreboard(&scoreboard).await?;
        }
        Ok(scoreboard)
    }

    /// Flush on every interval tick until `shutdown` flips to `true`,
    /// then flush once more.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        log::info!("Sync manager started (interval {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.flush().await;
        log::info!("Sync manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::ScoreboardRepository;
    use crate::db::memory::InMemoryStore;
    use chrono::TimeDelta;
    use uuid::Uuid;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_last_writer_wins_per_field() {
        let mut board = Scoreboard::new(Uuid::nil());
        let mut first = PendingChanges::default();
        first.observe(SyncChange::Scores([1, 0]), at(10));
        first.observe(SyncChange::Token(6), at(10));
        assert!(board.apply(&first));

        let mut stale = PendingChanges::default();
        stale.observe(SyncChange::Scores([0, 0]), at(5));
        stale.observe(SyncChange::Token(3), at(20));
        assert!(board.apply(&stale));

        assert_eq!(board.scores, [1, 0]);
        assert_eq!(board.token, 3);
    }

    #[test]
    fn test_merge_keeps_newer_observation() {
        let mut old = PendingChanges::default();
        old.observe(SyncChange::Phase("placement".into()), at(1));
        old.observe(SyncChange::Token(5), at(1));

        let mut new = PendingChanges::default();
        new.observe(SyncChange::Phase("active".into()), at(2));

        old.merge(new);
        assert_eq!(old.phase, Some(Stamped::new("active".to_string(), at(2))));
        assert_eq!(old.token, Some(Stamped::new(5, at(1))));
    }

    #[test]
    fn test_apply_same_batch_twice_is_noop() {
        let mut board = Scoreboard::new(Uuid::nil());
        let mut batch = PendingChanges::default();
        batch.observe(SyncChange::Turn { turn: 3, current: Some(Side::B) }, at(7));
        assert!(board.apply(&batch));
        assert!(!board.apply(&batch));
    }

    #[tokio::test]
    async fn test_flush_persists_and_broadcasts() {
        let store = Arc::new(InMemoryStore::new());
        let hub = Arc::new(ChannelManager::default());
        let sync = SyncManager::new(store.clone(), hub.clone());
        let match_id = Uuid::new_v4();
        let mut sub = hub.join(match_id, 1).await;

        sync.observe(match_id, SyncChange::Scores([2, 1]), at(30)).await;
        let report = sync.flush().await;
        assert_eq!(report, FlushReport { flushed: 1, requeued: 0 });

        let stored = store.load_scoreboard(match_id).await.unwrap().unwrap();
        assert_eq!(stored.scores, [2, 1]);
        assert!(matches!(sub.recv().await, Some(ServerEvent::Scoreboard { .. })));
        assert_eq!(sync.pending_matches().await, 0);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_batch() {
        let store = Arc::new(InMemoryStore::new());
        let hub = Arc::new(ChannelManager::default());
        let sync = SyncManager::new(store.clone(), hub);
        let match_id = Uuid::new_v4();

        sync.observe(match_id, SyncChange::Token(7), at(1)).await;
        store.set_unavailable(true);
        assert_eq!(sync.flush().await.requeued, 1);
        assert_eq!(sync.pending_matches().await, 1);

        store.set_unavailable(false);
        assert_eq!(sync.flush().await.flushed, 1);
        let stored = store.load_scoreboard(match_id).await.unwrap().unwrap();
        assert_eq!(stored.token, 7);
    }

    #[tokio::test]
    async fn test_run_flushes_on_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let hub = Arc::new(ChannelManager::default());
        let sync = Arc::new(SyncManager::with_interval(
            store.clone(),
            hub,
            Duration::from_secs(3600),
        ));
        let match_id = Uuid::new_v4();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(sync.clone().run(rx));

        sync.observe(match_id, SyncChange::Token(4), at(1)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(store.load_scoreboard(match_id).await.unwrap().is_some());
    }
}
