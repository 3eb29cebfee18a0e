//! Command service: the single entry point that mutates matches.
//!
//! Every command is load, transition, conditional write. A lost
//! compare-and-swap is retried once against a fresh read; a second loss
//! surfaces as [`MatchError::Retry`]. Distinct matches never share a lock.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::effects::report_committed;
use crate::{
    db::repository::Store,
    game::{
        DiceRolls, DiceSource, Effect, MatchError, MatchEvent, MatchResult, MatchRules, Move,
        ScriptedDice, SeededDice,
        entities::{ActionKind, ActionRequest, CardId, Cell, DeckId, MatchId, MatchMode, PlayerId},
        state_machine::{MatchRecord, transition},
    },
    matchmaking::{Allocation, Allocator, MatchmakingConfig, MatchmakingResult},
    realtime::{ChannelManager, ServerEvent, SyncManager},
};

/// Attempts per command before giving up with `Retry`.
const MAX_ATTEMPTS: usize = 2;

/// Where the dice for a transition come from.
pub trait RollProvider: Send + Sync {
    fn rolls(&self, record: &MatchRecord) -> DiceRolls;
}

/// Rolls derived from the match id and move position, so re-running a lost
/// compare-and-swap rolls the same dice and any move can be re-derived.
#[derive(Clone, Copy, Debug, Default)]
pub struct SeededRolls {
    pub salt: u64,
}

impl RollProvider for SeededRolls {
    fn rolls(&self, record: &MatchRecord) -> DiceRolls {
        SeededDice::for_move(record.id, record.turn, record.sequence, self.salt).roll_set()
    }
}

/// Pre-recorded rolls for tests and demos.
#[derive(Debug, Default)]
pub struct ScriptedRolls(Mutex<ScriptedDice>);

impl ScriptedRolls {
    pub fn new(rolls: impl IntoIterator<Item = u8>) -> Self {
        Self(Mutex::new(ScriptedDice::new(rolls)))
    }
}

impl RollProvider for ScriptedRolls {
    fn rolls(&self, _record: &MatchRecord) -> DiceRolls {
        match self.0.lock() {
            Ok(mut dice) => dice.roll_set(),
            Err(poisoned) => poisoned.into_inner().roll_set(),
        }
    }
}

/// Authoritative state plus the turn clock, as sent after a reconnect.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatchSnapshot {
    pub record: MatchRecord,
    pub remaining_turn_ms: Option<i64>,
    pub server_time: DateTime<Utc>,
}

/// Match command service
pub struct MatchService {
    store: Arc<dyn Store>,
    hub: Arc<ChannelManager>,
    rules: Arc<MatchRules>,
    allocator: Allocator,
    rolls: Arc<dyn RollProvider>,
    sync: Option<Arc<SyncManager>>,
}

impl MatchService {
    /// Create a new match service
    ///
    /// # Arguments
    ///
    /// * `store` - Durable store
    /// * `hub` - Channel manager used for rebroadcasts
    /// * `rules` - Timing and rule policies
    /// * `matchmaking` - Allocator tuning
    pub fn new(
        store: Arc<dyn Store>,
        hub: Arc<ChannelManager>,
        rules: Arc<MatchRules>,
        matchmaking: MatchmakingConfig,
    ) -> Self {
        let allocator = Allocator::new(store.clone(), rules.clone(), matchmaking);
        Self {
            store,
            hub,
            rules,
            allocator,
            rolls: Arc::new(SeededRolls::default()),
            sync: None,
        }
    }

    #[must_use]
    pub fn with_rolls(mut self, rolls: Arc<dyn RollProvider>) -> Self {
        self.rolls = rolls;
        self
    }

    #[must_use]
    pub fn with_sync(mut self, sync: Arc<SyncManager>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn rules(&self) -> &MatchRules {
        &self.rules
    }

    pub fn hub(&self) -> &Arc<ChannelManager> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    // Matchmaking

    /// Queue a player and pair them if possible.
    pub async fn request_match(
        &self,
        player_id: PlayerId,
        mode: MatchMode,
        deck_id: Option<DeckId>,
    ) -> MatchmakingResult<Allocation> {
        let (allocation, record) = self
            .allocator
            .request(player_id, mode, deck_id, Utc::now())
            .await?;
        if matches!(allocation, Allocation::Joined { .. }) {
            self.announce_join(&record).await;
        }
        Ok(allocation)
    }

    pub async fn join_by_invite(
        &self,
        player_id: PlayerId,
        code: &str,
        deck_id: Option<DeckId>,
    ) -> MatchmakingResult<Allocation> {
        let (allocation, record) = self
            .allocator
            .join_by_invite(player_id, code, deck_id, Utc::now())
            .await?;
        self.announce_join(&record).await;
        Ok(allocation)
    }

    /// Withdraw a player's ticket; returns the abandoned match, if any.
    pub async fn cancel_ticket(&self, player_id: PlayerId) -> MatchmakingResult<Option<MatchId>> {
        let abandoned = self.allocator.cancel(player_id, Utc::now()).await?;
        if let Some(record) = &abandoned {
            self.publish(record, &[Effect::PhaseChanged(record.phase.clone())])
                .await;
        }
        Ok(abandoned.map(|r| r.id))
    }

    async fn announce_join(&self, record: &MatchRecord) {
        self.publish(record, &[Effect::PhaseChanged(record.phase.clone())])
            .await;
    }

    // Queries

    /// Full authoritative state for a seated player.
    pub async fn snapshot(&self, player_id: PlayerId, match_id: MatchId) -> MatchResult<MatchSnapshot> {
        let record = self.load(match_id).await?;
        if record.side_of(player_id).is_none() {
            return Err(MatchError::NotSeated);
        }
        let now = Utc::now();
        let remaining_turn_ms = record
            .remaining_turn_time(now, &self.rules)
            .map(|left| left.num_milliseconds());
        Ok(MatchSnapshot {
            record,
            remaining_turn_ms,
            server_time: now,
        })
    }

    pub async fn moves(&self, player_id: PlayerId, match_id: MatchId) -> MatchResult<Vec<Move>> {
        let record = self.load(match_id).await?;
        if record.side_of(player_id).is_none() {
            return Err(MatchError::NotSeated);
        }
        Ok(self.store.moves(match_id).await?)
    }

    // Commands

    pub async fn place_card(
        &self,
        player: PlayerId,
        match_id: MatchId,
        card_id: CardId,
        cell: Cell,
    ) -> MatchResult<MatchRecord> {
        self.execute(match_id, |_| MatchEvent::PlaceCard {
            player,
            card_id,
            cell,
        })
        .await
    }

    pub async fn confirm_placement(&self, player: PlayerId, match_id: MatchId) -> MatchResult<MatchRecord> {
        self.execute(match_id, |_| MatchEvent::ConfirmPlacement { player })
            .await
    }

    pub async fn make_move(
        &self,
        player: PlayerId,
        match_id: MatchId,
        action: ActionRequest,
    ) -> MatchResult<MatchRecord> {
        let rolls = self.rolls.clone();
        self.execute(match_id, move |record| MatchEvent::Act {
            player,
            action: action.clone(),
            rolls: rolls.rolls(record),
        })
        .await
    }

    pub async fn play_bonus(
        &self,
        player: PlayerId,
        match_id: MatchId,
        card_ref: CardId,
    ) -> MatchResult<MatchRecord> {
        self.execute(match_id, |record| MatchEvent::Act {
            player,
            action: ActionRequest::new(ActionKind::PlayBonus, record.token, None).with_card(card_ref),
            rolls: DiceRolls::new(1, 1, 1),
        })
        .await
    }

    pub async fn forfeit(&self, player: PlayerId, match_id: MatchId) -> MatchResult<MatchRecord> {
        self.execute(match_id, |_| MatchEvent::Forfeit { player }).await
    }

    /// Fire the phase deadline of a match if it has passed.
    ///
    /// # Returns
    ///
    /// * `MatchResult<Option<MatchRecord>>` - `None` when nothing was due
    pub async fn expire(&self, match_id: MatchId) -> MatchResult<Option<MatchRecord>> {
        let rolls = self.rolls.clone();
        match self
            .execute(match_id, move |record| MatchEvent::Timeout {
                rolls: rolls.rolls(record),
            })
            .await
        {
            Ok(record) => {
                metrics::counter!("timeouts_fired_total").increment(1);
                Ok(Some(record))
            }
            Err(MatchError::DeadlineNotReached | MatchError::MatchCompleted(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn load(&self, match_id: MatchId) -> MatchResult<MatchRecord> {
        self.store
            .load_match(match_id)
            .await?
            .ok_or(MatchError::MatchNotFound(match_id))
    }

    /// Run one command against the latest record.
    ///
    /// `event` is rebuilt from each fresh read so dice and derived fields
    /// follow the record actually being transitioned.
    async fn execute<F>(&self, match_id: MatchId, event: F) -> MatchResult<MatchRecord>
    where
        F: Fn(&MatchRecord) -> MatchEvent,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let record = self.load(match_id).await?;
            let event = event(&record);
            let name = event.name();
            let next = transition(&record, event, &self.rules, Utc::now())?;

            if self
                .store
                .compare_and_swap(&next.record, record.version, &next.effects)
                .await?
            {
                log::debug!(
                    "Match {match_id}: {name} applied (v{} -> v{})",
                    record.version,
                    next.record.version
                );
                report_committed(match_id, &next.effects);
                self.publish(&next.record, &next.effects).await;
                return Ok(next.record);
            }

            metrics::counter!("cas_conflicts_total").increment(1);
            log::warn!("Match {match_id}: {name} lost the version race (attempt {attempt})");
        }
        Err(MatchError::Retry)
    }

    /// Rebroadcast what a committed transition changed.
    async fn publish(&self, record: &MatchRecord, effects: &[Effect]) {
        for effect in effects {
            let event = match effect {
                Effect::RecordMove(mv) => {
                    metrics::counter!("moves_resolved_total").increment(1);
                    ServerEvent::MoveResolved { mv: mv.clone() }
                }
                Effect::RecordPlacement(placement) => ServerEvent::PlacementRecorded {
                    placement: placement.clone(),
                },
                Effect::PhaseChanged(phase) => ServerEvent::PhaseTransition {
                    match_id: record.id,
                    phase: phase.clone(),
                    version: record.version,
                },
                Effect::ApplyResult(_) => continue,
            };
            self.hub.publish(record.id, event).await;
        }
        self.hub
            .publish(
                record.id,
                ServerEvent::RecordChanged {
                    record: Box::new(record.clone()),
                },
            )
            .await;
        if let Some(sync) = &self.sync {
            sync.observe_record(record).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{InMemoryStore, MatchRepository, ResultRepository},
        game::{Phase, entities::Side},
    };

    fn service(store: &Arc<InMemoryStore>) -> MatchService {
        MatchService::new(
            store.clone(),
            Arc::new(ChannelManager::default()),
            Arc::new(MatchRules::default()),
            MatchmakingConfig::default(),
        )
    }

    async fn paired(service: &MatchService) -> MatchId {
        let first = service.request_match(1, MatchMode::Quick, None).await.unwrap();
        service.request_match(2, MatchMode::Quick, None).await.unwrap();
        first.match_id()
    }

    #[tokio::test]
    async fn test_single_conflict_is_retried() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(&store);
        let match_id = paired(&service).await;

        store.inject_conflicts(1);
        let record = service.forfeit(1, match_id).await.unwrap();
        assert!(record.is_completed());
    }

    #[tokio::test]
    async fn test_second_conflict_surfaces_retry() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(&store);
        let match_id = paired(&service).await;

        store.inject_conflicts(2);
        assert_eq!(service.forfeit(1, match_id).await.unwrap_err(), MatchError::Retry);
        let stored = store.load_match(match_id).await.unwrap().unwrap();
        assert!(matches!(stored.phase, Phase::CoinToss(_)));
    }

    #[tokio::test]
    async fn test_unknown_match_is_fatal() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(&store);
        let err = service.forfeit(1, uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_forfeit_records_result_once() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(&store);
        let match_id = paired(&service).await;

        service.forfeit(2, match_id).await.unwrap();
        let err = service.forfeit(1, match_id).await.unwrap_err();
        assert!(matches!(err, MatchError::MatchCompleted(_)));

        let summary = store.history(match_id).await.unwrap().unwrap();
        assert_eq!(summary.winner, Some(Side::A));
        assert!(store.rating(1).await.unwrap().unwrap() > 1000);
    }

    #[tokio::test]
    async fn test_overlapping_matches_both_move_rating() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(&store);
        let first = paired(&service).await;

        // Player 1 is seated in `first` and queues again meanwhile.
        let second = service
            .request_match(1, MatchMode::Quick, None)
            .await
            .unwrap()
            .match_id();
        service.request_match(3, MatchMode::Quick, None).await.unwrap();
        assert_ne!(first, second);

        service.forfeit(2, first).await.unwrap();
        assert_eq!(store.rating(1).await.unwrap(), Some(1016));
        service.forfeit(3, second).await.unwrap();
        assert_eq!(store.rating(1).await.unwrap(), Some(1032));
        assert_eq!(store.rating(2).await.unwrap(), Some(984));
        assert_eq!(store.rating(3).await.unwrap(), Some(984));
    }

    #[tokio::test]
    async fn test_failed_result_write_leaves_match_open() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(&store);
        let match_id = paired(&service).await;

        store.fail_result_writes(1);
        let err = service.forfeit(2, match_id).await.unwrap_err();
        assert!(matches!(err, MatchError::Storage(_)));
        let stored = store.load_match(match_id).await.unwrap().unwrap();
        assert!(!stored.is_completed());
        assert!(store.history(match_id).await.unwrap().is_none());

        // The resubmitted command completes the match and records it once.
        let record = service.forfeit(2, match_id).await.unwrap();
        assert!(record.is_completed());
        let summary = store.history(match_id).await.unwrap().unwrap();
        assert_eq!(summary.winner, Some(Side::A));
        assert_eq!(store.rating(1).await.unwrap(), Some(1016));
    }

    #[tokio::test]
    async fn test_expire_ignores_pending_deadline() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(&store);
        let match_id = paired(&service).await;
        assert_eq!(service.expire(match_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_requires_seat() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(&store);
        let match_id = paired(&service).await;

        assert_eq!(
            service.snapshot(3, match_id).await.unwrap_err(),
            MatchError::NotSeated
        );
        let snapshot = service.snapshot(1, match_id).await.unwrap();
        assert_eq!(snapshot.remaining_turn_ms, None);
    }

    #[tokio::test]
    async fn test_commands_are_broadcast() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(&store);
        let match_id = paired(&service).await;
        let mut sub = service.hub().join(match_id, 2).await;

        service.forfeit(1, match_id).await.unwrap();
        let mut names = Vec::new();
        while names.len() < 2 {
            names.push(sub.recv().await.unwrap().name());
        }
        names.sort_unstable();
        assert_eq!(names, vec!["phase_transition", "record_changed"]);
    }
}
