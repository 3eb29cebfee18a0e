//! In-process store with the same semantics as [`super::PgStore`].
//!
//! Backs the test suites and the server's `--memory` mode. Hooks let tests
//! provoke failure paths: [`InMemoryStore::inject_conflicts`] makes the next
//! conditional writes lose, [`InMemoryStore::fail_result_writes`] fails the
//! next writes that carry a match result, and [`InMemoryStore::set_unavailable`]
//! fails every call.

use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    errors::{StoreError, StoreResult},
    repository::{
        DeckRepository, LogRepository, MatchRepository, ResultRepository, ScoreboardRepository,
        TicketRepository,
    },
};
use crate::{
    game::{
        Effect, Move, Phase, Placement,
        entities::{Card, DeckId, MatchId, MatchMode, PlayerId, Side},
        state_machine::{MatchRecord, MatchSummary},
    },
    matchmaking::Ticket,
    realtime::sync::Scoreboard,
};

#[derive(Default)]
struct Tables {
    matches: HashMap<MatchId, MatchRecord>,
    moves: HashMap<MatchId, BTreeMap<(u32, u32), Move>>,
    placements: HashMap<MatchId, BTreeMap<u32, Placement>>,
    tickets: HashMap<PlayerId, Ticket>,
    history: HashMap<MatchId, MatchSummary>,
    ratings: HashMap<PlayerId, i32>,
    scoreboards: HashMap<MatchId, Scoreboard>,
    decks: HashMap<DeckId, (PlayerId, Vec<Card>)>,
}

impl Tables {
    fn apply(&mut self, effect: &Effect) {
        match effect {
            Effect::RecordMove(mv) => {
                self.moves
                    .entry(mv.match_id)
                    .or_default()
                    .entry((mv.turn, mv.sequence))
                    .or_insert_with(|| mv.clone());
            }
            Effect::RecordPlacement(placement) => {
                self.placements
                    .entry(placement.match_id)
                    .or_default()
                    .entry(placement.placement_order)
                    .or_insert_with(|| placement.clone());
            }
            Effect::ApplyResult(summary) => {
                if !self.record_result(summary) {
                    log::warn!("Match {} result already recorded", summary.match_id);
                }
            }
            Effect::PhaseChanged(_) => {}
        }
    }

    fn record_result(&mut self, summary: &MatchSummary) -> bool {
        if self.history.contains_key(&summary.match_id) {
            return false;
        }
        if let Some(change) = summary.rating {
            let seats = summary
                .player_ids
                .iter()
                .zip(change.before)
                .zip(change.deltas());
            for ((player, before), delta) in seats {
                if let Some(player) = player {
                    *self.ratings.entry(*player).or_insert(before) += delta;
                }
            }
        }
        self.history.insert(summary.match_id, summary.clone());
        true
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    pending_conflicts: AtomicUsize,
    pending_result_failures: AtomicUsize,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn is_waiting(record: &MatchRecord) -> bool {
    matches!(record.phase, Phase::WaitingForPlayers(_))
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` conditional writes fail as if another writer won.
    pub fn inject_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` conditional writes carrying a match result fail
    /// with [`StoreError::Unavailable`], leaving the record untouched.
    pub fn fail_result_writes(&self, count: usize) {
        self.pending_result_failures.store(count, Ordering::SeqCst);
    }

    /// Fail every call with [`StoreError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn insert_deck(&self, owner: PlayerId, deck_id: DeckId, cards: Vec<Card>) {
        self.tables.write().await.decks.insert(deck_id, (owner, cards));
    }

    pub async fn set_rating(&self, player: PlayerId, rating: i32) {
        self.tables.write().await.ratings.insert(player, rating);
    }

    /// Snapshot of every stored match.
    pub async fn matches(&self) -> Vec<MatchRecord> {
        self.tables.read().await.matches.values().cloned().collect()
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn take_conflict(&self) -> bool {
        take_one(&self.pending_conflicts)
    }

    async fn conditional_write(
        &self,
        record: &MatchRecord,
        expected_version: i64,
        require_open_seat: bool,
        effects: &[Effect],
    ) -> StoreResult<bool> {
        self.check()?;
        if self.take_conflict() {
            return Ok(false);
        }
        let mut tables = self.tables.write().await;
        let Some(stored) = tables.matches.get_mut(&record.id) else {
            return Err(StoreError::MatchNotFound(record.id));
        };
        if stored.version != expected_version {
            return Ok(false);
        }
        if require_open_seat && stored.players[Side::B.index()].is_some() {
            return Ok(false);
        }
        if effects.iter().any(|e| matches!(e, Effect::ApplyResult(_)))
            && take_one(&self.pending_result_failures)
        {
            return Err(StoreError::Unavailable);
        }
        *stored = record.clone();
        for effect in effects {
            tables.apply(effect);
        }
        Ok(true)
    }
}

#[async_trait]
impl MatchRepository for InMemoryStore {
    async fn insert_match(&self, record: &MatchRecord) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if tables.matches.contains_key(&record.id) {
            return Err(StoreError::Duplicate(format!("match {}", record.id)));
        }
        if let Some(code) = &record.invite_code
            && tables
                .matches
                .values()
                .any(|m| m.invite_code.as_ref() == Some(code))
        {
            return Err(StoreError::Duplicate(format!("invite code {code}")));
        }
        tables.matches.insert(record.id, record.clone());
        Ok(())
    }

    async fn load_match(&self, id: MatchId) -> StoreResult<Option<MatchRecord>> {
        self.check()?;
        Ok(self.tables.read().await.matches.get(&id).cloned())
    }

    async fn compare_and_swap(
        &self,
        record: &MatchRecord,
        expected_version: i64,
        effects: &[Effect],
    ) -> StoreResult<bool> {
        self.conditional_write(record, expected_version, false, effects)
            .await
    }

    async fn claim_second_seat(
        &self,
        record: &MatchRecord,
        expected_version: i64,
        effects: &[Effect],
    ) -> StoreResult<bool> {
        self.conditional_write(record, expected_version, true, effects)
            .await
    }

    async fn find_waiting(
        &self,
        mode: MatchMode,
        min_rating: i32,
        max_rating: i32,
        exclude: PlayerId,
        limit: i64,
    ) -> StoreResult<Vec<MatchRecord>> {
        self.check()?;
        let midpoint = (min_rating + max_rating) / 2;
        let tables = self.tables.read().await;
        let mut found: Vec<(i32, MatchRecord)> = tables
            .matches
            .values()
            .filter(|m| is_waiting(m) && m.mode == mode && m.invite_code.is_none())
            .filter_map(|m| {
                let creator = m.slot(Side::A)?;
                (creator.player_id != exclude
                    && (min_rating..=max_rating).contains(&creator.rating))
                .then(|| (creator.rating, m.clone()))
            })
            .collect();
        found.sort_by_key(|(rating, m)| ((rating - midpoint).abs(), m.created_at));
        Ok(found
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(_, m)| m)
            .collect())
    }

    async fn find_stale_waiting(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<MatchRecord>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .matches
            .values()
            .filter(|m| is_waiting(m) && m.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn find_by_invite(&self, code: &str) -> StoreResult<Option<MatchRecord>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .matches
            .values()
            .find(|m| is_waiting(m) && m.invite_code.as_deref() == Some(code))
            .cloned())
    }

    async fn due_matches(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<MatchId>> {
        self.check()?;
        let tables = self.tables.read().await;
        let mut due: Vec<_> = tables
            .matches
            .values()
            .filter_map(|m| m.deadline().filter(|d| *d <= now).map(|d| (d, m.id)))
            .collect();
        due.sort();
        Ok(due
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(_, id)| id)
            .collect())
    }

    async fn waiting_match_of(&self, player: PlayerId) -> StoreResult<Option<MatchRecord>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .matches
            .values()
            .filter(|m| is_waiting(m) && m.player_id(Side::A) == Some(player))
            .max_by_key(|m| m.created_at)
            .cloned())
    }
}

#[async_trait]
impl LogRepository for InMemoryStore {
    async fn moves(&self, match_id: MatchId) -> StoreResult<Vec<Move>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .moves
            .get(&match_id)
            .map(|log| log.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn placements(&self, match_id: MatchId) -> StoreResult<Vec<Placement>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .placements
            .get(&match_id)
            .map(|log| log.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl TicketRepository for InMemoryStore {
    async fn upsert_ticket(&self, ticket: &Ticket) -> StoreResult<()> {
        self.check()?;
        self.tables
            .write()
            .await
            .tickets
            .insert(ticket.player_id, ticket.clone());
        Ok(())
    }

    async fn delete_ticket(&self, player: PlayerId) -> StoreResult<bool> {
        self.check()?;
        Ok(self.tables.write().await.tickets.remove(&player).is_some())
    }

    async fn ticket(&self, player: PlayerId) -> StoreResult<Option<Ticket>> {
        self.check()?;
        Ok(self.tables.read().await.tickets.get(&player).cloned())
    }
}

#[async_trait]
impl ResultRepository for InMemoryStore {
    async fn record_result(&self, summary: &MatchSummary) -> StoreResult<bool> {
        self.check()?;
        Ok(self.tables.write().await.record_result(summary))
    }

    async fn rating(&self, player: PlayerId) -> StoreResult<Option<i32>> {
        self.check()?;
        Ok(self.tables.read().await.ratings.get(&player).copied())
    }

    async fn history(&self, match_id: MatchId) -> StoreResult<Option<MatchSummary>> {
        self.check()?;
        Ok(self.tables.read().await.history.get(&match_id).cloned())
    }
}

#[async_trait]
impl ScoreboardRepository for InMemoryStore {
    async fn load_scoreboard(&self, match_id: MatchId) -> StoreResult<Option<Scoreboard>> {
        self.check()?;
        Ok(self.tables.read().await.scoreboards.get(&match_id).cloned())
    }

    async fn save_scoreboard(&self, scoreboard: &Scoreboard) -> StoreResult<()> {
        self.check()?;
        self.tables
            .write()
            .await
            .scoreboards
            .insert(scoreboard.match_id, scoreboard.clone());
        Ok(())
    }
}

#[async_trait]
impl DeckRepository for InMemoryStore {
    async fn load_deck(&self, owner: PlayerId, deck_id: DeckId) -> StoreResult<Option<Vec<Card>>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .decks
            .get(&deck_id)
            .filter(|(deck_owner, _)| *deck_owner == owner)
            .map(|(_, cards)| cards.clone()))
    }
}
