//! Pairs waiting players into matches.
//!
//! Allocation runs once per ticket, before the match's first phase:
//!
//! 1. Abandon waiting matches nobody joined within the staleness window
//! 2. Friendly tickets always open a new match with an invite code
//! 3. Otherwise search waiting matches of the same mode within the primary
//!    rating band, then the widened band when the mode allows it
//! 4. Claim the open seat with a conditional write; a lost race moves on
//! 5. With nothing claimed, open a new waiting match

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;

use super::{
    errors::{MatchmakingError, MatchmakingResult},
    models::{Allocation, MatchmakingConfig, Ticket},
};
use crate::{
    arena::effects::report_committed,
    db::{StoreError, repository::Store},
    game::{
        MatchError, MatchEvent, MatchRules,
        catalog::{starter_bonus_cards, starter_deck},
        entities::{DeckId, MatchId, MatchMode, PlayerId, PlayerSlot, Side},
        state_machine::{MatchRecord, transition},
    },
};

const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const INVITE_ATTEMPTS: usize = 3;

/// Matchmaking allocator backed by the shared store.
pub struct Allocator {
    store: Arc<dyn Store>,
    rules: Arc<MatchRules>,
    config: MatchmakingConfig,
}

impl Allocator {
    pub fn new(store: Arc<dyn Store>, rules: Arc<MatchRules>, config: MatchmakingConfig) -> Self {
        Self {
            store,
            rules,
            config,
        }
    }

    pub fn config(&self) -> &MatchmakingConfig {
        &self.config
    }

    /// Find or open a match for a player.
    ///
    /// # Arguments
    ///
    /// * `player_id` - Requesting player
    /// * `mode` - Requested match mode
    /// * `deck_id` - Deck to play with; the starter deck when absent
    /// * `now` - Current time
    ///
    /// # Returns
    ///
    /// * `MatchmakingResult<(Allocation, MatchRecord)>` - Where the player ended
    ///   up and the persisted record of that match
    pub async fn request(
        &self,
        player_id: PlayerId,
        mode: MatchMode,
        deck_id: Option<DeckId>,
        now: DateTime<Utc>,
    ) -> MatchmakingResult<(Allocation, MatchRecord)> {
        if self.store.ticket(player_id).await?.is_some()
            || self.store.waiting_match_of(player_id).await?.is_some()
        {
            return Err(MatchmakingError::AlreadyQueued);
        }

        let slot = self.player_slot(player_id, deck_id).await?;
        let ticket = Ticket {
            player_id,
            rating: slot.rating,
            mode,
            deck_id,
            created_at: now,
        };
        self.store.upsert_ticket(&ticket).await?;

        self.abandon_stale(now).await?;

        if mode == MatchMode::Friendly {
            let record = self.open_match(slot, mode, true, now).await?;
            let allocation = Allocation::Created {
                match_id: record.id,
                invite_code: record.invite_code.clone(),
            };
            return Ok((allocation, record));
        }

        let mut bands = vec![self.config.primary_band];
        if mode.allows_widened_band() {
            bands.push(self.config.widened_band);
        }

        for band in bands {
            let candidates = self
                .store
                .find_waiting(
                    mode,
                    ticket.rating.saturating_sub(band),
                    ticket.rating.saturating_add(band),
                    player_id,
                    self.config.search_limit,
                )
                .await?;
            log::debug!(
                "Player {player_id}: {} waiting {mode} matches within ±{band}",
                candidates.len()
            );

            for candidate in candidates {
                if let Some(record) = self.try_claim(&candidate, &slot, now).await? {
                    self.store.delete_ticket(player_id).await?;
                    log::info!("Player {player_id} joined match {}", record.id);
                    metrics::counter!("matchmaking_pairings_total").increment(1);
                    return Ok((Allocation::Joined { match_id: record.id }, record));
                }
            }
        }

        let record = self.open_match(slot, mode, false, now).await?;
        Ok((
            Allocation::Created {
                match_id: record.id,
                invite_code: None,
            },
            record,
        ))
    }

    /// Join a friendly match by its invite code.
    ///
    /// # Errors
    ///
    /// * `InviteNotFound` - No waiting match holds the code
    /// * `Match(SelfMatch)` - The code belongs to the requester's own match
    /// * `Match(Retry)` - Someone else took the seat first
    pub async fn join_by_invite(
        &self,
        player_id: PlayerId,
        code: &str,
        deck_id: Option<DeckId>,
        now: DateTime<Utc>,
    ) -> MatchmakingResult<(Allocation, MatchRecord)> {
        let code = code.trim().to_ascii_uppercase();
        let candidate = self
            .store
            .find_by_invite(&code)
            .await?
            .ok_or_else(|| MatchmakingError::InviteNotFound(code.clone()))?;
        if candidate.player_id(Side::A) == Some(player_id) {
            return Err(MatchError::SelfMatch.into());
        }

        let slot = self.player_slot(player_id, deck_id).await?;
        match self.try_claim(&candidate, &slot, now).await? {
            Some(record) => {
                log::info!("Player {player_id} joined friendly match {} by invite", record.id);
                Ok((Allocation::Joined { match_id: record.id }, record))
            }
            None => Err(MatchError::Retry.into()),
        }
    }

    /// Withdraw a pending ticket and abandon the player's unclaimed match.
    ///
    /// # Returns
    ///
    /// * `MatchmakingResult<Option<MatchRecord>>` - The abandoned match, if there was one
    pub async fn cancel(
        &self,
        player_id: PlayerId,
        now: DateTime<Utc>,
    ) -> MatchmakingResult<Option<MatchRecord>> {
        let had_ticket = self.store.delete_ticket(player_id).await?;
        let waiting = self.store.waiting_match_of(player_id).await?;

        let abandoned = match waiting {
            Some(record) => self.abandon(&record, now).await?,
            None => None,
        };
        if !had_ticket && abandoned.is_none() {
            return Err(MatchmakingError::TicketNotFound);
        }
        log::info!("Player {player_id} cancelled matchmaking");
        Ok(abandoned)
    }

    /// Abandon every waiting match older than the staleness window.
    ///
    /// # Returns
    ///
    /// * `MatchmakingResult<Vec<MatchId>>` - Matches actually abandoned
    pub async fn abandon_stale(&self, now: DateTime<Utc>) -> MatchmakingResult<Vec<MatchId>> {
        let cutoff = now - self.config.stale_after();
        let mut abandoned = Vec::new();
        for record in self.store.find_stale_waiting(cutoff).await? {
            if let Some(next) = self.abandon(&record, now).await? {
                abandoned.push(next.id);
            }
        }
        if !abandoned.is_empty() {
            log::info!("Abandoned {} stale waiting matches", abandoned.len());
        }
        Ok(abandoned)
    }

    async fn abandon(
        &self,
        record: &MatchRecord,
        now: DateTime<Utc>,
    ) -> MatchmakingResult<Option<MatchRecord>> {
        let next = transition(record, MatchEvent::Abandon, &self.rules, now)?;
        if !self
            .store
            .claim_second_seat(&next.record, record.version, &next.effects)
            .await?
        {
            // Joined or changed meanwhile; it is no longer ours to abandon.
            return Ok(None);
        }
        if let Some(creator) = record.player_id(Side::A) {
            self.store.delete_ticket(creator).await?;
        }
        report_committed(next.record.id, &next.effects);
        Ok(Some(next.record))
    }

    /// Seat `slot` in the candidate's open seat.
    ///
    /// Returns `None` when the conditional write loses or the candidate is
    /// no longer joinable.
    async fn try_claim(
        &self,
        candidate: &MatchRecord,
        slot: &PlayerSlot,
        now: DateTime<Utc>,
    ) -> MatchmakingResult<Option<MatchRecord>> {
        let joined = match transition(
            candidate,
            MatchEvent::Join {
                player: slot.clone(),
            },
            &self.rules,
            now,
        ) {
            Ok(joined) => joined,
            Err(MatchError::SelfMatch) => return Err(MatchError::SelfMatch.into()),
            Err(e) => {
                log::debug!("Match {} not joinable: {e}", candidate.id);
                return Ok(None);
            }
        };

        if !self
            .store
            .claim_second_seat(&joined.record, candidate.version, &joined.effects)
            .await?
        {
            log::debug!("Lost the seat claim on match {}", candidate.id);
            return Ok(None);
        }

        if let Some(creator) = candidate.player_id(Side::A) {
            self.store.delete_ticket(creator).await?;
        }
        Ok(Some(joined.record))
    }

    async fn open_match(
        &self,
        slot: PlayerSlot,
        mode: MatchMode,
        with_invite: bool,
        now: DateTime<Utc>,
    ) -> MatchmakingResult<MatchRecord> {
        let player_id = slot.player_id;
        for _ in 0..INVITE_ATTEMPTS {
            let mut fresh = MatchRecord::new(uuid::Uuid::new_v4(), mode, slot.clone(), now);
            if with_invite {
                fresh = fresh.with_invite_code(self.invite_code());
            }
            let opened = transition(&fresh, MatchEvent::Open, &self.rules, now)?;

            match self.store.insert_match(&opened.record).await {
                Ok(()) => {
                    log::info!("Player {player_id} opened {mode} match {}", opened.record.id);
                    metrics::counter!("matches_created_total").increment(1);
                    return Ok(opened.record);
                }
                Err(StoreError::Duplicate(what)) if with_invite => {
                    log::debug!("Invite collision ({what}), drawing a new code");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Duplicate("invite code".to_string()).into())
    }

    fn invite_code(&self) -> String {
        let mut rng = rand::rng();
        (0..self.config.invite_code_len)
            .map(|_| char::from(INVITE_ALPHABET[rng.random_range(0..INVITE_ALPHABET.len())]))
            .collect()
    }

    async fn player_slot(
        &self,
        player_id: PlayerId,
        deck_id: Option<DeckId>,
    ) -> MatchmakingResult<PlayerSlot> {
        let rating = self
            .store
            .rating(player_id)
            .await?
            .unwrap_or(self.config.default_rating);
        let deck = match deck_id {
            Some(deck_id) => self
                .store
                .load_deck(player_id, deck_id)
                .await?
                .ok_or(MatchmakingError::DeckNotFound(deck_id))?,
            None => starter_deck(),
        };
        Ok(PlayerSlot::new(player_id, rating, deck, starter_bonus_cards()))
    }
}
