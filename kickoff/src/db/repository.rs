//! Repository trait definitions for testability and dependency injection.
//!
//! Each trait covers one table family. [`Store`] bundles them so services
//! can hold a single `Arc<dyn Store>`; [`PgStore`] implements everything on
//! PostgreSQL and [`super::memory::InMemoryStore`] backs the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row, types::Json};

use super::{
    errors::{StoreError, StoreResult},
    timeouts::{DEFAULT_TRANSACTION_TIMEOUT, with_default_timeout, with_timeout},
};
use crate::{
    game::{
        Effect, Move, Placement, PhaseInfo,
        entities::{Card, DeckId, MatchId, MatchMode, PlayerId, Side},
        state_machine::{MatchRecord, MatchSummary},
    },
    matchmaking::Ticket,
    realtime::sync::Scoreboard,
};

/// Match records and the conditional writes that serialize transitions
#[async_trait]
pub trait MatchRepository: Send + Sync {
    /// Insert a freshly created match
    async fn insert_match(&self, record: &MatchRecord) -> StoreResult<()>;

    /// Load a match by id
    async fn load_match(&self, id: MatchId) -> StoreResult<Option<MatchRecord>>;

    /// Write `record` only if the stored version still equals `expected_version`
    ///
    /// The log entries and result in `effects` are written in the same
    /// transaction: either the record and all of its effects land, or nothing does.
    ///
    /// # Returns
    ///
    /// * `StoreResult<bool>` - `false` when another writer got there first
    async fn compare_and_swap(
        &self,
        record: &MatchRecord,
        expected_version: i64,
        effects: &[Effect],
    ) -> StoreResult<bool>;

    /// Like `compare_and_swap`, but also requires the second seat to still be empty
    async fn claim_second_seat(
        &self,
        record: &MatchRecord,
        expected_version: i64,
        effects: &[Effect],
    ) -> StoreResult<bool>;

    /// Waiting matches of `mode` whose creator is rated within `[min, max]`,
    /// closest rating first, never created by `exclude`
    async fn find_waiting(
        &self,
        mode: MatchMode,
        min_rating: i32,
        max_rating: i32,
        exclude: PlayerId,
        limit: i64,
    ) -> StoreResult<Vec<MatchRecord>>;

    /// Waiting matches created before `cutoff`
    async fn find_stale_waiting(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<MatchRecord>>;

    /// Waiting friendly match holding this invite code
    async fn find_by_invite(&self, code: &str) -> StoreResult<Option<MatchRecord>>;

    /// Ids of matches whose persisted deadline is at or before `now`
    async fn due_matches(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<MatchId>>;

    /// Open (waiting) match created by `player`, if any
    async fn waiting_match_of(&self, player: PlayerId) -> StoreResult<Option<MatchRecord>>;
}

/// Append-only move and placement logs
///
/// Entries are written by [`MatchRepository::compare_and_swap`]; appending
/// the same (match, turn, sequence) or (match, order) twice is a no-op.
#[async_trait]
pub trait LogRepository: Send + Sync {
    /// Moves in (turn, sequence) order
    async fn moves(&self, match_id: MatchId) -> StoreResult<Vec<Move>>;

    /// Placements in order
    async fn placements(&self, match_id: MatchId) -> StoreResult<Vec<Placement>>;
}

/// Pending matchmaking tickets
#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Create or replace the player's ticket
    async fn upsert_ticket(&self, ticket: &Ticket) -> StoreResult<()>;

    /// Remove the player's ticket, returning whether one existed
    async fn delete_ticket(&self, player: PlayerId) -> StoreResult<bool>;

    async fn ticket(&self, player: PlayerId) -> StoreResult<Option<Ticket>>;
}

/// Results, history, and ratings
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Record a completed match and apply its rating change
    ///
    /// Ratings move by the match's delta on top of whatever the player holds
    /// now, so results of overlapping matches accumulate.
    ///
    /// # Returns
    ///
    /// * `StoreResult<bool>` - `false` if this match already had a result
    async fn record_result(&self, summary: &MatchSummary) -> StoreResult<bool>;

    async fn rating(&self, player: PlayerId) -> StoreResult<Option<i32>>;

    async fn history(&self, match_id: MatchId) -> StoreResult<Option<MatchSummary>>;
}

/// Scoreboard projection maintained by the sync manager
#[async_trait]
pub trait ScoreboardRepository: Send + Sync {
    async fn load_scoreboard(&self, match_id: MatchId) -> StoreResult<Option<Scoreboard>>;

    async fn save_scoreboard(&self, scoreboard: &Scoreboard) -> StoreResult<()>;
}

/// Card catalog and player decks
#[async_trait]
pub trait DeckRepository: Send + Sync {
    /// Cards of `deck_id` if it belongs to `owner`
    async fn load_deck(&self, owner: PlayerId, deck_id: DeckId) -> StoreResult<Option<Vec<Card>>>;
}

/// Everything the services need from storage.
pub trait Store:
    MatchRepository
    + LogRepository
    + TicketRepository
    + ResultRepository
    + ScoreboardRepository
    + DeckRepository
{
}

impl<T> Store for T where
    T: MatchRepository
        + LogRepository
        + TicketRepository
        + ResultRepository
        + ScoreboardRepository
        + DeckRepository
{
}

/// Default PostgreSQL implementation of every repository
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Version-checked update of a match row plus its effects, in one transaction.
    async fn conditional_write(
        &self,
        record: &MatchRecord,
        expected_version: i64,
        require_open_seat: bool,
        effects: &[Effect],
    ) -> StoreResult<bool> {
        let sql = if require_open_seat {
            "UPDATE matches
             SET state = $3, version = $4, phase = $5, player_b_id = $6,
                 deadline_at = $7, updated_at = $8
             WHERE id = $1 AND version = $2 AND player_b_id IS NULL"
        } else {
            "UPDATE matches
             SET state = $3, version = $4, phase = $5, player_b_id = $6,
                 deadline_at = $7, updated_at = $8
             WHERE id = $1 AND version = $2"
        };
        let pool = self.pool.clone();
        let applied = with_timeout(DEFAULT_TRANSACTION_TIMEOUT, async move {
            let mut tx = pool.begin().await?;
            let updated = sqlx::query(sql)
                .bind(record.id)
                .bind(expected_version)
                .bind(Json(record))
                .bind(record.version)
                .bind(record.phase.name())
                .bind(record.player_id(Side::B))
                .bind(record.deadline())
                .bind(record.updated_at)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                == 1;
            if !updated {
                tx.rollback().await?;
                return Ok(false);
            }
            for effect in effects {
                write_effect(&mut tx, effect).await?;
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(true)
        })
        .await?;
        Ok(applied)
    }
}

async fn write_effect(conn: &mut PgConnection, effect: &Effect) -> Result<(), sqlx::Error> {
    match effect {
        Effect::RecordMove(mv) => insert_move(conn, mv).await,
        Effect::RecordPlacement(placement) => insert_placement(conn, placement).await,
        Effect::ApplyResult(summary) => {
            if !insert_result(conn, summary).await? {
                log::warn!("Match {} result already recorded", summary.match_id);
            }
            Ok(())
        }
        Effect::PhaseChanged(_) => Ok(()),
    }
}

async fn insert_move(conn: &mut PgConnection, mv: &Move) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO moves (match_id, turn, sequence, player_id, kind, payload,
                            integrity_hash, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (match_id, turn, sequence) DO NOTHING",
    )
    .bind(mv.match_id)
    .bind(mv.turn as i32)
    .bind(mv.sequence as i32)
    .bind(mv.player_id)
    .bind(mv.kind.to_string())
    .bind(Json(mv))
    .bind(&mv.integrity_hash)
    .bind(mv.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_placement(conn: &mut PgConnection, placement: &Placement) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO placements (match_id, placement_order, player_id, card_id, cell,
                                 substitute, expelled_until_turn, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (match_id, placement_order) DO NOTHING",
    )
    .bind(placement.match_id)
    .bind(placement.placement_order as i32)
    .bind(placement.player_id)
    .bind(placement.card_id)
    .bind(i16::from(placement.cell))
    .bind(placement.substitute)
    .bind(placement.expelled_until_turn.map(|t| t as i32))
    .bind(placement.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// History row plus rating deltas; `false` when the match already had a result.
async fn insert_result(conn: &mut PgConnection, summary: &MatchSummary) -> Result<bool, sqlx::Error> {
    let inserted = sqlx::query(
        "INSERT INTO match_history (match_id, mode, player_a_id, player_b_id, winner,
                                    score_a, score_b, summary, completed_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (match_id) DO NOTHING",
    )
    .bind(summary.match_id)
    .bind(summary.mode.to_string())
    .bind(summary.player_ids[0])
    .bind(summary.player_ids[1])
    .bind(summary.winner.map(|side| side.to_string()))
    .bind(summary.scores[0] as i32)
    .bind(summary.scores[1] as i32)
    .bind(Json(summary))
    .bind(summary.completed_at)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        == 1;

    if inserted && let Some(change) = summary.rating {
        let seats = summary
            .player_ids
            .iter()
            .zip(change.before)
            .zip(change.deltas());
        for ((player, before), delta) in seats {
            let Some(player) = player else { continue };
            // The row may have moved since pairing; only the delta belongs to this match.
            sqlx::query(
                "INSERT INTO player_ratings (player_id, rating, matches_played, updated_at)
                 VALUES ($1, $2 + $3, 1, NOW())
                 ON CONFLICT (player_id) DO UPDATE
                 SET rating = player_ratings.rating + $3,
                     matches_played = player_ratings.matches_played + 1,
                     updated_at = NOW()",
            )
            .bind(*player)
            .bind(before)
            .bind(delta)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(inserted)
}

fn decode_state(row: &sqlx::postgres::PgRow) -> StoreResult<MatchRecord> {
    let Json(record) = row.try_get::<Json<MatchRecord>, _>("state")?;
    Ok(record)
}

#[async_trait]
impl MatchRepository for PgStore {
    async fn insert_match(&self, record: &MatchRecord) -> StoreResult<()> {
        let creator_rating = record.slot(Side::A).map_or(0, |slot| slot.rating);
        with_default_timeout(
            sqlx::query(
                "INSERT INTO matches (id, mode, phase, state, version, player_a_id, player_b_id,
                                      creator_rating, invite_code, deadline_at, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(record.id)
            .bind(record.mode.to_string())
            .bind(record.phase.name())
            .bind(Json(record))
            .bind(record.version)
            .bind(record.player_id(Side::A))
            .bind(record.player_id(Side::B))
            .bind(creator_rating)
            .bind(record.invite_code.as_deref())
            .bind(record.deadline())
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn load_match(&self, id: MatchId) -> StoreResult<Option<MatchRecord>> {
        let row = with_default_timeout(
            sqlx::query("SELECT state FROM matches WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(decode_state).transpose()
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
        let midpoint = (min_rating + max_rating) / 2;
        let rows = with_default_timeout(
            sqlx::query(
                "SELECT state FROM matches
                 WHERE phase = 'waiting_for_players' AND mode = $1
                   AND invite_code IS NULL
                   AND creator_rating BETWEEN $2 AND $3
                   AND player_a_id <> $4
                 ORDER BY ABS(creator_rating - $5), created_at
                 LIMIT $6",
            )
            .bind(mode.to_string())
            .bind(min_rating)
            .bind(max_rating)
            .bind(exclude)
            .bind(midpoint)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(decode_state).collect()
    }

    async fn find_stale_waiting(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<MatchRecord>> {
        let rows = with_default_timeout(
            sqlx::query(
                "SELECT state FROM matches
                 WHERE phase = 'waiting_for_players' AND created_at < $1",
            )
            .bind(cutoff)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(decode_state).collect()
    }

    async fn find_by_invite(&self, code: &str) -> StoreResult<Option<MatchRecord>> {
        let row = with_default_timeout(
            sqlx::query(
                "SELECT state FROM matches
                 WHERE invite_code = $1 AND phase = 'waiting_for_players'",
            )
            .bind(code)
            .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(decode_state).transpose()
    }

    async fn due_matches(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<MatchId>> {
        let rows = with_default_timeout(
            sqlx::query(
                "SELECT id FROM matches
                 WHERE deadline_at IS NOT NULL AND deadline_at <= $1
                 ORDER BY deadline_at
                 LIMIT $2",
            )
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn waiting_match_of(&self, player: PlayerId) -> StoreResult<Option<MatchRecord>> {
        let row = with_default_timeout(
            sqlx::query(
                "SELECT state FROM matches
                 WHERE phase = 'waiting_for_players' AND player_a_id = $1
                 ORDER BY created_at DESC
                 LIMIT 1",
            )
            .bind(player)
            .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(decode_state).transpose()
    }
}

#[async_trait]
impl LogRepository for PgStore {
    async fn moves(&self, match_id: MatchId) -> StoreResult<Vec<Move>> {
        let rows = with_default_timeout(
            sqlx::query("SELECT payload FROM moves WHERE match_id = $1 ORDER BY turn, sequence")
                .bind(match_id)
                .fetch_all(&self.pool),
        )
        .await?;
        rows.iter()
            .map(|r| -> StoreResult<Move> { Ok(r.try_get::<Json<Move>, _>("payload")?.0) })
            .collect()
    }

    async fn placements(&self, match_id: MatchId) -> StoreResult<Vec<Placement>> {
        let rows = with_default_timeout(
            sqlx::query(
                "SELECT p.placement_order, p.player_id, p.card_id, p.cell, p.substitute,
                        p.expelled_until_turn, p.created_at,
                        (p.player_id = m.player_a_id) AS side_a
                 FROM placements p JOIN matches m ON m.id = p.match_id
                 WHERE p.match_id = $1
                 ORDER BY p.placement_order",
            )
            .bind(match_id)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows
            .iter()
            .map(|r| Placement {
                match_id,
                placement_order: r.get::<i32, _>("placement_order") as u32,
                player_id: r.get("player_id"),
                side: if r.get::<bool, _>("side_a") {
                    Side::A
                } else {
                    Side::B
                },
                card_id: r.get("card_id"),
                cell: r.get::<i16, _>("cell") as u8,
                substitute: r.get("substitute"),
                expelled_until_turn: r
                    .get::<Option<i32>, _>("expelled_until_turn")
                    .map(|t| t as u32),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}

#[async_trait]
impl TicketRepository for PgStore {
    async fn upsert_ticket(&self, ticket: &Ticket) -> StoreResult<()> {
        with_default_timeout(
            sqlx::query(
                "INSERT INTO matchmaking_tickets (player_id, rating, mode, deck_id, created_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (player_id) DO UPDATE
                 SET rating = EXCLUDED.rating, mode = EXCLUDED.mode,
                     deck_id = EXCLUDED.deck_id, created_at = EXCLUDED.created_at",
            )
            .bind(ticket.player_id)
            .bind(ticket.rating)
            .bind(ticket.mode.to_string())
            .bind(ticket.deck_id)
            .bind(ticket.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn delete_ticket(&self, player: PlayerId) -> StoreResult<bool> {
        let result = with_default_timeout(
            sqlx::query("DELETE FROM matchmaking_tickets WHERE player_id = $1")
                .bind(player)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ticket(&self, player: PlayerId) -> StoreResult<Option<Ticket>> {
        let row = with_default_timeout(
            sqlx::query(
                "SELECT player_id, rating, mode, deck_id, created_at
                 FROM matchmaking_tickets WHERE player_id = $1",
            )
            .bind(player)
            .fetch_optional(&self.pool),
        )
        .await?;
        row.map(|r| -> StoreResult<Ticket> {
            let mode: String = r.get("mode");
            Ok(Ticket {
                player_id: r.get("player_id"),
                rating: r.get("rating"),
                mode: mode
                    .parse()
                    .map_err(StoreError::InvalidRow)?,
                deck_id: r.get("deck_id"),
                created_at: r.get("created_at"),
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ResultRepository for PgStore {
    async fn record_result(&self, summary: &MatchSummary) -> StoreResult<bool> {
        let pool = self.pool.clone();
        let applied = with_timeout(DEFAULT_TRANSACTION_TIMEOUT, async move {
            let mut tx = pool.begin().await?;
            let inserted = insert_result(&mut tx, summary).await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(inserted)
        })
        .await?;
        Ok(applied)
    }

    async fn rating(&self, player: PlayerId) -> StoreResult<Option<i32>> {
        let row = with_default_timeout(
            sqlx::query("SELECT rating FROM player_ratings WHERE player_id = $1")
                .bind(player)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(|r| r.get("rating")))
    }

    async fn history(&self, match_id: MatchId) -> StoreResult<Option<MatchSummary>> {
        let row = with_default_timeout(
            sqlx::query("SELECT summary FROM match_history WHERE match_id = $1")
                .bind(match_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.map(|r| -> StoreResult<MatchSummary> {
            Ok(r.try_get::<Json<MatchSummary>, _>("summary")?.0)
        })
            .transpose()
    }
}

#[async_trait]
impl ScoreboardRepository for PgStore {
    async fn load_scoreboard(&self, match_id: MatchId) -> StoreResult<Option<Scoreboard>> {
        let row = with_default_timeout(
            sqlx::query("SELECT payload FROM match_scoreboards WHERE match_id = $1")
                .bind(match_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.map(|r| -> StoreResult<Scoreboard> {
            Ok(r.try_get::<Json<Scoreboard>, _>("payload")?.0)
        })
            .transpose()
    }

    async fn save_scoreboard(&self, scoreboard: &Scoreboard) -> StoreResult<()> {
        with_default_timeout(
            sqlx::query(
                "INSERT INTO match_scoreboards (match_id, score_a, score_b, payload, updated_at)
                 VALUES ($1, $2, $3, $4, NOW())
                 ON CONFLICT (match_id) DO UPDATE
                 SET score_a = EXCLUDED.score_a, score_b = EXCLUDED.score_b,
                     payload = EXCLUDED.payload, updated_at = NOW()",
            )
            .bind(scoreboard.match_id)
            .bind(scoreboard.scores[0] as i32)
            .bind(scoreboard.scores[1] as i32)
            .bind(Json(scoreboard))
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DeckRepository for PgStore {
    async fn load_deck(&self, owner: PlayerId, deck_id: DeckId) -> StoreResult<Option<Vec<Card>>> {
        let rows = with_default_timeout(
            sqlx::query(
                "SELECT c.id, c.name, c.role, c.rarity, c.cost, c.shot, c.pass, c.dribble,
                        c.block, c.save
                 FROM decks d JOIN cards c ON c.id = ANY(d.card_ids)
                 WHERE d.id = $1 AND d.owner_id = $2
                 ORDER BY c.id",
            )
            .bind(deck_id)
            .bind(owner)
            .fetch_all(&self.pool),
        )
        .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        rows.iter()
            .map(|r| -> StoreResult<Card> {
                let stat = |name: &str| r.get::<i16, _>(name) as u8;
                Ok(Card {
                    id: r.get("id"),
                    name: r.get("name"),
                    role: serde_json::from_value(serde_json::Value::String(r.get("role")))?,
                    rarity: serde_json::from_value(serde_json::Value::String(r.get("rarity")))?,
                    cost: stat("cost"),
                    stats: crate::game::entities::CardStats {
                        shot: stat("shot"),
                        pass: stat("pass"),
                        dribble: stat("dribble"),
                        block: stat("block"),
                        save: stat("save"),
                    },
                })
            })
            .collect::<StoreResult<Vec<_>>>()
            .map(Some)
    }
}
