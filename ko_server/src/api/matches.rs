//! Match command and query endpoints.
//!
//! Every command returns the authoritative record it produced. Both players
//! also receive the change on the match websocket.

use axum::{
    Json,
    extract::{Extension, Path, State},
};
use kickoff::{
    arena::MatchSnapshot,
    game::{
        Move,
        entities::{ActionRequest, CardId, Cell, MatchId, PlayerId},
        state_machine::MatchRecord,
    },
};
use serde::{Deserialize, Serialize};

use super::{AppState, errors::ApiResult};
use crate::{logging::log_match_event, metrics};

#[derive(Debug, Deserialize, Serialize)]
pub struct PlaceCardRequest {
    pub card_id: CardId,
    pub cell: Cell,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PlayBonusRequest {
    pub card_ref: CardId,
}

/// Record command metrics and the match log line for a finished command.
fn observe(
    match_id: MatchId,
    player_id: PlayerId,
    command: &str,
    result: ApiResult<MatchRecord>,
) -> ApiResult<Json<MatchRecord>> {
    match result {
        Ok(record) => {
            log_match_event(match_id, player_id, command, "ok", Some(record.version));
            metrics::commands_total(command, "ok");
            Ok(Json(record))
        }
        Err(e) => {
            log_match_event(match_id, player_id, command, e.code(), None);
            metrics::commands_total(command, e.code());
            Err(e)
        }
    }
}

/// Full authoritative state plus the remaining turn time.
///
/// # Errors
///
/// - `403 Forbidden`: caller is not seated in the match
/// - `404 Not Found`: unknown match
pub async fn get_match(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Path(match_id): Path<MatchId>,
) -> ApiResult<Json<MatchSnapshot>> {
    Ok(Json(state.service.snapshot(player_id, match_id).await?))
}

/// Append-only move log in turn order.
pub async fn list_moves(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Path(match_id): Path<MatchId>,
) -> ApiResult<Json<Vec<Move>>> {
    Ok(Json(state.service.moves(player_id, match_id).await?))
}

/// Place one card during a placement round.
///
/// # Errors
///
/// - `409 Conflict`: not the caller's placement slot
/// - `422 Unprocessable Entity`: any placement rule violated
pub async fn place_card(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Path(match_id): Path<MatchId>,
    Json(request): Json<PlaceCardRequest>,
) -> ApiResult<Json<MatchRecord>> {
    let result = state
        .service
        .place_card(player_id, match_id, request.card_id, request.cell)
        .await
        .map_err(Into::into);
    observe(match_id, player_id, "place_card", result)
}

pub async fn confirm_placement(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Path(match_id): Path<MatchId>,
) -> ApiResult<Json<MatchRecord>> {
    let result = state
        .service
        .confirm_placement(player_id, match_id)
        .await
        .map_err(Into::into);
    observe(match_id, player_id, "confirm_placement", result)
}

/// Pass, shoot, dribble, or substitute.
///
/// ```json
/// {"kind": "shot", "actor_cell": 7, "target_cell": 10, "card_ref": 102}
/// ```
pub async fn make_move(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Path(match_id): Path<MatchId>,
    Json(action): Json<ActionRequest>,
) -> ApiResult<Json<MatchRecord>> {
    let result = state
        .service
        .make_move(player_id, match_id, action)
        .await
        .map_err(Into::into);
    observe(match_id, player_id, "make_move", result)
}

/// Arm a bonus card for the caller's next action. Does not end the turn.
pub async fn play_bonus(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Path(match_id): Path<MatchId>,
    Json(request): Json<PlayBonusRequest>,
) -> ApiResult<Json<MatchRecord>> {
    let result = state
        .service
        .play_bonus(player_id, match_id, request.card_ref)
        .await
        .map_err(Into::into);
    observe(match_id, player_id, "play_bonus_card", result)
}

pub async fn forfeit(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Path(match_id): Path<MatchId>,
) -> ApiResult<Json<MatchRecord>> {
    let result = state
        .service
        .forfeit(player_id, match_id)
        .await
        .map_err(Into::into);
    observe(match_id, player_id, "forfeit", result)
}
