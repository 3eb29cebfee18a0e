//! Matchmaking endpoints.
//!
//! ```bash
//! curl -X POST http://localhost:6969/api/v1/matchmaking/tickets \
//!   -H "Authorization: Bearer TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"mode": "ranked", "deck_ref": null}'
//! ```

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use kickoff::{
    entities::MatchMode,
    game::entities::{DeckId, MatchId, PlayerId},
    matchmaking::Allocation,
};
use serde::{Deserialize, Serialize};

use super::{AppState, errors::ApiResult};

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateTicketRequest {
    pub mode: MatchMode,
    /// Deck to play with; the starter deck when absent
    #[serde(default)]
    pub deck_ref: Option<DeckId>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct JoinInviteRequest {
    #[serde(default)]
    pub deck_ref: Option<DeckId>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CancelTicketResponse {
    /// Waiting match abandoned along with the ticket
    pub abandoned_match: Option<MatchId>,
}

/// Queue for a match.
///
/// # Response
///
/// - `200 OK` with `{"outcome": "joined", "match_id": ...}` when an open seat was claimed
/// - `201 Created` with `{"outcome": "created", "match_id": ..., "invite_code": ...}` otherwise
///
/// # Errors
///
/// - `409 Conflict`: already queued or seated in a waiting match
/// - `404 Not Found`: unknown deck
pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Json(request): Json<CreateTicketRequest>,
) -> ApiResult<(StatusCode, Json<Allocation>)> {
    let allocation = state
        .service
        .request_match(player_id, request.mode, request.deck_ref)
        .await?;
    let status = match allocation {
        Allocation::Joined { .. } => StatusCode::OK,
        Allocation::Created { .. } => StatusCode::CREATED,
    };
    Ok((status, Json(allocation)))
}

/// Withdraw the caller's ticket.
///
/// # Errors
///
/// - `404 Not Found`: no ticket and no waiting match
pub async fn cancel_ticket(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
) -> ApiResult<Json<CancelTicketResponse>> {
    let abandoned_match = state.service.cancel_ticket(player_id).await?;
    Ok(Json(CancelTicketResponse { abandoned_match }))
}

/// Take the open seat of a friendly match.
///
/// # Errors
///
/// - `404 Not Found`: unknown or already used code
/// - `409 Conflict`: own match, or the seat was taken first (`retry: true`)
pub async fn join_invite(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Path(code): Path<String>,
    Json(request): Json<JoinInviteRequest>,
) -> ApiResult<Json<Allocation>> {
    let allocation = state
        .service
        .join_by_invite(player_id, &code, request.deck_ref)
        .await?;
    Ok(Json(allocation))
}
