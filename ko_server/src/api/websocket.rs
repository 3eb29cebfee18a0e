//! WebSocket handler for a match's realtime channel.
//!
//! # Connection Flow
//!
//! 1. Client connects via `GET /ws/{match_id}?token=<jwt_token>`
//! 2. Server validates the token and that the caller holds a seat
//! 3. Server joins the match channel and sends a `state` event
//! 4. Server spawns a send task that forwards channel events and replies
//! 5. The receive loop applies commands until the socket closes
//!
//! # Client Messages
//!
//! Every message is a [`ClientEnvelope`]: a tagged [`ClientCommand`] plus an
//! optional `command_id`. Mutating commands are acknowledged with
//! `{"type": "ack", "command_id": 7, "version": 12}` when an id was given
//! and refused with a `rejected` event otherwise.
//!
//! # Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:6969/ws/3f1c...?token=eyJhbGc...');
//!
//! ws.send(JSON.stringify({
//!   command_id: 7,
//!   type: "make_move",
//!   kind: "pass",
//!   actor_cell: 4,
//!   target_cell: 7
//! }));
//! ```

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use kickoff::{
    MatchError,
    game::entities::{MatchId, PlayerId},
    realtime::{ClientCommand, ClientEnvelope, ServerEvent},
};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::time::Instant;
use tokio::sync::mpsc;

use super::{AppState, errors::ApiError, rate_limiter::CommandLimiter};
use crate::{
    logging::{log_match_event, log_performance, log_security_event},
    metrics,
};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

/// Upgrade to the match channel.
///
/// # Response
///
/// - `101 Switching Protocols` on success
/// - `401 Unauthorized` for a missing or invalid token
/// - `403 Forbidden` when the caller is not seated
/// - `404 Not Found` for an unknown match
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(match_id): Path<MatchId>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let player_id = match state.verifier.verify(&query.token) {
        Ok(claims) => claims.sub,
        Err(e) => {
            log_security_event("invalid_ws_token", None, "WebSocket token rejected");
            return ApiError::from(e).into_response();
        }
    };

    if let Err(e) = state.service.snapshot(player_id, match_id).await {
        return ApiError::from(e).into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, match_id, player_id, state))
}

/// Drive an established connection until either side closes it.
///
/// # Arguments
///
/// - `socket`: The WebSocket connection
/// - `match_id`: Match the player subscribed to
/// - `player_id`: Authenticated, seated player
/// - `state`: Shared application state
async fn handle_socket(socket: WebSocket, match_id: MatchId, player_id: PlayerId, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let hub = state.service.hub().clone();

    info!("WebSocket connected: match={}, player={}", match_id, player_id);
    metrics::websocket_connected();

    let mut subscription = hub.join(match_id, player_id).await;
    let mut limiter = CommandLimiter::default();

    // Replies to this socket only; channel events go to everyone
    let (response_tx, mut response_rx) = mpsc::channel::<ServerEvent>(32);

    let initial = state_event(&state, player_id, match_id).await;
    if response_tx.send(initial).await.is_err() {
        hub.leave(match_id, player_id).await;
        metrics::websocket_disconnected();
        return;
    }

    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(event) = subscription.recv() => event,
                Some(event) = response_rx.recv() => event,
                else => break,
            };

            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize {} event: {}", event.name(), e);
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
            metrics::websocket_messages_sent();
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                metrics::websocket_messages_received();

                if let Err(throttle) = limiter.admit() {
                    warn!(
                        "{} rate limit exceeded for player {} (match {})",
                        throttle.as_str(),
                        player_id,
                        match_id
                    );
                    metrics::rate_limit_hits_total(throttle.as_str());
                    let rejected = ServerEvent::Rejected {
                        command_id: None,
                        code: "rate_limited".to_string(),
                        message: throttle.message().to_string(),
                        retry: true,
                    };
                    if response_tx.send(rejected).await.is_err() {
                        break;
                    }
                    continue;
                }

                let reply = match serde_json::from_str::<ClientEnvelope>(&text) {
                    Ok(envelope) => handle_envelope(envelope, match_id, player_id, &state).await,
                    Err(e) => {
                        debug!("Failed to parse client message: {}", e);
                        Some(ServerEvent::Rejected {
                            command_id: None,
                            code: "invalid_message".to_string(),
                            message: "Invalid message format".to_string(),
                            retry: false,
                        })
                    }
                };

                if let Some(reply) = reply
                    && response_tx.send(reply).await.is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket closed: match={}, player={}", match_id, player_id);
                break;
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    hub.leave(match_id, player_id).await;
    metrics::websocket_disconnected();

    info!(
        "WebSocket disconnected: match={}, player={}",
        match_id, player_id
    );
}

/// Apply one client command and build the reply for this socket.
///
/// Effects of an applied command reach both players through the channel;
/// the reply only acknowledges it. Returns `None` when nothing is owed.
async fn handle_envelope(
    envelope: ClientEnvelope,
    match_id: MatchId,
    player_id: PlayerId,
    state: &AppState,
) -> Option<ServerEvent> {
    let ClientEnvelope {
        command_id,
        command,
    } = envelope;
    let name = command.to_string();
    let started = Instant::now();

    let service = &state.service;
    let result = match command {
        ClientCommand::RequestState => {
            return Some(state_event(state, player_id, match_id).await);
        }
        ClientCommand::Broadcast { payload } => {
            let event = ServerEvent::Broadcast {
                match_id,
                from: player_id,
                payload,
            };
            service.hub().publish(match_id, event).await;
            return None;
        }
        ClientCommand::PlaceCard { card_id, cell } => {
            service.place_card(player_id, match_id, card_id, cell).await
        }
        ClientCommand::ConfirmPlacement => service.confirm_placement(player_id, match_id).await,
        ClientCommand::MakeMove { action } => service.make_move(player_id, match_id, action).await,
        ClientCommand::PlayBonusCard { card_ref } => {
            service.play_bonus(player_id, match_id, card_ref).await
        }
        ClientCommand::Forfeit => service.forfeit(player_id, match_id).await,
    };

    log_performance(
        &name,
        started.elapsed().as_millis() as u64,
        Some("websocket"),
    );

    match result {
        Ok(record) => {
            log_match_event(match_id, player_id, &name, "ok", Some(record.version));
            metrics::commands_total(&name, "ok");
            command_id.map(|command_id| ServerEvent::Ack {
                command_id,
                version: record.version,
            })
        }
        Err(e) => {
            log_match_event(match_id, player_id, &name, e.code(), None);
            metrics::commands_total(&name, e.code());
            Some(rejection(command_id, &e))
        }
    }
}

fn rejection(command_id: Option<u64>, err: &MatchError) -> ServerEvent {
    ServerEvent::Rejected {
        command_id,
        code: err.code().to_string(),
        message: err.client_message(),
        retry: matches!(err, MatchError::Retry),
    }
}

/// Full authoritative state for this player, or a rejection if it is gone.
async fn state_event(state: &AppState, player_id: PlayerId, match_id: MatchId) -> ServerEvent {
    match state.service.snapshot(player_id, match_id).await {
        Ok(snapshot) => ServerEvent::State {
            record: Box::new(snapshot.record),
            remaining_turn_ms: snapshot.remaining_turn_ms,
        },
        Err(e) => rejection(None, &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_flag_only_for_conflicts() {
        let retry = rejection(Some(3), &MatchError::Retry);
        assert!(matches!(
            retry,
            ServerEvent::Rejected { command_id: Some(3), retry: true, .. }
        ));

        let rule = rejection(None, &MatchError::NotYourTurn);
        assert!(matches!(
            rule,
            ServerEvent::Rejected { retry: false, ref code, .. } if code == "not_your_turn"
        ));
    }
}
