//! HTTP/WebSocket API for the match server.
//!
//! Clients send intents; the engine validates them, rolls dice, and
//! persists the resulting record. Every authoritative change is also pushed
//! to both seated players on the match's websocket channel.
//!
//! # Modules
//!
//! - [`matchmaking`]: Tickets and friendly invites
//! - [`matches`]: Snapshots, move log, placement and action commands
//! - [`websocket`]: Realtime channel per match
//! - [`middleware`]: Bearer-token authentication for protected endpoints
//! - [`errors`]: Engine errors mapped to HTTP statuses
//!
//! # Endpoints Overview
//!
//! ```text
//! GET    /health                                   - Health check (public)
//! POST   /api/v1/matchmaking/tickets               - Queue for a match
//! DELETE /api/v1/matchmaking/tickets               - Withdraw the ticket
//! POST   /api/v1/matchmaking/invites/{code}        - Join a friendly match
//! GET    /api/v1/matches/{id}                      - Snapshot
//! GET    /api/v1/matches/{id}/moves                - Move log
//! POST   /api/v1/matches/{id}/placements           - Place a card
//! POST   /api/v1/matches/{id}/confirm              - Confirm the line-up
//! POST   /api/v1/matches/{id}/moves                - Take an action
//! POST   /api/v1/matches/{id}/bonus                - Arm a bonus card
//! POST   /api/v1/matches/{id}/forfeit              - Concede
//! GET    /ws/{match_id}?token=<jwt>                - WebSocket
//! ```
//!
//! All `/api/v1` routes require `Authorization: Bearer <token>`. Tokens are
//! issued by the account service; this server only verifies them.
//!
//! # CORS
//!
//! CORS is configured permissively for development. In production, configure
//! appropriate origins, methods, and headers.

pub mod errors;
pub mod matches;
pub mod matchmaking;
pub mod middleware;
pub mod rate_limiter;
pub mod request_id;
pub mod websocket;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use kickoff::{arena::MatchService, auth::TokenVerifier, db::Database};
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tower_http::cors::CorsLayer;

use crate::logging::log_database_operation;

/// Application state shared across all HTTP handlers and WebSocket connections.
///
/// # Fields
///
/// - `service`: Match commands, queries, and matchmaking
/// - `verifier`: Access token verification
/// - `database`: PostgreSQL handle for health checks; `None` with the in-memory store
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MatchService>,
    pub verifier: Arc<TokenVerifier>,
    pub database: Option<Arc<Database>>,
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use ko_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:6969").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    // WebSocket route handles its own auth via query parameter
    let root_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ws/{match_id}", get(websocket::websocket_handler));

    Router::new()
        .merge(root_routes)
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/matchmaking/tickets",
            post(matchmaking::create_ticket).delete(matchmaking::cancel_ticket),
        )
        .route("/matchmaking/invites/{code}", post(matchmaking::join_invite))
        .route("/matches/{match_id}", get(matches::get_match))
        .route(
            "/matches/{match_id}/moves",
            get(matches::list_moves).post(matches::make_move),
        )
        .route("/matches/{match_id}/placements", post(matches::place_card))
        .route("/matches/{match_id}/confirm", post(matches::confirm_placement))
        .route("/matches/{match_id}/bonus", post(matches::play_bonus))
        .route("/matches/{match_id}/forfeit", post(matches::forfeit))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ))
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the store is reachable, `503 Service Unavailable`
/// otherwise.
///
/// ```bash
/// curl http://localhost:6969/health
/// # {"status":"healthy","store":"postgres","database":true,"channels":3,...}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (store, db_healthy) = match &state.database {
        Some(database) => {
            let started = Instant::now();
            let healthy = database.health_check().await.is_ok();
            log_database_operation(
                "health_check",
                "kickoff",
                started.elapsed().as_millis() as u64,
            );
            ("postgres", healthy)
        }
        None => ("memory", true),
    };

    let channels = state.service.hub().channel_count().await;

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "store": store,
        "database": db_healthy,
        "channels": channels,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
