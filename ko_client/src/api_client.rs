//! HTTP API client for the match server.
//!
//! Access tokens come from the account service; the client only attaches
//! them as `Authorization: Bearer` headers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kickoff::{
    MatchError, MatchResult,
    arena::MatchSnapshot,
    entities::{ActionRequest, MatchMode},
    game::{
        Move,
        entities::{CardId, Cell, DeckId, MatchId},
        state_machine::MatchRecord,
    },
    matchmaking::Allocation,
    realtime::StateFetcher,
};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Error body returned by every endpoint
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub code: String,
    #[serde(default)]
    pub retry: bool,
}

/// A request the server refused
#[derive(Debug, thiserror::Error)]
#[error("{message} ({code}, HTTP {status})")]
pub struct ApiFailure {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub retry: bool,
}

#[derive(Debug, Serialize)]
struct TicketRequest {
    mode: MatchMode,
    deck_ref: Option<DeckId>,
}

#[derive(Debug, Serialize)]
struct InviteRequest {
    deck_ref: Option<DeckId>,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    abandoned_match: Option<MatchId>,
}

#[derive(Debug, Serialize)]
struct PlaceCardRequest {
    card_id: CardId,
    cell: Cell,
}

#[derive(Debug, Serialize)]
struct PlayBonusRequest {
    card_ref: CardId,
}

/// API client for communicating with the match server
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    access_token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            access_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: String) -> Self {
        self.access_token = Some(token);
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Send one request and decode the JSON reply.
    ///
    /// Refusals carry an [`ApiFailure`] so callers can inspect the code.
    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let token = self.access_token.as_ref().context("Not authenticated")?;

        let mut request = self
            .client
            .request(method.clone(), format!("{}/api/v1{}", self.base_url, path))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {method} {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let failure = match response.json::<ApiErrorBody>().await {
                Ok(body) => ApiFailure {
                    status,
                    code: body.code,
                    message: body.error,
                    retry: body.retry,
                },
                Err(_) => ApiFailure {
                    status,
                    code: "unknown".to_string(),
                    message: status.canonical_reason().unwrap_or("error").to_string(),
                    retry: false,
                },
            };
            return Err(failure.into());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {method} {path} response"))
    }

    /// Queue for a match.
    pub async fn request_match(&self, mode: MatchMode, deck_ref: Option<DeckId>) -> Result<Allocation> {
        let request = TicketRequest { mode, deck_ref };
        self.call(Method::POST, "/matchmaking/tickets", Some(&request))
            .await
    }

    /// Withdraw the ticket; returns the waiting match that was abandoned, if any.
    pub async fn cancel_ticket(&self) -> Result<Option<MatchId>> {
        let response: CancelResponse = self
            .call::<(), _>(Method::DELETE, "/matchmaking/tickets", None)
            .await?;
        Ok(response.abandoned_match)
    }

    /// Take the open seat of a friendly match.
    pub async fn join_invite(&self, code: &str, deck_ref: Option<DeckId>) -> Result<Allocation> {
        let request = InviteRequest { deck_ref };
        self.call(
            Method::POST,
            &format!("/matchmaking/invites/{code}"),
            Some(&request),
        )
        .await
    }

    pub async fn get_match(&self, match_id: MatchId) -> Result<MatchSnapshot> {
        self.call::<(), _>(Method::GET, &format!("/matches/{match_id}"), None)
            .await
    }

    pub async fn moves(&self, match_id: MatchId) -> Result<Vec<Move>> {
        self.call::<(), _>(Method::GET, &format!("/matches/{match_id}/moves"), None)
            .await
    }

    pub async fn place_card(&self, match_id: MatchId, card_id: CardId, cell: Cell) -> Result<MatchRecord> {
        let request = PlaceCardRequest { card_id, cell };
        self.call(
            Method::POST,
            &format!("/matches/{match_id}/placements"),
            Some(&request),
        )
        .await
    }

    pub async fn confirm_placement(&self, match_id: MatchId) -> Result<MatchRecord> {
        self.call::<(), _>(Method::POST, &format!("/matches/{match_id}/confirm"), None)
            .await
    }

    pub async fn make_move(&self, match_id: MatchId, action: &ActionRequest) -> Result<MatchRecord> {
        self.call(Method::POST, &format!("/matches/{match_id}/moves"), Some(action))
            .await
    }

    pub async fn play_bonus(&self, match_id: MatchId, card_ref: CardId) -> Result<MatchRecord> {
        let request = PlayBonusRequest { card_ref };
        self.call(
            Method::POST,
            &format!("/matches/{match_id}/bonus"),
            Some(&request),
        )
        .await
    }

    pub async fn forfeit(&self, match_id: MatchId) -> Result<MatchRecord> {
        self.call::<(), _>(Method::POST, &format!("/matches/{match_id}/forfeit"), None)
            .await
    }

    /// Get WebSocket URL for a match
    pub fn websocket_url(&self, match_id: MatchId) -> Result<String> {
        let token = self.access_token.as_ref().context("Not authenticated")?;

        let ws_url = self
            .base_url
            .replace("http://", "ws://")
            .replace("https://", "wss://");
        Ok(format!("{}/ws/{}?token={}", ws_url, match_id, token))
    }
}

/// Map a failed snapshot request onto the engine's error kinds.
fn classify(match_id: MatchId, err: &anyhow::Error) -> MatchError {
    match err.downcast_ref::<ApiFailure>() {
        Some(failure) => match failure.status {
            StatusCode::NOT_FOUND => MatchError::MatchNotFound(match_id),
            StatusCode::GONE => MatchError::MatchCompleted(match_id),
            StatusCode::FORBIDDEN => MatchError::NotSeated,
            _ => MatchError::ConnectionLost,
        },
        None => MatchError::ConnectionLost,
    }
}

#[async_trait]
impl StateFetcher for ApiClient {
    async fn fetch(&self, match_id: MatchId) -> MatchResult<MatchRecord> {
        self.get_match(match_id)
            .await
            .map(|snapshot| snapshot.record)
            .map_err(|e| classify(match_id, &e))
    }
}
