//! Mapping engine errors onto HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kickoff::{MatchError, auth::AuthError, db::StoreError, matchmaking::MatchmakingError};
use serde::{Deserialize, Serialize};

/// Error body returned by every endpoint
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Whether resubmitting the same command may succeed
    #[serde(default)]
    pub retry: bool,
}

/// Any failure a handler can return
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Matchmaking(#[from] MatchmakingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// HTTP status for a match error.
pub fn match_status(err: &MatchError) -> StatusCode {
    match err {
        MatchError::NotYourTurn
        | MatchError::Retry
        | MatchError::SeatTaken
        | MatchError::SelfMatch
        | MatchError::DeadlineNotReached => StatusCode::CONFLICT,
        MatchError::NotSeated => StatusCode::FORBIDDEN,
        MatchError::MatchNotFound(_) => StatusCode::NOT_FOUND,
        MatchError::MatchCompleted(_) => StatusCode::GONE,
        MatchError::ConnectionLost => StatusCode::SERVICE_UNAVAILABLE,
        MatchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Match(err) | ApiError::Matchmaking(MatchmakingError::Match(err)) => {
                match_status(err)
            }
            ApiError::Matchmaking(err) => match err {
                MatchmakingError::TicketNotFound
                | MatchmakingError::InviteNotFound(_)
                | MatchmakingError::DeckNotFound(_) => StatusCode::NOT_FOUND,
                MatchmakingError::AlreadyQueued => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Match(err) | ApiError::Matchmaking(MatchmakingError::Match(err)) => {
                err.code()
            }
            ApiError::Matchmaking(err) => match err {
                MatchmakingError::TicketNotFound => "ticket_not_found",
                MatchmakingError::InviteNotFound(_) => "invite_not_found",
                MatchmakingError::DeckNotFound(_) => "deck_not_found",
                MatchmakingError::AlreadyQueued => "already_queued",
                _ => "internal",
            },
            ApiError::Store(_) => "internal",
            ApiError::Auth(_) => "unauthorized",
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            ApiError::Match(err) => err.client_message(),
            ApiError::Matchmaking(err) => err.client_message(),
            ApiError::Store(err) => err.client_message(),
            ApiError::Auth(err) => err.client_message(),
        }
    }

    fn retry(&self) -> bool {
        matches!(
            self,
            ApiError::Match(MatchError::Retry)
                | ApiError::Matchmaking(MatchmakingError::Match(MatchError::Retry))
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: self.client_message(),
            code: self.code().to_string(),
            retry: self.retry(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
