//! Bearer-token middleware for match endpoints.
//!
//! Validates the `Authorization: Bearer <token>` header with the shared
//! [`TokenVerifier`](kickoff::auth::TokenVerifier) and injects the player id
//! from the token's `sub` claim into request extensions.
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use kickoff::game::entities::PlayerId;
//!
//! async fn protected_handler(Extension(player_id): Extension<PlayerId>) -> String {
//!     format!("Authenticated as player {}", player_id)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use kickoff::auth::AuthError;

use super::{AppState, errors::ApiError};
use crate::logging::log_security_event;

/// Reject requests without a valid access token.
///
/// - **Success**: injects `PlayerId` into request extensions and calls the next handler
/// - **Missing or malformed header**: `401 Unauthorized`
/// - **Invalid or expired token**: `401 Unauthorized`
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let Some(header) = header else {
        return ApiError::Auth(AuthError::MissingToken).into_response();
    };

    match state.verifier.verify_header(header) {
        Ok(claims) => {
            request.extensions_mut().insert(claims.sub);
            next.run(request).await
        }
        Err(e) => {
            log_security_event("invalid_token", None, &e.to_string());
            ApiError::Auth(e).into_response()
        }
    }
}
