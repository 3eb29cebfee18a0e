//! Authentication error types.

use thiserror::Error;

/// Bearer-token verification errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Header missing or not a bearer token
    #[error("Missing bearer token")]
    MissingToken,

    /// JWT token error
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    /// Secret too short to sign with
    #[error("JWT secret must be at least {0} characters")]
    WeakSecret(usize),
}

impl AuthError {
    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// JWT errors are sanitized to prevent information disclosure about the
    /// token structure.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::JwtError(_) => "Authentication failed".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
