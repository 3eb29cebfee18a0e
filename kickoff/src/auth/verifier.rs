//! Bearer-token verification.

use super::{
    errors::{AuthError, AuthResult},
    models::PlayerClaims,
};
use crate::game::entities::PlayerId;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

/// Shortest HMAC secret accepted.
pub const MIN_SECRET_LEN: usize = 32;

/// Verifies access tokens minted by the account service. Tokens are HS256
/// JWTs signed with a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Create a verifier
    ///
    /// # Arguments
    ///
    /// * `secret` - Shared HMAC secret, at least 32 characters
    ///
    /// # Returns
    ///
    /// * `AuthResult<TokenVerifier>` - Verifier or `WeakSecret`
    pub fn new(secret: &str) -> AuthResult<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::WeakSecret(MIN_SECRET_LEN));
        }
        Ok(Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
        })
    }

    /// Verify an access token
    ///
    /// # Arguments
    ///
    /// * `token` - JWT access token
    ///
    /// # Returns
    ///
    /// * `AuthResult<PlayerClaims>` - Decoded claims or error
    pub fn verify(&self, token: &str) -> AuthResult<PlayerClaims> {
        let token_data = decode::<PlayerClaims>(token, &self.decoding, &Validation::default())?;
        Ok(token_data.claims)
    }

    /// Extract and verify the token from an `Authorization` header value.
    pub fn verify_header(&self, header: &str) -> AuthResult<PlayerClaims> {
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }

    /// Mint a token. Used by local tooling and tests; production tokens come
    /// from the account service.
    pub fn issue(&self, player_id: PlayerId, username: &str, ttl: Duration) -> AuthResult<String> {
        let now = Utc::now();
        let claims = PlayerClaims {
            sub: player_id,
            username: username.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}
