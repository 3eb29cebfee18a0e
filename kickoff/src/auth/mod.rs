//! Bearer-token verification for match commands.
//!
//! Accounts and sessions are owned by a separate service; the engine only
//! checks that a request carries a valid HS256 access token and reads the
//! player id from its `sub` claim.

pub mod errors;
pub mod models;
pub mod verifier;

pub use errors::{AuthError, AuthResult};
pub use models::PlayerClaims;
pub use verifier::{MIN_SECRET_LEN, TokenVerifier};
