//! Authentication data models.

use serde::{Deserialize, Serialize};

use crate::game::entities::PlayerId;

/// JWT claims carried by access tokens issued by the account service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerClaims {
    pub sub: PlayerId, // Player ID
    pub username: String,
    pub exp: i64, // Expiration timestamp
    pub iat: i64, // Issued at timestamp
}
