//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use kickoff::{
    auth::MIN_SECRET_LEN,
    db::DatabaseConfig,
    game::RulesConfig,
    matchmaking::MatchmakingConfig,
};
use std::{net::SocketAddr, time::Duration};

/// Default bind address
pub const DEFAULT_BIND: &str = "127.0.0.1:6969";

/// Values given on the command line; each one beats its environment variable.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<SocketAddr>,
    pub database_url: Option<String>,
    pub metrics_bind: Option<SocketAddr>,
    /// Run against the in-memory store instead of PostgreSQL
    pub memory: bool,
}

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration; `None` selects the in-memory store
    pub database: Option<DatabaseConfig>,
    /// Shared secret the account service signs access tokens with
    pub jwt_secret: String,
    /// Prometheus scrape address, if metrics are exported
    pub metrics_bind: Option<SocketAddr>,
    /// Match timing and board rules
    pub rules: RulesConfig,
    /// Allocator tuning
    pub matchmaking: MatchmakingConfig,
    /// Deadline poller interval
    pub poll_interval: Duration,
    /// Scoreboard sync interval
    pub sync_interval: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `overrides` - Values parsed from the command line
    ///
    /// # Returns
    ///
    /// * `Result<ServerConfig, ConfigError>` - Loaded configuration or error
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let bind = match overrides.bind {
            Some(bind) => bind,
            None => parse_addr("SERVER_BIND")?.unwrap_or_else(default_bind),
        };

        let database = if overrides.memory || parse_env_or("KICKOFF_MEMORY_STORE", false) {
            None
        } else {
            let database_url = overrides
                .database_url
                .or_else(|| std::env::var("DATABASE_URL").ok())
                .unwrap_or_else(|| DatabaseConfig::development().database_url);
            Some(DatabaseConfig {
                database_url,
                max_connections: parse_env_or("DB_MAX_CONNECTIONS", 20),
                min_connections: parse_env_or("DB_MIN_CONNECTIONS", 2),
                connection_timeout_secs: parse_env_or("DB_CONNECTION_TIMEOUT", 10),
                idle_timeout_secs: parse_env_or("DB_IDLE_TIMEOUT", 600),
                max_lifetime_secs: parse_env_or("DB_MAX_LIFETIME", 1800),
            })
        };

        // Security configuration (REQUIRED)
        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use the account service signing secret".to_string(),
        })?;

        let metrics_bind = match overrides.metrics_bind {
            Some(addr) => Some(addr),
            None => parse_addr("METRICS_BIND")?,
        };

        let defaults = RulesConfig::default();
        let rules = RulesConfig {
            turn_duration_secs: parse_env_or("TURN_DURATION_SECS", defaults.turn_duration_secs),
            placement_slot_secs: parse_env_or("PLACEMENT_SLOT_SECS", defaults.placement_slot_secs),
            half_time_secs: parse_env_or("HALF_TIME_SECS", defaults.half_time_secs),
            ..defaults
        };

        let matchmaking_defaults = MatchmakingConfig::default();
        let matchmaking = MatchmakingConfig {
            primary_band: parse_env_or("MATCHMAKING_BAND", matchmaking_defaults.primary_band),
            widened_band: parse_env_or(
                "MATCHMAKING_WIDENED_BAND",
                matchmaking_defaults.widened_band,
            ),
            stale_after_secs: parse_env_or(
                "MATCHMAKING_STALE_SECS",
                matchmaking_defaults.stale_after_secs,
            ),
            ..matchmaking_defaults
        };

        Ok(ServerConfig {
            bind,
            database,
            jwt_secret,
            metrics_bind,
            rules,
            matchmaking,
            poll_interval: Duration::from_millis(parse_env_or("POLL_INTERVAL_MS", 1000)),
            sync_interval: Duration::from_secs(parse_env_or("SYNC_INTERVAL_SECS", 5)),
        })
    }

    /// Validate configuration after loading
    ///
    /// # Returns
    ///
    /// * `Result<(), ConfigError>` - Success or validation error
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: format!("Must be at least {MIN_SECRET_LEN} characters"),
            });
        }

        if self.rules.turn_duration_secs <= 0 {
            return Err(ConfigError::Invalid {
                var: "TURN_DURATION_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.matchmaking.primary_band <= 0 {
            return Err(ConfigError::Invalid {
                var: "MATCHMAKING_BAND".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.matchmaking.widened_band < self.matchmaking.primary_band {
            return Err(ConfigError::Invalid {
                var: "MATCHMAKING_WIDENED_BAND".to_string(),
                reason: format!(
                    "Must be at least the primary band ({})",
                    self.matchmaking.primary_band
                ),
            });
        }

        if self.poll_interval.is_zero() || self.sync_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_MS / SYNC_INTERVAL_SECS".to_string(),
                reason: "Intervals must be greater than 0".to_string(),
            });
        }

        if let Some(database) = &self.database
            && database.min_connections > database.max_connections
        {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed DB_MAX_CONNECTIONS ({})",
                    database.max_connections
                ),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6969))
}

fn parse_addr(key: &str) -> Result<Option<SocketAddr>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.parse().map(Some).map_err(|_| ConfigError::Invalid {
            var: key.to_string(),
            reason: format!("'{value}' is not an IP:PORT address"),
        }),
        Err(_) => Ok(None),
    }
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            bind: DEFAULT_BIND.parse().unwrap(),
            database: None,
            jwt_secret: "a".repeat(32),
            metrics_bind: None,
            rules: RulesConfig::default(),
            matchmaking: MatchmakingConfig::default(),
            poll_interval: Duration::from_secs(1),
            sync_interval: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use the signing secret".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JWT_SECRET"));
        assert!(msg.contains("signing secret"));
    }

    #[test]
    fn test_default_bind_matches_constant() {
        assert_eq!(default_bind(), DEFAULT_BIND.parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = ServerConfig {
            jwt_secret: "short".to_string(),
            ..config()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == "JWT_SECRET"));
    }

    #[test]
    fn test_widened_band_below_primary_rejected() {
        let mut config = config();
        config.matchmaking.widened_band = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_bounds_checked() {
        let mut database = DatabaseConfig::development();
        database.min_connections = 50;
        let config = ServerConfig {
            database: Some(database),
            ..config()
        };
        assert!(config.validate().is_err());
    }
}
