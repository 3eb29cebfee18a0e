//! Structured logging configuration.
//!
//! The engine crate logs through the `log` facade; those records are
//! bridged into the same `tracing` subscriber so one `RUST_LOG` filter
//! governs everything.

use kickoff::game::entities::{MatchId, PlayerId};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// Levels come from `RUST_LOG`, defaulting to `info,sqlx=warn,hyper=warn`.
///
/// # Example
///
/// ```no_run
/// use ko_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log a command applied to (or refused by) a match
///
/// # Arguments
///
/// * `match_id` - Match the command targeted
/// * `player_id` - Issuing player
/// * `command` - Command name
/// * `outcome` - `"ok"` or the error code
/// * `version` - Record version after the command, when it was applied
pub fn log_match_event(
    match_id: MatchId,
    player_id: PlayerId,
    command: &str,
    outcome: &str,
    version: Option<i64>,
) {
    if outcome == "ok" {
        tracing::info!(
            match_id = %match_id,
            player_id = player_id,
            command = command,
            version = version,
            "Match command applied"
        );
    } else {
        tracing::debug!(
            match_id = %match_id,
            player_id = player_id,
            command = command,
            outcome = outcome,
            "Match command rejected"
        );
    }
}

/// Log a refused credential or a throttled client
pub fn log_security_event(event_type: &str, player_id: Option<PlayerId>, message: &str) {
    tracing::warn!(
        event_type = event_type,
        player_id = player_id,
        "SECURITY: {}",
        message
    );
}

/// Log performance metric
///
/// # Arguments
///
/// * `operation` - Operation name
/// * `duration_ms` - Duration in milliseconds
/// * `metadata` - Additional metadata
///
/// # Example
///
/// ```
/// use ko_server::logging::log_performance;
/// use std::time::Instant;
///
/// let start = Instant::now();
/// let duration = start.elapsed().as_millis() as u64;
/// log_performance("make_move", duration, Some("ws"));
/// ```
pub fn log_performance(operation: &str, duration_ms: u64, metadata: Option<&str>) {
    if duration_ms > 1000 {
        tracing::warn!(
            operation = operation,
            duration_ms = duration_ms,
            metadata = metadata,
            "PERFORMANCE: Slow operation"
        );
    } else {
        tracing::debug!(
            operation = operation,
            duration_ms = duration_ms,
            metadata = metadata,
            "Performance metric"
        );
    }
}

/// Log database operation
///
/// # Arguments
///
/// * `operation` - What ran (connect, migrate, health check)
/// * `target` - Database or table it ran against
/// * `duration_ms` - Duration in milliseconds
pub fn log_database_operation(operation: &str, target: &str, duration_ms: u64) {
    tracing::debug!(
        operation = operation,
        target_db = target,
        duration_ms = duration_ms,
        "Database operation"
    );

    if duration_ms > 100 {
        tracing::warn!(
            operation = operation,
            target_db = target,
            duration_ms = duration_ms,
            "Slow database operation detected"
        );
    }
}

/// Log API request/response
///
/// # Arguments
///
/// * `method` - HTTP method
/// * `path` - Request path
/// * `status_code` - Response status code
/// * `duration_ms` - Request duration in milliseconds
/// * `request_id` - Correlation id from the `x-request-id` header
pub fn log_api_request(
    method: &str,
    path: &str,
    status_code: u16,
    duration_ms: u64,
    request_id: &str,
) {
    tracing::info!(
        request_id = request_id,
        http_method = method,
        http_path = path,
        http_status = status_code,
        duration_ms = duration_ms,
        "API request completed"
    );
}
