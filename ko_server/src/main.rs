//! Match server: REST commands, per-match websocket channels, a deadline
//! poller, and the scoreboard sync loop.

use std::{sync::Arc, time::Instant};

use anyhow::{Context, Error};
use kickoff::{
    MatchRules,
    arena::{DeadlinePoller, MatchService},
    auth::TokenVerifier,
    db::{Database, InMemoryStore, Store},
    realtime::{ChannelManager, SyncManager},
};
use ko_server::{
    api,
    config::{CliOverrides, ServerConfig},
    logging::{self, log_database_operation},
    metrics,
};
use log::{info, warn};
use pico_args::Arguments;
use tokio::sync::watch;

const HELP: &str = "\
Run the kickoff match server

USAGE:
  ko_server [OPTIONS]

OPTIONS:
  --bind          IP:PORT  Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:6969]
  --db-url        URL      Database connection string  [default: env DATABASE_URL]
  --metrics-bind  IP:PORT  Prometheus exporter address [default: env METRICS_BIND, disabled]

FLAGS:
  --memory                 Use the in-memory store instead of PostgreSQL
  -h, --help               Print help information

ENVIRONMENT:
  JWT_SECRET               Access token signing secret (required, 32+ chars)
  TURN_DURATION_SECS       Seconds per active turn
  MATCHMAKING_BAND         Rating band for ranked pairing
  (Full list in ko_server::config; a .env file is loaded if present)
";

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let overrides = CliOverrides {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        metrics_bind: pargs.opt_value_from_str("--metrics-bind")?,
        memory: pargs.contains("--memory"),
    };

    logging::init();

    let config = ServerConfig::from_env(overrides)?;
    config.validate()?;
    info!("Starting match server at {}", config.bind);

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(anyhow::Error::msg)?;
        info!("Prometheus metrics exported on {}", addr);
    }

    let (store, database): (Arc<dyn Store>, Option<Arc<Database>>) = match &config.database {
        Some(db_config) => {
            let started = Instant::now();
            let db = Database::new(db_config)
                .await
                .context("Failed to connect to database")?;
            log_database_operation("connect", "kickoff", started.elapsed().as_millis() as u64);

            let started = Instant::now();
            db.migrate().await.context("Failed to run migrations")?;
            log_database_operation("migrate", "kickoff", started.elapsed().as_millis() as u64);

            info!("Database connected successfully");
            (Arc::new(db.store()), Some(Arc::new(db)))
        }
        None => {
            warn!("Using the in-memory store; matches are lost on restart");
            (Arc::new(InMemoryStore::new()), None)
        }
    };

    let hub = Arc::new(ChannelManager::default());
    let rules = Arc::new(MatchRules::new(config.rules.clone()));
    let sync = Arc::new(SyncManager::with_interval(
        store.clone(),
        hub.clone(),
        config.sync_interval,
    ));
    let service = Arc::new(
        MatchService::new(store, hub, rules, config.matchmaking.clone()).with_sync(sync.clone()),
    );
    let verifier = Arc::new(TokenVerifier::new(&config.jwt_secret)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = DeadlinePoller::new(service.clone()).with_interval(config.poll_interval);
    let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));
    let sync_task = tokio::spawn(sync.run(shutdown_rx));

    let app = api::create_router(api::AppState {
        service,
        verifier,
        database: database.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down server...");

    // Final scoreboard flush happens inside the sync loop on shutdown
    let _ = shutdown_tx.send(true);
    if let Err(e) = poller_task.await {
        warn!("Deadline poller ended abnormally: {}", e);
    }
    if let Err(e) = sync_task.await {
        warn!("Sync loop ended abnormally: {}", e);
    }

    if let Some(database) = database.and_then(Arc::into_inner) {
        database.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
