//! A terminal client for the kickoff match server.
//!
//! The client queues for a match (or joins a friendly invite), waits for an
//! opponent, then plays over the match's websocket channel.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use kickoff::{Phase, entities::MatchMode, game::entities::DeckId, matchmaking::Allocation};
use pico_args::Arguments;

use ko_client::{api_client::ApiClient, websocket_client::WebSocketClient};

const HELP: &str = "\
Connect to a kickoff match server

USAGE:
  ko_client [OPTIONS]

OPTIONS:
  --server URL          Server URL  [default: http://localhost:6969]
  --token TOKEN         Access token from the account service [default: env KICKOFF_TOKEN]
  --mode MODE           quick, ranked, or friendly  [default: quick]
  --deck ID             Deck to play with  [default: starter deck]
  --invite CODE         Join a friendly match by invite code
  --match ID            Rejoin a match already in progress

FLAGS:
  -h, --help            Print help information
";

/// How often to check whether an opponent took the open seat
const SEAT_POLL_INTERVAL: Duration = Duration::from_secs(2);

struct Args {
    server_url: String,
    token: Option<String>,
    mode: MatchMode,
    deck: Option<DeckId>,
    invite: Option<String>,
    match_id: Option<uuid::Uuid>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut pargs = Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        server_url: pargs
            .opt_value_from_str("--server")?
            .unwrap_or_else(|| "http://localhost:6969".to_string()),
        token: pargs.opt_value_from_str("--token")?,
        mode: pargs.opt_value_from_str("--mode")?.unwrap_or(MatchMode::Quick),
        deck: pargs.opt_value_from_str("--deck")?,
        invite: pargs.opt_value_from_str("--invite")?,
        match_id: pargs.opt_value_from_str("--match")?,
    };

    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let token = match args.token.or_else(|| std::env::var("KICKOFF_TOKEN").ok()) {
        Some(token) => token,
        None => {
            print!("Access token: ");
            io::stdout().flush()?;
            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            input.trim().to_string()
        }
    };
    let api_client = ApiClient::new(args.server_url).with_token(token);

    let match_id = match (args.match_id, args.invite) {
        (Some(match_id), _) => match_id,
        (None, Some(code)) => {
            println!("Joining invite {}...", code);
            api_client
                .join_invite(&code, args.deck)
                .await
                .context("Failed to join invite")?
                .match_id()
        }
        (None, None) => {
            println!("Queueing for a {} match...", args.mode);
            let allocation = api_client
                .request_match(args.mode, args.deck)
                .await
                .context("Failed to queue")?;
            if let Allocation::Created {
                match_id,
                invite_code,
            } = &allocation
            {
                if let Some(code) = invite_code {
                    println!("Share invite code {} with your opponent.", code);
                }
                wait_for_opponent(&api_client, *match_id).await?;
            }
            allocation.match_id()
        }
    };

    WebSocketClient::new(api_client, match_id)
        .connect_and_play()
        .await?;

    println!("\nDisconnected from match.");
    Ok(())
}

/// Poll the snapshot until the second seat fills or the lobby goes away.
async fn wait_for_opponent(api_client: &ApiClient, match_id: uuid::Uuid) -> Result<()> {
    println!("Waiting for an opponent (Ctrl+C to cancel)...");
    loop {
        let snapshot = api_client
            .get_match(match_id)
            .await
            .context("Failed to poll match")?;
        match snapshot.record.phase {
            Phase::Initializing(_) | Phase::WaitingForPlayers(_) => {}
            Phase::Completed(_) => {
                anyhow::bail!("Match {} was abandoned before it started", match_id)
            }
            _ => return Ok(()),
        }

        tokio::select! {
            _ = tokio::time::sleep(SEAT_POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                let abandoned = api_client.cancel_ticket().await?;
                if abandoned.is_some() {
                    println!("Ticket cancelled.");
                }
                anyhow::bail!("Cancelled while waiting for an opponent");
            }
        }
    }
}
