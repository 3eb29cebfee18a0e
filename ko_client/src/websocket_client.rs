//! WebSocket client for a live match.
//!
//! Commands typed by the player are sent optimistically through a
//! [`CommandTracker`] and settled by the server's `ack`/`rejected` replies.
//! When the socket drops, the [`ReconnectionHandler`] re-fetches the
//! authoritative state with jittered backoff before reconnecting.

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use futures_util::{SinkExt, StreamExt};
use kickoff::{
    MatchError, MatchRules, Phase,
    constants::BOARD_CELLS,
    game::{Move, PhaseInfo, entities::MatchId, state_machine::MatchRecord},
    realtime::{
        BackoffPolicy, ClientEnvelope, CommandStatus, CommandTracker, Reconciliation,
        ReconnectionHandler, ServerEvent,
    },
};
use std::fmt::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};

use crate::{
    api_client::ApiClient,
    commands::{HELP, parse_command},
};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type Input = Lines<BufReader<Stdin>>;

/// How a connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The player quit or closed stdin.
    Quit,
    /// The match reached its final whistle.
    Completed,
    /// The socket dropped underneath us.
    Dropped,
}

/// WebSocket match client
pub struct WebSocketClient {
    api: ApiClient,
    match_id: MatchId,
    policy: BackoffPolicy,
}

impl WebSocketClient {
    /// Create a new WebSocket client
    pub fn new(api: ApiClient, match_id: MatchId) -> Self {
        Self {
            api,
            match_id,
            policy: BackoffPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Connect to the match channel and run the session until the player
    /// quits, the match completes, or reconnection gives up.
    pub async fn connect_and_play(self) -> Result<()> {
        let reconnector =
            ReconnectionHandler::new(self.api.clone(), self.policy, MatchRules::default());
        let mut tracker = CommandTracker::new();
        let mut input = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let ws_url = self.api.websocket_url(self.match_id)?;
            println!("Connecting to match {}...", self.match_id);

            let (ws_stream, _) = connect_async(&ws_url)
                .await
                .context("Failed to connect to WebSocket")?;

            println!("Connected! Type 'help' for commands.\n");

            match run_session(ws_stream, &mut tracker, &mut input).await? {
                SessionEnd::Quit | SessionEnd::Completed => return Ok(()),
                SessionEnd::Dropped => {}
            }

            println!("Connection lost, reconnecting...");
            match reconnector.resume(self.match_id).await {
                Ok(resumed) => {
                    println!("Resumed after {} attempt(s)", resumed.attempts);
                    print!("{}", render_record(&resumed.record, resumed.remaining_turn));
                }
                Err(MatchError::MatchCompleted(_)) => {
                    println!("The match finished while you were away.");
                    return Ok(());
                }
                Err(e) => return Err(e).context("Reconnection failed"),
            }
        }
    }
}

/// Pump stdin commands out and server events in until the session ends.
async fn run_session(
    ws_stream: Socket,
    tracker: &mut CommandTracker,
    input: &mut Input,
) -> Result<SessionEnd> {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line.context("Error reading input")? else {
                    let _ = write.close().await;
                    return Ok(SessionEnd::Quit);
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line {
                    "quit" | "exit" => {
                        println!("Disconnecting...");
                        let _ = write.close().await;
                        return Ok(SessionEnd::Quit);
                    }
                    "help" | "?" => {
                        println!("{HELP}");
                        continue;
                    }
                    _ => {}
                }

                let command = match parse_command(line) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        continue;
                    }
                };
                let envelope = if command.mutates_match() {
                    tracker.submit(command, Utc::now())
                } else {
                    ClientEnvelope { command_id: None, command }
                };

                let json = serde_json::to_string(&envelope)?;
                if write.send(Message::Text(json.into())).await.is_err() {
                    return Ok(SessionEnd::Dropped);
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if let Some(end) = handle_event(tracker, &event) {
                                    let _ = write.close().await;
                                    return Ok(end);
                                }
                            }
                            Err(e) => eprintln!("Failed to parse server event: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Dropped),
                    Some(Err(e)) => {
                        eprintln!("WebSocket error: {}", e);
                        return Ok(SessionEnd::Dropped);
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Reconcile and print one event; returns `Some` when the session should end.
fn handle_event(tracker: &mut CommandTracker, event: &ServerEvent) -> Option<SessionEnd> {
    match tracker.reconcile(event, Utc::now()) {
        Reconciliation::Adopt(record) => {
            let remaining = match event {
                ServerEvent::State {
                    remaining_turn_ms, ..
                } => remaining_turn_ms.map(TimeDelta::milliseconds),
                _ => None,
            };
            print!("{}", render_record(&record, remaining));
            if record.is_completed() {
                return Some(SessionEnd::Completed);
            }
        }
        Reconciliation::Settled(tracked) => match tracked.status {
            CommandStatus::Rejected { message, retry, .. } => {
                let hint = if retry { " (try again)" } else { "" };
                eprintln!("{} refused: {}{}", tracked.command, message, hint);
            }
            CommandStatus::Confirmed { version } => {
                println!("{} confirmed (v{})", tracked.command, version);
            }
            CommandStatus::Optimistic => {}
        },
        Reconciliation::Ignored => {
            if let Some(line) = describe_event(event) {
                println!("{line}");
            }
        }
    }
    tracker.prune();
    None
}

/// One-line summary of events that do not carry a full record.
pub fn describe_event(event: &ServerEvent) -> Option<String> {
    match event {
        ServerEvent::PhaseTransition { phase, .. } => Some(format!("Phase: {}", phase.name())),
        ServerEvent::MoveResolved { mv } => Some(describe_move(mv)),
        ServerEvent::PlacementRecorded { placement } => Some(format!(
            "Team {} placed card {} on cell {}{}",
            placement.side,
            placement.card_id,
            placement.cell,
            if placement.substitute { " (substitute)" } else { "" }
        )),
        ServerEvent::PresenceChanged {
            player_id, online, ..
        } => Some(format!(
            "Player {} is {}",
            player_id,
            if *online { "online" } else { "offline" }
        )),
        ServerEvent::Scoreboard { scoreboard } => Some(format!(
            "Score A {} - {} B (turn {})",
            scoreboard.scores[0], scoreboard.scores[1], scoreboard.turn
        )),
        ServerEvent::Broadcast { from, payload, .. } => {
            let text = payload
                .get("text")
                .and_then(|text| text.as_str())
                .map_or_else(|| payload.to_string(), str::to_string);
            Some(format!("[{from}] {text}"))
        }
        ServerEvent::Rejected {
            command_id: None,
            message,
            ..
        } => Some(format!("Server: {message}")),
        _ => None,
    }
}

fn describe_move(mv: &Move) -> String {
    let mut line = format!("Turn {}: team {} {}", mv.turn, mv.side, mv.kind);
    let _ = write!(line, " from {}", mv.actor_cell);
    if let Some(target) = mv.target_cell {
        let _ = write!(line, " to {}", target);
    }
    match &mv.resolution {
        Some(resolution) => {
            let _ = write!(line, " - rolled {}", resolution.initial_roll);
            if let Some(duel) = &resolution.duel {
                let _ = write!(line, ", duel {}-{}", duel.attacker_total, duel.defender_total);
            }
            let outcome = match (resolution.success, resolution.critical) {
                (true, true) => "critical success",
                (true, false) => "success",
                (false, _) => "failed",
            };
            let _ = write!(line, ": {outcome}");
        }
        None => line.push_str(" (no roll)"),
    }
    if mv.auto {
        line.push_str(" [auto]");
    }
    line
}

/// Scoreboard, phase, clock, and the ten cells.
pub fn render_record(record: &MatchRecord, remaining: Option<TimeDelta>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", "═".repeat(60));
    let _ = writeln!(
        out,
        "Score A {} - {} B   turn {}   phase {}",
        record.scores[0],
        record.scores[1],
        record.turn,
        record.phase.name()
    );
    if let Some(side) = record.phase.awaiting().or(record.current_turn) {
        let _ = write!(out, "Waiting on team {side}");
        if let Some(remaining) = remaining {
            let _ = write!(out, " ({}s left)", remaining.num_seconds().max(0));
        }
        out.push('\n');
    }
    let _ = writeln!(out, "{}", "─".repeat(60));

    for cell in 1..=BOARD_CELLS {
        let token = if record.token == cell { "●" } else { " " };
        let occupant = match record.board.occupant(cell) {
            Some(occupant) if occupant.is_active(record.turn) => {
                format!("{}:{}", occupant.owner, occupant.card_id)
            }
            Some(occupant) => format!("{}:{} (out)", occupant.owner, occupant.card_id),
            None => "-".to_string(),
        };
        let _ = writeln!(out, " {token} {cell:>2} | {occupant}");
    }

    if let Phase::Completed(completed) = &record.phase {
        let result = match completed.winner {
            Some(side) => format!("Team {side} wins"),
            None => "Draw".to_string(),
        };
        let _ = writeln!(out, "{}", "─".repeat(60));
        let _ = writeln!(out, "Full time: {result}");
    }
    let _ = writeln!(out, "{}", "═".repeat(60));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kickoff::{
        game::{
            MatchEvent, transition,
            catalog::{starter_bonus_cards, starter_deck},
            entities::{MatchMode, PlayerSlot},
        },
        realtime::ClientCommand,
    };
    use serde_json::json;

    fn waiting_record() -> MatchRecord {
        let now = Utc::now();
        let creator = PlayerSlot::new(1, 1000, starter_deck(), starter_bonus_cards());
        let record = MatchRecord::new(uuid::Uuid::new_v4(), MatchMode::Quick, creator, now);
        transition(&record, MatchEvent::Open, &MatchRules::default(), now)
            .unwrap()
            .record
    }

    #[test]
    fn test_render_lists_every_cell() {
        let rendered = render_record(&waiting_record(), None);
        for cell in 1..=BOARD_CELLS {
            assert!(rendered.contains(&format!(" {cell:>2} | ")));
        }
        assert!(rendered.contains("waiting_for_players"));
    }

    #[test]
    fn test_broadcast_text_is_shown() {
        let event = ServerEvent::Broadcast {
            match_id: uuid::Uuid::nil(),
            from: 2,
            payload: json!({"text": "nice pass"}),
        };
        assert_eq!(describe_event(&event).as_deref(), Some("[2] nice pass"));
    }

    #[test]
    fn test_ack_settles_tracked_command() {
        let mut tracker = CommandTracker::new();
        let envelope = tracker.submit(ClientCommand::ConfirmPlacement, Utc::now());
        let ack = ServerEvent::Ack {
            command_id: envelope.command_id.unwrap(),
            version: 4,
        };

        assert_eq!(handle_event(&mut tracker, &ack), None);
        assert_eq!(tracker.in_flight().count(), 0);
    }

    #[test]
    fn test_completed_state_ends_session() {
        let mut record = waiting_record();
        record = transition(
            &record,
            MatchEvent::Forfeit { player: 1 },
            &MatchRules::default(),
            Utc::now(),
        )
        .unwrap()
        .record;
        let event = ServerEvent::State {
            record: Box::new(record),
            remaining_turn_ms: None,
        };

        let mut tracker = CommandTracker::new();
        assert_eq!(
            handle_event(&mut tracker, &event),
            Some(SessionEnd::Completed)
        );
    }
}
