//! Client-side bookkeeping for optimistic commands.
//!
//! A command is shown locally as soon as it is sent (`Optimistic`), then
//! settles when the server acknowledges (`Confirmed`) or refuses it
//! (`Rejected`). Authoritative state always wins: a full state refresh
//! rejects whatever is still in flight.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::messages::{ClientCommand, ClientEnvelope, CommandId, ServerEvent};
use crate::game::state_machine::MatchRecord;

/// Code used when a refresh supersedes an unacknowledged command.
pub const SUPERSEDED: &str = "superseded";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandStatus {
    Optimistic,
    Confirmed { version: i64 },
    Rejected { code: String, message: String, retry: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedCommand {
    pub id: CommandId,
    pub command: ClientCommand,
    pub status: CommandStatus,
    pub sent_at: DateTime<Utc>,
}

/// What an incoming event meant for local state.
#[derive(Clone, Debug, PartialEq)]
pub enum Reconciliation {
    /// A tracked command settled.
    Settled(TrackedCommand),
    /// Authoritative state replaced the local view.
    Adopt(Box<MatchRecord>),
    /// Nothing to reconcile.
    Ignored,
}

/// In-flight commands of one sync session.
#[derive(Debug, Default)]
pub struct CommandTracker {
    next_id: CommandId,
    commands: BTreeMap<CommandId, TrackedCommand>,
    last_sync: Option<DateTime<Utc>>,
    version: Option<i64>,
}

impl CommandTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a command and wrap it for the wire.
    pub fn submit(&mut self, command: ClientCommand, now: DateTime<Utc>) -> ClientEnvelope {
        self.next_id += 1;
        let id = self.next_id;
        self.commands.insert(
            id,
            TrackedCommand {
                id,
                command: command.clone(),
                status: CommandStatus::Optimistic,
                sent_at: now,
            },
        );
        ClientEnvelope {
            command_id: Some(id),
            command,
        }
    }

    /// Fold a server event into the tracker.
    pub fn reconcile(&mut self, event: &ServerEvent, now: DateTime<Utc>) -> Reconciliation {
        match event {
            ServerEvent::Ack {
                command_id,
                version,
            } => {
                self.observe_version(*version, now);
                self.settle(*command_id, CommandStatus::Confirmed { version: *version })
            }
            ServerEvent::Rejected {
                command_id: Some(command_id),
                code,
                message,
                retry,
            } => self.settle(
                *command_id,
                CommandStatus::Rejected {
                    code: code.clone(),
                    message: message.clone(),
                    retry: *retry,
                },
            ),
            ServerEvent::State { record, .. } => {
                self.observe_version(record.version, now);
                self.supersede_in_flight();
                Reconciliation::Adopt(record.clone())
            }
            ServerEvent::RecordChanged { record } => {
                if self.version.is_some_and(|known| record.version <= known) {
                    return Reconciliation::Ignored;
                }
                self.observe_version(record.version, now);
                Reconciliation::Adopt(record.clone())
            }
            _ => Reconciliation::Ignored,
        }
    }

    fn observe_version(&mut self, version: i64, now: DateTime<Utc>) {
        self.version = Some(self.version.map_or(version, |known| known.max(version)));
        self.last_sync = Some(now);
    }

    fn settle(&mut self, id: CommandId, status: CommandStatus) -> Reconciliation {
        match self.commands.get_mut(&id) {
            Some(tracked) if tracked.status == CommandStatus::Optimistic => {
                tracked.status = status;
                Reconciliation::Settled(tracked.clone())
            }
            _ => Reconciliation::Ignored,
        }
    }

    fn supersede_in_flight(&mut self) {
        for tracked in self.commands.values_mut() {
            if tracked.status == CommandStatus::Optimistic {
                tracked.status = CommandStatus::Rejected {
                    code: SUPERSEDED.to_string(),
                    message: "replaced by authoritative state".to_string(),
                    retry: true,
                };
            }
        }
    }

    /// Commands still awaiting the server.
    pub fn in_flight(&self) -> impl Iterator<Item = &TrackedCommand> {
        self.commands
            .values()
            .filter(|c| c.status == CommandStatus::Optimistic)
    }

    pub fn get(&self, id: CommandId) -> Option<&TrackedCommand> {
        self.commands.get(&id)
    }

    /// Forget settled commands.
    pub fn prune(&mut self) {
        self.commands
            .retain(|_, c| c.status == CommandStatus::Optimistic);
    }

    /// Drop the whole session, as on disconnect.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.last_sync = None;
        self.version = None;
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn known_version(&self) -> Option<i64> {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{entities::MatchMode, test_support::seated_record};

    #[test]
    fn test_ack_confirms_command() {
        let mut tracker = CommandTracker::new();
        let now = Utc::now();
        let envelope = tracker.submit(ClientCommand::ConfirmPlacement, now);
        let id = envelope.command_id.unwrap();
        assert_eq!(tracker.in_flight().count(), 1);

        let outcome = tracker.reconcile(&ServerEvent::Ack { command_id: id, version: 9 }, now);
        let Reconciliation::Settled(settled) = outcome else {
            panic!("expected settlement");
        };
        assert_eq!(settled.status, CommandStatus::Confirmed { version: 9 });
        assert_eq!(tracker.known_version(), Some(9));
        assert_eq!(tracker.in_flight().count(), 0);
    }

    #[test]
    fn test_rejection_is_final() {
        let mut tracker = CommandTracker::new();
        let now = Utc::now();
        let id = tracker.submit(ClientCommand::Forfeit, now).command_id.unwrap();

        tracker.reconcile(
            &ServerEvent::Rejected {
                command_id: Some(id),
                code: "not_your_turn".into(),
                message: "not your turn".into(),
                retry: false,
            },
            now,
        );
        // A late ack cannot resurrect a rejected command.
        assert_eq!(
            tracker.reconcile(&ServerEvent::Ack { command_id: id, version: 3 }, now),
            Reconciliation::Ignored
        );
        assert!(matches!(
            tracker.get(id).unwrap().status,
            CommandStatus::Rejected { .. }
        ));
    }

    #[test]
    fn test_state_refresh_supersedes_in_flight() {
        let mut tracker = CommandTracker::new();
        let now = Utc::now();
        let id = tracker.submit(ClientCommand::ConfirmPlacement, now).command_id.unwrap();
        let record = seated_record(MatchMode::Quick);

        let outcome = tracker.reconcile(
            &ServerEvent::State {
                record: Box::new(record.clone()),
                remaining_turn_ms: None,
            },
            now,
        );
        assert_eq!(outcome, Reconciliation::Adopt(Box::new(record)));
        assert!(matches!(
            &tracker.get(id).unwrap().status,
            CommandStatus::Rejected { code, .. } if code == SUPERSEDED
        ));
        assert_eq!(tracker.last_sync(), Some(now));
    }

    #[test]
    fn test_stale_record_change_ignored() {
        let mut tracker = CommandTracker::new();
        let now = Utc::now();
        let mut record = seated_record(MatchMode::Quick);
        record.version = 5;
        tracker.reconcile(&ServerEvent::RecordChanged { record: Box::new(record.clone()) }, now);

        record.version = 4;
        assert_eq!(
            tracker.reconcile(&ServerEvent::RecordChanged { record: Box::new(record) }, now),
            Reconciliation::Ignored
        );
        assert_eq!(tracker.known_version(), Some(5));
    }

    #[test]
    fn test_prune_and_reset() {
        let mut tracker = CommandTracker::new();
        let now = Utc::now();
        let first = tracker.submit(ClientCommand::Forfeit, now).command_id.unwrap();
        tracker.submit(ClientCommand::RequestState, now);
        tracker.reconcile(&ServerEvent::Ack { command_id: first, version: 1 }, now);

        tracker.prune();
        assert!(tracker.get(first).is_none());
        assert_eq!(tracker.in_flight().count(), 1);

        tracker.reset();
        assert_eq!(tracker.in_flight().count(), 0);
        assert_eq!(tracker.known_version(), None);
    }
}
