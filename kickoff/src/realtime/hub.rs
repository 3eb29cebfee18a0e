//! Per-match pub/sub channels with presence tracking.
//!
//! Each match gets four broadcast sub-channels:
//!
//! - **changes**: record changes and phase transitions
//! - **log**: move and placement appends
//! - **broadcast**: ephemeral player-to-player messages, never persisted
//! - **presence**: who is connected
//!
//! Channels are created on first subscription and dropped when the last
//! member leaves.

use std::{collections::HashMap, fmt};

use tokio::sync::{RwLock, broadcast};

use super::messages::ServerEvent;
use crate::game::entities::{MatchId, PlayerId};

/// Buffered events per sub-channel before slow receivers start lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SubChannel {
    Changes,
    Log,
    Broadcast,
    Presence,
}

impl SubChannel {
    /// Sub-channel an event is published on.
    #[must_use]
    pub fn for_event(event: &ServerEvent) -> Self {
        match event {
            ServerEvent::MoveResolved { .. } | ServerEvent::PlacementRecorded { .. } => Self::Log,
            ServerEvent::Broadcast { .. } => Self::Broadcast,
            ServerEvent::PresenceChanged { .. } => Self::Presence,
            _ => Self::Changes,
        }
    }
}

impl fmt::Display for SubChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::Changes => "changes",
            Self::Log => "log",
            Self::Broadcast => "broadcast",
            Self::Presence => "presence",
        };
        write!(f, "{repr}")
    }
}

struct MatchChannel {
    changes: broadcast::Sender<ServerEvent>,
    log: broadcast::Sender<ServerEvent>,
    broadcast: broadcast::Sender<ServerEvent>,
    presence: broadcast::Sender<ServerEvent>,
    /// Open connections per player.
    members: HashMap<PlayerId, usize>,
}

impl MatchChannel {
    fn new(capacity: usize) -> Self {
        Self {
            changes: broadcast::channel(capacity).0,
            log: broadcast::channel(capacity).0,
            broadcast: broadcast::channel(capacity).0,
            presence: broadcast::channel(capacity).0,
            members: HashMap::new(),
        }
    }

    fn sender(&self, sub: SubChannel) -> &broadcast::Sender<ServerEvent> {
        match sub {
            SubChannel::Changes => &self.changes,
            SubChannel::Log => &self.log,
            SubChannel::Broadcast => &self.broadcast,
            SubChannel::Presence => &self.presence,
        }
    }

    fn subscribe(&self) -> MatchSubscription {
        MatchSubscription {
            changes: self.changes.subscribe(),
            log: self.log.subscribe(),
            broadcast: self.broadcast.subscribe(),
            presence: self.presence.subscribe(),
        }
    }
}

/// Receiving end of all four sub-channels of one match.
pub struct MatchSubscription {
    changes: broadcast::Receiver<ServerEvent>,
    log: broadcast::Receiver<ServerEvent>,
    broadcast: broadcast::Receiver<ServerEvent>,
    presence: broadcast::Receiver<ServerEvent>,
}

impl MatchSubscription {
    /// Next event from any sub-channel.
    ///
    /// Lagged receivers skip what they missed; clients recover with
    /// `request_state`. Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            let result = tokio::select! {
                r = self.changes.recv() => r,
                r = self.log.recv() => r,
                r = self.broadcast.recv() => r,
                r = self.presence.recv() => r,
            };
            match result {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Registry of live match channels.
pub struct ChannelManager {
    channels: RwLock<HashMap<MatchId, MatchChannel>>,
    capacity: usize,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChannelManager {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Join a match's channel.
    ///
    /// The player's first connection announces them online to everyone
    /// already subscribed.
    ///
    /// # Arguments
    ///
    /// * `match_id` - Match to subscribe to
    /// * `player_id` - Connecting player
    ///
    /// # Returns
    ///
    /// * `MatchSubscription` - Receivers for all four sub-channels
    pub async fn join(&self, match_id: MatchId, player_id: PlayerId) -> MatchSubscription {
        let mut channels = self.channels.write().await;
        let channel = channels
            .entry(match_id)
            .or_insert_with(|| MatchChannel::new(self.capacity));
        let connections = channel.members.entry(player_id).or_insert(0);
        *connections += 1;
        if *connections == 1 {
            log::debug!("Player {player_id} online in match {match_id}");
            let _ = channel.presence.send(ServerEvent::PresenceChanged {
                match_id,
                player_id,
                online: true,
            });
        }
        channel.subscribe()
    }

    /// Drop one connection of a player.
    ///
    /// Announces the player offline when their last connection goes, and
    /// removes the channel once nobody is left.
    pub async fn leave(&self, match_id: MatchId, player_id: PlayerId) {
        let mut channels = self.channels.write().await;
        let Some(channel) = channels.get_mut(&match_id) else {
            return;
        };

        if let Some(connections) = channel.members.get_mut(&player_id) {
            *connections = connections.saturating_sub(1);
            if *connections == 0 {
                channel.members.remove(&player_id);
                log::debug!("Player {player_id} offline in match {match_id}");
                let _ = channel.presence.send(ServerEvent::PresenceChanged {
                    match_id,
                    player_id,
                    online: false,
                });
            }
        }

        if channel.members.is_empty() {
            channels.remove(&match_id);
        }
    }

    /// Publish an event on the sub-channel it belongs to.
    ///
    /// # Returns
    ///
    /// * `usize` - Number of receivers reached; 0 when nobody listens
    pub async fn publish(&self, match_id: MatchId, event: ServerEvent) -> usize {
        let sub = SubChannel::for_event(&event);
        let channels = self.channels.read().await;
        let Some(channel) = channels.get(&match_id) else {
            return 0;
        };
        match channel.sender(sub).send(event) {
            Ok(reached) => reached,
            Err(_) => {
                log::debug!("No receivers on {sub} for match {match_id}");
                0
            }
        }
    }

    /// Players with at least one open connection.
    pub async fn online(&self, match_id: MatchId) -> Vec<PlayerId> {
        let channels = self.channels.read().await;
        let mut players: Vec<_> = channels
            .get(&match_id)
            .map(|c| c.members.keys().copied().collect())
            .unwrap_or_default();
        players.sort_unstable();
        players
    }

    pub async fn is_online(&self, match_id: MatchId, player_id: PlayerId) -> bool {
        self.channels
            .read()
            .await
            .get(&match_id)
            .is_some_and(|c| c.members.contains_key(&player_id))
    }

    /// Drop a match channel; subscribers see the stream end.
    pub async fn close(&self, match_id: MatchId) {
        if self.channels.write().await.remove(&match_id).is_some() {
            log::debug!("Closed channel for match {match_id}");
        }
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn broadcast_event(match_id: MatchId) -> ServerEvent {
        ServerEvent::Broadcast {
            match_id,
            from: 1,
            payload: serde_json::json!({ "emote": "wave" }),
        }
    }

    #[tokio::test]
    async fn test_presence_on_join_and_leave() {
        let hub = ChannelManager::default();
        let match_id = Uuid::new_v4();

        let mut first = hub.join(match_id, 1).await;
        let _second = hub.join(match_id, 2).await;

        // First subscriber sees the second player arrive.
        let event = first.recv().await.unwrap();
        assert_eq!(
            event,
            ServerEvent::PresenceChanged {
                match_id,
                player_id: 2,
                online: true
            }
        );
        assert_eq!(hub.online(match_id).await, vec![1, 2]);

        hub.leave(match_id, 2).await;
        let event = first.recv().await.unwrap();
        assert!(matches!(
            event,
            ServerEvent::PresenceChanged { player_id: 2, online: false, .. }
        ));
        assert!(!hub.is_online(match_id, 2).await);
    }

    #[tokio::test]
    async fn test_second_connection_is_not_announced() {
        let hub = ChannelManager::default();
        let match_id = Uuid::new_v4();

        let mut watcher = hub.join(match_id, 1).await;
        let _a = hub.join(match_id, 2).await;
        let _b = hub.join(match_id, 2).await;
        hub.leave(match_id, 2).await;

        assert!(matches!(
            watcher.recv().await,
            Some(ServerEvent::PresenceChanged { online: true, .. })
        ));
        // One connection remains, so player 2 stays online.
        assert!(hub.is_online(match_id, 2).await);
    }

    #[tokio::test]
    async fn test_publish_routes_to_subscribers() {
        let hub = ChannelManager::default();
        let match_id = Uuid::new_v4();
        let mut sub = hub.join(match_id, 1).await;

        assert_eq!(hub.publish(match_id, broadcast_event(match_id)).await, 1);
        assert_eq!(sub.recv().await, Some(broadcast_event(match_id)));
    }

    #[tokio::test]
    async fn test_publish_without_channel() {
        let hub = ChannelManager::default();
        assert_eq!(hub.publish(Uuid::new_v4(), broadcast_event(Uuid::nil())).await, 0);
    }

    #[tokio::test]
    async fn test_channel_removed_when_empty() {
        let hub = ChannelManager::default();
        let match_id = Uuid::new_v4();
        let _sub = hub.join(match_id, 1).await;
        assert_eq!(hub.channel_count().await, 1);

        hub.leave(match_id, 1).await;
        assert_eq!(hub.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let hub = ChannelManager::default();
        let match_id = Uuid::new_v4();
        let mut sub = hub.join(match_id, 1).await;
        hub.close(match_id).await;
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_sub_channel_routing() {
        let id = Uuid::nil();
        assert_eq!(SubChannel::for_event(&broadcast_event(id)), SubChannel::Broadcast);
        assert_eq!(
            SubChannel::for_event(&ServerEvent::Ack { command_id: 1, version: 2 }),
            SubChannel::Changes
        );
    }
}
