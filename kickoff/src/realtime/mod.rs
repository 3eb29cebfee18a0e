//! Realtime synchronization: channels, scoreboard sync, reconnection, and
//! optimistic command tracking.

pub mod hub;
pub mod messages;
pub mod optimistic;
pub mod reconnect;
pub mod sync;

pub use hub::{ChannelManager, MatchSubscription, SubChannel};
pub use messages::{ClientCommand, ClientEnvelope, CommandId, ServerEvent};
pub use optimistic::{CommandStatus, CommandTracker, Reconciliation};
pub use reconnect::{BackoffPolicy, ReconnectionHandler, Resumed, StateFetcher};
pub use sync::{Scoreboard, SyncChange, SyncManager};
