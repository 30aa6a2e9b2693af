//! Channel implementations and their supporting machinery
//!
//! `channel` and `pool` are the two ways traffic reaches an endpoint;
//! everything else here (state storage, heartbeat accounting,
//! subscriptions, stats) exists in service of them.

pub mod channel;
pub mod config;
pub mod connection_state;
pub mod heartbeat;
pub mod pool;
pub mod stats;
pub mod subscriptions;

// Re-export main types
pub use channel::PersistentChannel;
pub use config::{ChannelKind, ConnectionConfig, ReconnectConfig};
pub use connection_state::{AtomicConnectionState, ConnectionState};
pub use heartbeat::{HeartbeatMonitor, ProbeTracker, ProbeVerdict};
pub use pool::{PooledChannel, SessionGuard};
pub use stats::{AtomicStats, StatsSnapshot};
pub use subscriptions::{EventFilter, Subscription, SubscriptionSet};
