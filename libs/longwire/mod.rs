//! # Longwire
//!
//! Connection manager for long-lived remote procedure/event endpoints:
//! multiplexed persistent channels, bounded session pools, automatic
//! recovery from transient network failure, liveness probing, and event
//! fan-out to independent subscribers.
//!
//! ## Features
//!
//! - **Persistent duplex channels**: correlated requests and unsolicited
//!   events over one socket, reconnecting with jittered backoff
//! - **Bounded session pools**: at most `pool_max` live request/response
//!   sessions per endpoint, reused in arrival order
//! - **Single-owner concurrency**: one task per channel owns the socket
//!   and every state transition; callers only ever touch handles
//! - **Explicit observability**: atomic per-handle stats plus a
//!   structured event sink, never blocking a read loop
//!
//! ## Example
//!
//! ```rust,ignore
//! use longwire::{ConnectionConfig, ConnectionRegistry, EventFilter};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> longwire::Result<()> {
//!     let registry = ConnectionRegistry::new();
//!
//!     let handle = registry.open(ConnectionConfig::duplex("wss://node.example/ws"))?;
//!     handle.wait_ready(Duration::from_secs(5)).await?;
//!
//!     let response = handle
//!         .request(serde_json::json!({ "method": "eth_blockNumber", "params": [] }))
//!         .await?;
//!     println!("head: {}", response["result"]);
//!
//!     let heads = handle.subscribe(EventFilter::kinds(["newHeads"]))?;
//!     while let Some(event) = heads.next_timeout(Duration::from_secs(30)) {
//!         println!("new head: {}", event.payload);
//!     }
//!
//!     registry.close_all().await;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod manager;
pub mod traits;

// Re-export all traits
pub use traits::*;

// Re-export core functionality
pub use core::{
    channel::PersistentChannel,
    config::{ChannelKind, ConnectionConfig, ReconnectConfig},
    connection_state::{AtomicConnectionState, ConnectionState},
    heartbeat::{HeartbeatMonitor, ProbeTracker, ProbeVerdict},
    pool::{PooledChannel, SessionGuard},
    stats::{AtomicStats, StatsSnapshot},
    subscriptions::{EventFilter, Subscription, SubscriptionSet},
};

// Re-export manager
pub use manager::{ConnectionRegistry, Handle};
