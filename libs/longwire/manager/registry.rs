//! Registry of live connection handles
//!
//! Single point of creation, lookup and teardown. The registry itself
//! never performs network I/O — it validates configs, wires channels to
//! the shared codec/sink/transport collaborators, and keeps metadata so
//! the embedding application can enumerate and close what it opened.

use crate::core::config::ConnectionConfig;
use crate::core::channel::PersistentChannel;
use crate::core::connection_state::ConnectionState;
use crate::core::pool::PooledChannel;
use crate::core::stats::{AtomicStats, StatsSnapshot};
use crate::core::subscriptions::{EventFilter, Subscription};
use crate::manager::handle::{Handle, HandleInner};
use crate::traits::codec::{FrameCodec, JsonRpcCodec};
use crate::traits::error::{LongwireError, Result};
use crate::traits::sink::{EventSink, HandleId, NoOpSink, SubscriptionId};
use crate::traits::transport::{HttpFactory, TransportFactory};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Owns every live handle and routes lifecycle calls
///
/// Construct one per process, close it at shutdown:
///
/// ```ignore
/// let registry = ConnectionRegistry::new().with_sink(Arc::new(LogSink));
/// let handle = registry.open(ConnectionConfig::duplex("wss://node.example/ws"))?;
/// handle.wait_ready(Duration::from_secs(5)).await?;
/// // ...
/// registry.close_all().await;
/// ```
pub struct ConnectionRegistry {
    handles: RwLock<HashMap<HandleId, Handle>>,
    subscriptions: RwLock<HashMap<SubscriptionId, HandleId>>,
    next_id: AtomicU64,
    sink: Arc<dyn EventSink>,
    codec: Arc<dyn FrameCodec>,
    transports: Arc<dyn TransportFactory>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            sink: Arc::new(NoOpSink),
            codec: Arc::new(JsonRpcCodec::new()),
            transports: Arc::new(HttpFactory),
        }
    }

    /// Route structured events/errors into the given sink
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Use a custom wire codec for all duplex channels
    pub fn with_codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Use a custom session factory for all pooled channels
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transports = factory;
        self
    }

    /// Validate the config, start the channel(s) and return the handle.
    ///
    /// Returns immediately: the first connect happens asynchronously.
    /// Callers that need a live connection poll `Handle::state` or block
    /// on `Handle::wait_ready`.
    pub fn open(&self, config: ConnectionConfig) -> Result<Handle> {
        config.validate()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let config = Arc::new(config);
        let stats = Arc::new(AtomicStats::new());

        let persistent = if config.wants_duplex() {
            Some(PersistentChannel::spawn(
                id,
                Arc::clone(&config),
                Arc::clone(&self.codec),
                Arc::clone(&self.sink),
                Arc::clone(&stats),
            ))
        } else {
            None
        };

        let pool = if config.wants_pool() {
            Some(PooledChannel::new(
                id,
                Arc::clone(&config),
                Arc::clone(&self.transports),
                Arc::clone(&self.sink),
                Arc::clone(&stats),
            ))
        } else {
            None
        };

        let handle = Handle::new(HandleInner {
            id,
            config,
            created_at: Instant::now(),
            persistent,
            pool,
            stats,
        });

        self.handles.write().insert(id, handle.clone());
        info!("opened handle {} ({:?})", id, handle.kind());
        Ok(handle)
    }

    pub fn get(&self, id: HandleId) -> Result<Handle> {
        self.handles
            .read()
            .get(&id)
            .cloned()
            .ok_or(LongwireError::HandleNotFound(id))
    }

    /// Stop the handle's channels, cancel its pending work, drop its
    /// subscriptions and forget it. Bounded by the config's grace
    /// timeout, after which the channel task is aborted.
    pub async fn close(&self, id: HandleId) -> Result<()> {
        let handle = self
            .handles
            .write()
            .remove(&id)
            .ok_or(LongwireError::HandleNotFound(id))?;

        self.subscriptions.write().retain(|_, owner| *owner != id);
        handle.close_channels().await;
        info!("closed handle {}", id);
        Ok(())
    }

    /// Close every handle; order unspecified, each bounded by its own
    /// grace timeout. Used at process shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<HandleId> = self.handles.read().keys().copied().collect();
        if ids.is_empty() {
            return;
        }
        info!("closing {} handle(s)", ids.len());
        for id in ids {
            if let Err(e) = self.close(id).await {
                debug!("close {} during shutdown: {}", id, e);
            }
        }
    }

    /// Register a subscription on the handle's event stream
    pub fn subscribe(&self, id: HandleId, filter: EventFilter) -> Result<Subscription> {
        let handle = self.get(id)?;
        let subscription = handle.subscribe(filter)?;
        self.subscriptions
            .write()
            .insert(subscription.id(), id);
        Ok(subscription)
    }

    /// Remove a subscription by its identifier
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<()> {
        let owner = self
            .subscriptions
            .write()
            .remove(&subscription_id)
            .ok_or(LongwireError::SubscriptionNotFound(subscription_id))?;

        // the owning handle may already be gone; that's not an error
        if let Ok(handle) = self.get(owner) {
            if let Some(set) = handle.subscription_set() {
                set.remove(subscription_id);
            }
        }
        Ok(())
    }

    /// Point-in-time statistics for one handle
    pub fn snapshot(&self, id: HandleId) -> Result<StatsSnapshot> {
        Ok(self.get(id)?.snapshot())
    }

    /// Connection state of every live handle
    pub fn statuses(&self) -> HashMap<HandleId, ConnectionState> {
        self.handles
            .read()
            .iter()
            .map(|(id, handle)| (*id, handle.state()))
            .collect()
    }

    pub fn handle_count(&self) -> usize {
        self.handles.read().len()
    }

    pub fn connected_count(&self) -> usize {
        self.handles
            .read()
            .values()
            .filter(|handle| handle.state().is_usable())
            .count()
    }

    /// Close handles that have sat in `Failed` longer than `older_than`.
    /// Returns how many were removed.
    pub async fn prune_failed(&self, older_than: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<HandleId> = self
            .handles
            .read()
            .iter()
            .filter(|(_, handle)| {
                handle.state() == ConnectionState::Failed
                    && now.duration_since(
                        handle.last_activity().unwrap_or_else(|| handle.created_at()),
                    ) > older_than
            })
            .map(|(id, _)| *id)
            .collect();

        let mut pruned = 0;
        for id in stale {
            match self.close(id).await {
                Ok(()) => {
                    warn!("pruned failed handle {}", id);
                    pruned += 1;
                }
                Err(_) => {}
            }
        }
        pruned
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
