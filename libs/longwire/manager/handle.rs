//! Caller-facing connection handle
//!
//! A `Handle` is the only object callers hold. It is cheap to clone and
//! outlives individual sockets: the channels behind it reconnect on
//! their own, and the handle keeps answering until it is closed through
//! the registry.

use crate::core::config::{ChannelKind, ConnectionConfig};
use crate::core::connection_state::ConnectionState;
use crate::core::channel::PersistentChannel;
use crate::core::pool::PooledChannel;
use crate::core::stats::{AtomicStats, StatsSnapshot};
use crate::core::subscriptions::{EventFilter, Subscription, SubscriptionSet};
use crate::traits::error::{LongwireError, Result};
use crate::traits::sink::HandleId;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) struct HandleInner {
    pub(crate) id: HandleId,
    pub(crate) config: Arc<ConnectionConfig>,
    pub(crate) created_at: Instant,
    pub(crate) persistent: Option<PersistentChannel>,
    pub(crate) pool: Option<PooledChannel>,
    pub(crate) stats: Arc<AtomicStats>,
}

/// Opaque handle to one managed endpoint
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    pub(crate) fn new(inner: HandleInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.inner.config.kind
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    /// Instant of the most recent traffic on this handle, if any
    pub fn last_activity(&self) -> Option<Instant> {
        self.inner.stats.last_activity()
    }

    /// Current state. Hybrid handles report the duplex side, which is
    /// the half with a lifecycle; a pool is simply open or closed.
    pub fn state(&self) -> ConnectionState {
        if let Some(persistent) = &self.inner.persistent {
            persistent.state()
        } else if let Some(pool) = &self.inner.pool {
            pool.state()
        } else {
            ConnectionState::Closed
        }
    }

    /// Issue one request. Plain calls prefer the pooled side when one
    /// exists; duplex-only handles correlate the request over the
    /// persistent connection.
    pub async fn request(&self, payload: Value) -> Result<Value> {
        self.inner.stats.touch();
        if let Some(pool) = &self.inner.pool {
            pool.request(&payload).await
        } else if let Some(persistent) = &self.inner.persistent {
            persistent.request(payload).await
        } else {
            Err(LongwireError::Cancelled)
        }
    }

    /// Subscribe to the event stream. Requires a duplex side.
    pub fn subscribe(&self, filter: EventFilter) -> Result<Subscription> {
        match &self.inner.persistent {
            Some(persistent) => persistent.subscribe(filter),
            None => Err(LongwireError::ConfigInvalid(
                "subscriptions require a duplex channel".into(),
            )),
        }
    }

    /// Block until the handle can carry traffic, bounded by `wait`.
    /// Pooled-only handles are ready as soon as they exist.
    pub async fn wait_ready(&self, wait: Duration) -> Result<()> {
        match &self.inner.persistent {
            Some(persistent) => persistent.wait_ready(wait).await,
            None => Ok(()),
        }
    }

    /// Point-in-time statistics copy
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub(crate) fn subscription_set(&self) -> Option<&Arc<SubscriptionSet>> {
        self.inner
            .persistent
            .as_ref()
            .map(PersistentChannel::subscriptions)
    }

    /// Tear down both sides; each is bounded by the config's grace
    /// timeout. Called by the registry.
    pub(crate) async fn close_channels(&self) {
        if let Some(persistent) = &self.inner.persistent {
            persistent.close().await;
        }
        if let Some(pool) = &self.inner.pool {
            pool.close();
        }
    }
}
