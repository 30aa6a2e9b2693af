//! Structured event/error records pushed to the observability layer
//!
//! Channels never block on the sink: `emit` must return promptly. The
//! bundled `QueueSink` drops (and counts) records when its buffer is
//! full rather than stalling a read loop.

use crate::core::connection_state::ConnectionState;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifier of a registry handle
pub type HandleId = u64;

/// Identifier of an event subscription
pub type SubscriptionId = u64;

/// One structured record emitted by the connection layer
#[derive(Debug, Clone)]
pub enum EventRecord {
    /// A handle's connection state changed
    StateChanged {
        handle: HandleId,
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A liveness probe went unanswered
    HeartbeatFailed { handle: HandleId, consecutive: u32 },
    /// A full subscription buffer dropped its oldest undelivered event
    SubscriptionDropped {
        handle: HandleId,
        subscription: SubscriptionId,
        total_dropped: u64,
    },
    /// An individual request failed or timed out
    RequestFailed { handle: HandleId, reason: String },
    /// The reconnect budget ran out; the handle is now terminal
    RetryBudgetExhausted { handle: HandleId, attempts: u32 },
}

/// Sink for structured connection events
///
/// `emit` is called from channel tasks and must not block.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, record: EventRecord);
}

/// Sink that discards every record
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _record: EventRecord) {}
}

/// Sink that logs records through `tracing`
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, record: EventRecord) {
        match &record {
            EventRecord::StateChanged { handle, from, to } => {
                debug!("handle {} state {} -> {}", handle, from, to);
            }
            EventRecord::HeartbeatFailed {
                handle,
                consecutive,
            } => {
                warn!("handle {} missed {} heartbeat probe(s)", handle, consecutive);
            }
            EventRecord::SubscriptionDropped {
                handle,
                subscription,
                total_dropped,
            } => {
                debug!(
                    "handle {} subscription {} dropped event (total {})",
                    handle, subscription, total_dropped
                );
            }
            EventRecord::RequestFailed { handle, reason } => {
                debug!("handle {} request failed: {}", handle, reason);
            }
            EventRecord::RetryBudgetExhausted { handle, attempts } => {
                warn!(
                    "handle {} gave up reconnecting after {} attempts",
                    handle, attempts
                );
            }
        }
    }
}

/// Bounded, non-blocking queue sink
///
/// Records beyond the buffer capacity are dropped and counted; the
/// consumer drains through the paired receiver at its own pace.
pub struct QueueSink {
    tx: Sender<EventRecord>,
    overflow: Arc<AtomicU64>,
}

impl QueueSink {
    pub fn new(capacity: usize) -> (Self, Receiver<EventRecord>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                overflow: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Number of records dropped because the buffer was full
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

impl EventSink for QueueSink {
    fn emit(&self, record: EventRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
