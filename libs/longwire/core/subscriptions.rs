//! Event subscription registry and dispatch
//!
//! Each persistent channel owns one `SubscriptionSet`. Inbound frames
//! that match no pending request are offered to every subscription whose
//! filter matches; delivery goes through a per-subscription bounded
//! queue so one slow consumer can never stall the read loop or its
//! neighbors. A full queue evicts the oldest undelivered event and
//! counts the drop.

use crate::core::stats::AtomicStats;
use crate::traits::codec::Frame;
use crate::traits::sink::{EventRecord, EventSink, HandleId, SubscriptionId};
use crossbeam_channel::{bounded, Receiver, TryRecvError, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Which event kinds a subscription wants
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    kinds: Option<Vec<String>>,
}

impl EventFilter {
    /// Match every event on the channel
    pub fn any() -> Self {
        Self { kinds: None }
    }

    /// Match only the given event kinds
    pub fn kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: Some(kinds.into_iter().map(Into::into).collect()),
        }
    }

    pub fn matches(&self, kind: Option<&str>) -> bool {
        match &self.kinds {
            None => true,
            Some(wanted) => kind.map_or(false, |k| wanted.iter().any(|w| w == k)),
        }
    }
}

/// Caller half of a subscription: a bounded receiver plus drop counter
pub struct Subscription {
    id: SubscriptionId,
    handle: HandleId,
    rx: Receiver<Frame>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn handle_id(&self) -> HandleId {
        self.handle
    }

    /// Pop the next buffered event without waiting
    pub fn try_next(&self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Block up to `timeout` for the next event. Returns None on timeout
    /// or once the subscription has been removed and drained.
    pub fn next_timeout(&self, timeout: std::time::Duration) -> Option<Frame> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Events evicted because this subscription's buffer was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of events currently buffered
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }

    /// True once the owning channel removed this subscription and every
    /// buffered event has been drained
    pub fn is_closed(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

struct SubEntry {
    filter: EventFilter,
    tx: crossbeam_channel::Sender<Frame>,
    /// Clone of the subscriber's receiver: shares the same queue, which
    /// lets the dispatch side evict the oldest event when the buffer is
    /// full without ever blocking.
    evict: Receiver<Frame>,
    dropped: Arc<AtomicU64>,
}

/// Per-channel subscription registry
pub struct SubscriptionSet {
    handle: HandleId,
    entries: RwLock<HashMap<SubscriptionId, SubEntry>>,
    stats: Arc<AtomicStats>,
    sink: Arc<dyn EventSink>,
}

impl SubscriptionSet {
    pub fn new(handle: HandleId, stats: Arc<AtomicStats>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            handle,
            entries: RwLock::new(HashMap::new()),
            stats,
            sink,
        }
    }

    pub fn subscribe(&self, filter: EventFilter, buffer: usize) -> Subscription {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(buffer);
        let dropped = Arc::new(AtomicU64::new(0));

        self.entries.write().insert(
            id,
            SubEntry {
                filter,
                tx,
                evict: rx.clone(),
                dropped: Arc::clone(&dropped),
            },
        );
        debug!("handle {} added subscription {}", self.handle, id);

        Subscription {
            id,
            handle: self.handle,
            rx,
            dropped,
        }
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.entries.write().remove(&id).is_some();
        if removed {
            debug!("handle {} removed subscription {}", self.handle, id);
        }
        removed
    }

    /// Drop every subscription (handle reached a terminal state)
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        if !entries.is_empty() {
            debug!(
                "handle {} clearing {} subscription(s)",
                self.handle,
                entries.len()
            );
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Offer one inbound event to every matching subscription.
    ///
    /// Returns the number of deliveries. Never blocks: a full buffer
    /// evicts its oldest event, counts the drop and reports it through
    /// the sink.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        let entries = self.entries.read();
        let mut delivered = 0;

        for (id, entry) in entries.iter() {
            if !entry.filter.matches(frame.kind.as_deref()) {
                continue;
            }

            let mut event = frame.clone();
            loop {
                match entry.tx.try_send(event) {
                    Ok(()) => {
                        delivered += 1;
                        self.stats.record_event_dispatched();
                        break;
                    }
                    Err(TrySendError::Full(returned)) => {
                        let evicted = entry.evict.try_recv().is_ok();
                        let total = entry.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        self.stats.record_event_dropped();
                        self.sink.emit(EventRecord::SubscriptionDropped {
                            handle: self.handle,
                            subscription: *id,
                            total_dropped: total,
                        });
                        if evicted {
                            // retry with the freed slot
                            event = returned;
                        } else {
                            // zero-capacity race: count the new event as
                            // the drop and move on
                            break;
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }

        delivered
    }
}
