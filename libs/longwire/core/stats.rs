//! Per-handle counters and gauges
//!
//! Everything here is a plain atomic so channel tasks and callers update
//! without coordination; snapshots are eventually consistent with live
//! state, which is all the observability layer needs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free per-handle statistics
pub struct AtomicStats {
    epoch: Instant,
    connect_attempts: AtomicU64,
    connects: AtomicU64,
    reconnects: AtomicU64,
    heartbeat_failures: AtomicU64,
    requests_sent: AtomicU64,
    requests_failed: AtomicU64,
    requests_timed_out: AtomicU64,
    events_dispatched: AtomicU64,
    events_dropped: AtomicU64,
    frames_unrouted: AtomicU64,
    /// EWMA of observed round-trips, microseconds; 0 = no sample yet
    latency_ewma_us: AtomicU64,
    /// Milliseconds since `epoch`; 0 = never
    last_activity_ms: AtomicU64,
}

impl AtomicStats {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            connect_attempts: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            heartbeat_failures: AtomicU64::new(0),
            requests_sent: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            requests_timed_out: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            frames_unrouted: AtomicU64::new(0),
            latency_ewma_us: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// `reconnect` marks a successful connect that followed a drop
    pub fn record_connected(&self, reconnect: bool) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        if reconnect {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    pub fn record_heartbeat_failure(&self) {
        self.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_request_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_timeout(&self) {
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unrouted_frame(&self) {
        self.frames_unrouted.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one round-trip sample into the moving average (weight 1/8)
    pub fn record_latency(&self, sample: Duration) {
        let sample_us = sample.as_micros() as u64;
        let _ = self
            .latency_ewma_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current == 0 {
                    sample_us
                } else {
                    (current * 7 + sample_us) / 8
                })
            });
    }

    /// Record activity on the handle (any send or receive)
    pub fn touch(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.store(ms.max(1), Ordering::Release);
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Instant of the most recent activity, if any
    pub fn last_activity(&self) -> Option<Instant> {
        let ms = self.last_activity_ms.load(Ordering::Acquire);
        if ms == 0 {
            None
        } else {
            Some(self.epoch + Duration::from_millis(ms))
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            frames_unrouted: self.frames_unrouted.load(Ordering::Relaxed),
            latency_estimate: {
                let us = self.latency_ewma_us.load(Ordering::Relaxed);
                if us == 0 {
                    None
                } else {
                    Some(Duration::from_micros(us))
                }
            },
        }
    }
}

impl Default for AtomicStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub connect_attempts: u64,
    pub connects: u64,
    pub reconnects: u64,
    pub heartbeat_failures: u64,
    pub requests_sent: u64,
    pub requests_failed: u64,
    pub requests_timed_out: u64,
    pub events_dispatched: u64,
    pub events_dropped: u64,
    pub frames_unrouted: u64,
    pub latency_estimate: Option<Duration>,
}
