//! Liveness probing for persistent channels
//!
//! The channel task sends a probe on a fixed interval and arms a
//! deadline; `HeartbeatMonitor` turns replies and elapsed deadlines into
//! verdicts. One miss degrades the connection without tearing it down
//! (a single lost packet must not flap the channel), a second
//! consecutive miss demotes it to reconnecting.
//!
//! Probes travel through the same writer as data frames, so probe and
//! request ordering on the wire is never interleaved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// What an elapsed probe deadline means for the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// First consecutive miss: degrade, keep the socket
    Degrade,
    /// Second consecutive miss: tear down and reconnect
    Teardown,
}

/// Tracks probe/reply timestamps to detect dead connections
///
/// Timestamps are stored as milliseconds since an internal epoch so the
/// tracker is usable from multiple tasks without locking.
pub struct ProbeTracker {
    epoch: Instant,
    last_probe_ms: AtomicU64,
    last_reply_ms: AtomicU64,
}

impl ProbeTracker {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_probe_ms: AtomicU64::new(0),
            last_reply_ms: AtomicU64::new(0),
        }
    }

    /// Call immediately after a probe was written to the socket
    pub fn record_probe(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_probe_ms.store(ms.max(1), Ordering::Release);
    }

    /// Call when a probe reply is seen; returns the round-trip time of
    /// the outstanding probe, if one was pending
    pub fn record_reply(&self) -> Option<Duration> {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        self.last_reply_ms.store(now_ms.max(1), Ordering::Release);

        let probe_ms = self.last_probe_ms.load(Ordering::Acquire);
        if probe_ms == 0 || now_ms < probe_ms {
            return None;
        }
        Some(Duration::from_millis(now_ms - probe_ms))
    }

    pub fn time_since_last_reply(&self) -> Option<Duration> {
        let ms = self.last_reply_ms.load(Ordering::Acquire);
        if ms == 0 {
            return None;
        }
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        Some(Duration::from_millis(now_ms.saturating_sub(ms)))
    }

    /// Reset on reconnect to start fresh
    pub fn reset(&self) {
        self.last_probe_ms.store(0, Ordering::Release);
        self.last_reply_ms.store(0, Ordering::Release);
    }
}

impl Default for ProbeTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Consecutive-failure accounting on top of the tracker
pub struct HeartbeatMonitor {
    tracker: ProbeTracker,
    misses: u32,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self {
            tracker: ProbeTracker::new(),
            misses: 0,
        }
    }

    pub fn probe_sent(&mut self) {
        self.tracker.record_probe();
    }

    /// A reply arrived: failure streak ends, RTT feeds the latency stats
    pub fn reply_seen(&mut self) -> Option<Duration> {
        self.misses = 0;
        self.tracker.record_reply()
    }

    /// The probe deadline elapsed without a reply
    pub fn probe_missed(&mut self) -> ProbeVerdict {
        self.misses += 1;
        if self.misses >= 2 {
            ProbeVerdict::Teardown
        } else {
            ProbeVerdict::Degrade
        }
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.misses
    }

    pub fn reset(&mut self) {
        self.misses = 0;
        self.tracker.reset();
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}
