//! Connection state machine storage
//!
//! The state itself is a plain enum; `AtomicConnectionState` packs it
//! into an `AtomicU8` so every caller-facing accessor is a lock-free
//! load while the owning channel task remains the only writer.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a connection handle
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Degraded
///                     ^             |            |
///                     |             v            v
///                     +------- Reconnecting -----+
///                                   |
///                                   v
///                                 Failed (terminal)
///
/// any non-terminal state -> Closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Initial; no socket yet
    Disconnected = 0,
    /// Handshake in progress
    Connecting = 1,
    /// Socket open, heartbeat active
    Connected = 2,
    /// One heartbeat probe missed; liveness suspect but not confirmed lost
    Degraded = 3,
    /// Socket torn down, backoff running before the next attempt
    Reconnecting = 4,
    /// Retry budget exhausted; requires explicit close + reopen
    Failed = 5,
    /// Explicitly closed
    Closed = 6,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }

    /// Connected enough to carry traffic (Degraded still has a socket)
    pub fn is_usable(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }

    /// Whether the channel is between sockets
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    /// Legal transitions of the channel state machine
    pub fn may_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected | Reconnecting | Failed) => true,
            (Connected, Degraded | Reconnecting) => true,
            (Degraded, Connected | Reconnecting) => true,
            (Reconnecting, Connecting | Failed) => true,
            _ => false,
        }
    }

    fn from_u8(value: u8) -> ConnectionState {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Degraded,
            4 => ConnectionState::Reconnecting,
            5 => ConnectionState::Failed,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lock-free connection state cell
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_usable(&self) -> bool {
        self.get().is_usable()
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.get().is_terminal()
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}
