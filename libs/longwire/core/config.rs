//! Endpoint configuration
//!
//! A `ConnectionConfig` is handed over fully formed by the embedding
//! application's config layer and is immutable once a handle exists.
//! Validation happens once, at `ConnectionRegistry::open`.

use crate::traits::error::{LongwireError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Which channel(s) a handle carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// One persistent duplex connection (requests + event stream)
    Duplex,
    /// A bounded pool of transient request/response sessions
    Pooled,
    /// Both: pooled sessions for plain calls, a duplex side for events
    Hybrid,
}

/// Reconnection parameters for persistent channels
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay")]
    pub max_delay: Duration,
    /// Uniform perturbation fraction in `[0, 1]`
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// None = retry forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter_ratio: default_jitter_ratio(),
            max_attempts: None,
        }
    }
}

/// Configuration for one remote endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Endpoint for the persistent duplex connection (ws:// or wss://)
    #[serde(default)]
    pub duplex_url: Option<String>,
    /// Endpoint for pooled request/response sessions
    #[serde(default)]
    pub rpc_url: Option<String>,
    pub kind: ChannelKind,

    /// Static headers applied to the duplex handshake and pooled sessions
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default = "default_pool_min")]
    pub pool_min: usize,
    #[serde(default = "default_pool_max")]
    pub pool_max: usize,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: Duration,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Requests queued while connecting, before `Backpressure` kicks in
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Bounded buffer per subscription; a full buffer drops oldest
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
    /// How long `close` waits for the channel task before force-release
    #[serde(default = "default_close_grace")]
    pub close_grace: Duration,
}

impl ConnectionConfig {
    /// Duplex-only endpoint with defaults
    pub fn duplex(url: impl Into<String>) -> Self {
        Self {
            duplex_url: Some(url.into()),
            rpc_url: None,
            kind: ChannelKind::Duplex,
            ..Self::base()
        }
    }

    /// Pooled-only endpoint with defaults
    pub fn pooled(url: impl Into<String>) -> Self {
        Self {
            duplex_url: None,
            rpc_url: Some(url.into()),
            kind: ChannelKind::Pooled,
            ..Self::base()
        }
    }

    /// Hybrid endpoint with defaults
    pub fn hybrid(duplex_url: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        Self {
            duplex_url: Some(duplex_url.into()),
            rpc_url: Some(rpc_url.into()),
            kind: ChannelKind::Hybrid,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            duplex_url: None,
            rpc_url: None,
            kind: ChannelKind::Duplex,
            headers: HashMap::new(),
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_timeout: default_heartbeat_timeout(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            reconnect: ReconnectConfig::default(),
            queue_depth: default_queue_depth(),
            subscription_buffer: default_subscription_buffer(),
            close_grace: default_close_grace(),
        }
    }

    pub fn wants_duplex(&self) -> bool {
        matches!(self.kind, ChannelKind::Duplex | ChannelKind::Hybrid)
    }

    pub fn wants_pool(&self) -> bool {
        matches!(self.kind, ChannelKind::Pooled | ChannelKind::Hybrid)
    }

    /// Reject configurations the channels cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.wants_duplex() && self.duplex_url.as_deref().map_or(true, str::is_empty) {
            return Err(invalid("duplex channel requires a non-empty duplex_url"));
        }
        if self.wants_pool() && self.rpc_url.as_deref().map_or(true, str::is_empty) {
            return Err(invalid("pooled channel requires a non-empty rpc_url"));
        }
        if self.pool_max == 0 {
            return Err(invalid("pool_max must be at least 1"));
        }
        if self.pool_min > self.pool_max {
            return Err(invalid("pool_min must not exceed pool_max"));
        }
        if self.queue_depth == 0 {
            return Err(invalid("queue_depth must be at least 1"));
        }
        if self.subscription_buffer == 0 {
            return Err(invalid("subscription_buffer must be at least 1"));
        }
        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("connect_timeout", self.connect_timeout),
            ("request_timeout", self.request_timeout),
            ("close_grace", self.close_grace),
            ("reconnect.base_delay", self.reconnect.base_delay),
        ] {
            if value.is_zero() {
                return Err(invalid(&format!("{} must be positive", name)));
            }
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            return Err(invalid("reconnect.max_delay must be >= base_delay"));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_ratio) {
            return Err(invalid("reconnect.jitter_ratio must be within [0, 1]"));
        }
        if self.reconnect.max_attempts == Some(0) {
            return Err(invalid("reconnect.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> LongwireError {
    LongwireError::ConfigInvalid(message.to_string())
}

fn default_pool_min() -> usize {
    1
}

fn default_pool_max() -> usize {
    8
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter_ratio() -> f64 {
    0.1
}

fn default_queue_depth() -> usize {
    64
}

fn default_subscription_buffer() -> usize {
    256
}

fn default_close_grace() -> Duration {
    Duration::from_secs(5)
}
