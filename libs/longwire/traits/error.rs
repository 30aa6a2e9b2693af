use thiserror::Error;

/// Main error type for longwire
#[derive(Error, Debug)]
pub enum LongwireError {
    /// Configuration rejected at `open`
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Transient network failure; drives reconnection for persistent
    /// channels and is the retryable per-call error for pooled sessions
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Liveness probe went unanswered
    #[error("heartbeat timed out after {misses} consecutive missed probes")]
    HeartbeatTimeout { misses: u32 },

    /// A single request exceeded its deadline; the channel stays up
    #[error("request timed out")]
    RequestTimeout,

    /// All pooled sessions busy for the full acquire deadline
    #[error("pool exhausted: all {max} sessions busy")]
    PoolExhausted { max: usize },

    /// Outbound queue full while the channel is connecting
    #[error("outbound queue full")]
    Backpressure,

    /// The owning handle was closed mid-request
    #[error("cancelled: handle closed")]
    Cancelled,

    /// Reconnect attempt budget exhausted; the handle is unusable until
    /// explicitly closed and reopened
    #[error("retry budget exhausted after {attempts} attempts")]
    RetryBudgetExhausted { attempts: u32 },

    /// Registry lookup miss
    #[error("handle not found: {0}")]
    HandleNotFound(u64),

    /// Unknown subscription identifier
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(u64),

    /// Inbound frame could not be decoded
    #[error("frame decode error: {0}")]
    Codec(String),
}

impl LongwireError {
    /// Whether a caller may reasonably retry the operation on the same
    /// handle. `Cancelled`, `RetryBudgetExhausted` and `ConfigInvalid`
    /// require caller action first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LongwireError::ConnectFailed(_)
                | LongwireError::HeartbeatTimeout { .. }
                | LongwireError::RequestTimeout
                | LongwireError::PoolExhausted { .. }
                | LongwireError::Backpressure
        )
    }
}

/// Result type for longwire operations
pub type Result<T> = std::result::Result<T, LongwireError>;
