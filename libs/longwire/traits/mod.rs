//! # Longwire Traits
//!
//! Core traits and types for the longwire connection manager:
//!
//! - **FrameCodec**: encode/decode wire frames, liveness probe vocabulary
//! - **ReconnectionStrategy**: control reconnection behavior
//! - **EventSink**: receive structured connection events/errors
//! - **RpcTransport / TransportFactory**: pooled session seam

pub mod codec;
pub mod error;
pub mod reconnect;
pub mod sink;
pub mod transport;

// Re-export commonly used types
pub use codec::{Frame, FrameCodec, JsonRpcCodec};
pub use error::{LongwireError, Result};
pub use reconnect::{ExponentialBackoff, FixedDelay, NeverReconnect, ReconnectionStrategy};
pub use sink::{EventRecord, EventSink, HandleId, LogSink, NoOpSink, QueueSink, SubscriptionId};
pub use transport::{HttpFactory, HttpTransport, RpcTransport, TransportFactory};
