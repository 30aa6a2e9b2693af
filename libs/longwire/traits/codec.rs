//! Wire frame model and codec seam
//!
//! A `Frame` is the decoded form of one inbound text message: an optional
//! correlation ID (responses to our own requests), an optional kind
//! (unsolicited events carry one, responses usually don't), and the raw
//! JSON payload. The codec also owns the liveness-probe vocabulary so the
//! channel core stays protocol-agnostic.

use crate::traits::error::{LongwireError, Result};
use serde_json::{json, Value};

/// One decoded inbound message
#[derive(Debug, Clone)]
pub struct Frame {
    /// Echoed request ID, when this frame answers an outbound request
    pub correlation_id: Option<u64>,
    /// Event kind for unsolicited frames (e.g. a notification method name)
    pub kind: Option<String>,
    /// Full decoded payload
    pub payload: Value,
}

impl Frame {
    /// Whether this frame is an unsolicited event rather than a response
    pub fn is_event(&self) -> bool {
        self.correlation_id.is_none() && self.kind.is_some()
    }
}

/// Encoding/decoding of frames for one wire protocol
///
/// Decoding runs inline in the channel's read loop (frames must be
/// dispatched in arrival order), so implementations should be fast and
/// allocation-light.
pub trait FrameCodec: Send + Sync + 'static {
    /// Encode an outbound request, embedding the correlation ID
    fn encode_request(&self, id: u64, payload: &Value) -> String;

    /// Decode one raw text message into a frame
    fn decode(&self, raw: &str) -> Result<Frame>;

    /// Outbound liveness probe payload
    fn probe(&self) -> String;

    /// Whether an inbound frame answers our liveness probe
    fn is_probe_reply(&self, frame: &Frame) -> bool;

    /// If the server sent us a probe of its own, the reply to send back.
    /// Server probes are answered immediately and never dispatched.
    fn probe_reply(&self, frame: &Frame) -> Option<String>;
}

/// JSON-RPC style codec: `{"id": N, "method": "...", "params": [...]}`
/// requests, responses echoing `id`, notifications carrying `method`
/// without `id`. Probes are `ping`/`pong` notifications.
#[derive(Debug, Default, Clone)]
pub struct JsonRpcCodec;

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self
    }
}

impl FrameCodec for JsonRpcCodec {
    fn encode_request(&self, id: u64, payload: &Value) -> String {
        let body = match payload {
            Value::Object(fields) => {
                let mut fields = fields.clone();
                fields.insert("id".to_string(), json!(id));
                Value::Object(fields)
            }
            other => json!({ "id": id, "params": other }),
        };
        body.to_string()
    }

    fn decode(&self, raw: &str) -> Result<Frame> {
        let payload: Value =
            serde_json::from_str(raw).map_err(|e| LongwireError::Codec(e.to_string()))?;
        let correlation_id = payload.get("id").and_then(Value::as_u64);
        let kind = payload
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Frame {
            correlation_id,
            kind,
            payload,
        })
    }

    fn probe(&self) -> String {
        r#"{"method":"ping"}"#.to_string()
    }

    fn is_probe_reply(&self, frame: &Frame) -> bool {
        frame.kind.as_deref() == Some("pong")
    }

    fn probe_reply(&self, frame: &Frame) -> Option<String> {
        if frame.kind.as_deref() == Some("ping") && frame.correlation_id.is_none() {
            Some(r#"{"method":"pong"}"#.to_string())
        } else {
            None
        }
    }
}
