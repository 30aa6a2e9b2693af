//! Request/response transport seam for pooled sessions
//!
//! A pooled channel never touches the network directly: it acquires
//! sessions built by a `TransportFactory` and issues calls through the
//! `RpcTransport` they implement. The default factory builds one
//! keep-alive `reqwest` client per session; tests substitute in-memory
//! transports.

use crate::core::config::ConnectionConfig;
use crate::traits::error::{LongwireError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::warn;

/// One reusable request/response session
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send a request payload and await its response
    async fn call(&self, payload: &Value) -> Result<Value>;
}

/// Creates sessions for a pooled channel
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    async fn create(&self, config: &ConnectionConfig) -> Result<Box<dyn RpcTransport>>;
}

/// HTTP session: a dedicated keep-alive client posting JSON bodies
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, payload: &Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| LongwireError::ConnectFailed(e.to_string()))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| LongwireError::Codec(e.to_string()))
    }
}

/// Default factory for HTTP sessions
pub struct HttpFactory;

#[async_trait]
impl TransportFactory for HttpFactory {
    async fn create(&self, config: &ConnectionConfig) -> Result<Box<dyn RpcTransport>> {
        let url = config
            .rpc_url
            .clone()
            .ok_or_else(|| LongwireError::ConfigInvalid("pooled channel without rpc_url".into()))?;

        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            match (
                key.parse::<HeaderName>(),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => {
                    warn!("skipping invalid header '{}'", key);
                }
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LongwireError::ConnectFailed(e.to_string()))?;

        Ok(Box::new(HttpTransport { client, url }))
    }
}
