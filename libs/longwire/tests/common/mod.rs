//! Common test utilities for longwire integration tests
//!
//! Provides a mock duplex endpoint speaking the `JsonRpcCodec` dialect:
//! probes get pong replies, correlated requests get responses, and the
//! server can push a stream of notification events. Connections can be
//! killed while the listener keeps accepting, which is what reconnect
//! tests need.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Behavior switches for the mock endpoint
#[derive(Debug, Clone, Default)]
pub struct MockServerOptions {
    /// Do not answer liveness probes (heartbeat-failure tests)
    pub silent_probes: bool,
    /// Accept correlated requests but never respond (cancellation tests)
    pub swallow_requests: bool,
    /// Push `{"method": kind, "params": {"seq": N}}` notifications on
    /// this period, forever, on every connection
    pub emit_events: Option<(String, Duration)>,
}

/// A mock duplex server for testing
pub struct MockWsServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    kill: Arc<Notify>,
    accepted: Arc<AtomicUsize>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        Self::start_with(MockServerOptions::default()).await
    }

    pub async fn start_with(options: MockServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let kill = Arc::new(Notify::new());
        let accepted = Arc::new(AtomicUsize::new(0));

        let shutdown_accept = shutdown.clone();
        let kill_accept = kill.clone();
        let accepted_accept = accepted.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                accepted_accept.fetch_add(1, Ordering::SeqCst);
                                let options = options.clone();
                                let shutdown = shutdown_accept.clone();
                                let kill = kill_accept.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, options, shutdown, kill).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_accept.notified() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown,
            kill,
            accepted,
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        options: MockServerOptions,
        shutdown: Arc<Notify>,
        kill: Arc<Notify>,
    ) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("websocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        let mut emitter = options
            .emit_events
            .as_ref()
            .map(|(_, period)| tokio::time::interval(*period));
        let mut seq: u64 = 0;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let parsed: Value = match serde_json::from_str(&text) {
                                Ok(v) => v,
                                Err(_) => continue,
                            };

                            if parsed.get("method").and_then(Value::as_str) == Some("ping")
                                && parsed.get("id").is_none()
                            {
                                if !options.silent_probes {
                                    let pong = json!({ "method": "pong" }).to_string();
                                    if write.send(Message::Text(pong)).await.is_err() {
                                        break;
                                    }
                                }
                                continue;
                            }

                            if let Some(id) = parsed.get("id").and_then(Value::as_u64) {
                                if options.swallow_requests {
                                    continue;
                                }
                                let response = json!({
                                    "id": id,
                                    "result": { "echo": parsed.get("method") },
                                })
                                .to_string();
                                if write.send(Message::Text(response)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    }
                }
                _ = async {
                    match emitter.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending().await,
                    }
                } => {
                    let (kind, _) = options.emit_events.as_ref().unwrap();
                    let event = json!({ "method": kind, "params": { "seq": seq } }).to_string();
                    seq += 1;
                    if write.send(Message::Text(event)).await.is_err() {
                        break;
                    }
                }
                _ = kill.notified() => break,
                _ = shutdown.notified() => break,
            }
        }
    }

    /// Get the WebSocket URL for this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// How many connections the listener has accepted
    pub fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Drop every live connection but keep accepting new ones
    pub fn kill_connections(&self) {
        self.kill.notify_waiters();
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An address that refuses connections: bind a listener for a free port,
/// then drop it before anyone dials in
pub async fn refused_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

/// Poll `probe` until it returns true or `limit` elapses
pub async fn wait_until<F>(limit: Duration, mut probe: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    probe()
}
