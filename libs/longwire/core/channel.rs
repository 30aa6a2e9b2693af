//! Persistent duplex channel
//!
//! One tokio task per channel owns the socket, the pending-request map
//! and every state transition. Callers talk to it over a bounded command
//! queue: request writes, cancellations and shutdown all serialize
//! through the task, so no two loops ever observe the socket or the
//! state inconsistently, and wire writes never interleave.
//!
//! Lifecycle: connect, drive the socket until it drops, resolve what
//! must be resolved, back off, reconnect. Subscriptions survive the
//! reconnect cycle; pending requests do not (they resolve with a
//! transient error so callers may retry).

use crate::core::config::ConnectionConfig;
use crate::core::connection_state::{AtomicConnectionState, ConnectionState};
use crate::core::heartbeat::{HeartbeatMonitor, ProbeVerdict};
use crate::core::stats::AtomicStats;
use crate::core::subscriptions::{EventFilter, Subscription, SubscriptionSet};
use crate::traits::codec::FrameCodec;
use crate::traits::error::{LongwireError, Result};
use crate::traits::reconnect::{ExponentialBackoff, ReconnectionStrategy};
use crate::traits::sink::{EventRecord, EventSink, HandleId};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How often backoff sleeps re-check the shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

enum Command {
    Request {
        id: u64,
        payload: Value,
        reply: oneshot::Sender<Result<Value>>,
        deadline: Instant,
    },
    Cancel {
        id: u64,
    },
    Shutdown,
}

struct PendingRequest {
    reply: oneshot::Sender<Result<Value>>,
    deadline: Instant,
}

/// Why the connected phase ended
enum Exit {
    Shutdown,
    Lost(String),
}

/// Caller-facing half of a persistent duplex connection
///
/// The handle outlives individual sockets: requests and subscriptions
/// keep working across reconnects without the caller noticing beyond a
/// transient error window.
pub struct PersistentChannel {
    handle_id: HandleId,
    config: Arc<ConnectionConfig>,
    state: Arc<AtomicConnectionState>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    stats: Arc<AtomicStats>,
    subs: Arc<SubscriptionSet>,
    command_tx: mpsc::Sender<Command>,
    next_request_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PersistentChannel {
    /// Spawn the channel task. Returns immediately; the first connect
    /// happens asynchronously.
    pub(crate) fn spawn(
        handle_id: HandleId,
        config: Arc<ConnectionConfig>,
        codec: Arc<dyn FrameCodec>,
        sink: Arc<dyn EventSink>,
        stats: Arc<AtomicStats>,
    ) -> Self {
        let state = Arc::new(AtomicConnectionState::new(ConnectionState::Disconnected));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let state_tx = Arc::new(state_tx);
        let subs = Arc::new(SubscriptionSet::new(
            handle_id,
            Arc::clone(&stats),
            Arc::clone(&sink),
        ));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (command_tx, command_rx) = mpsc::channel(config.queue_depth);

        let ctx = ChannelCtx {
            handle_id,
            strategy: Box::new(ExponentialBackoff::from_config(&config.reconnect)),
            config: Arc::clone(&config),
            codec,
            sink,
            stats: Arc::clone(&stats),
            state: Arc::clone(&state),
            state_tx: Arc::clone(&state_tx),
            subs: Arc::clone(&subs),
            shutdown: Arc::clone(&shutdown),
        };

        let task = tokio::spawn(run_channel(ctx, command_rx));

        Self {
            handle_id,
            config,
            state,
            state_tx,
            stats,
            subs,
            command_tx,
            next_request_id: AtomicU64::new(0),
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Issue a correlated request and await its response.
    ///
    /// While the channel is between sockets the request queues (bounded;
    /// a full queue yields `Backpressure`). The call resolves exactly
    /// once: response, `RequestTimeout`, a transient `ConnectFailed` if
    /// the socket drops underneath it, or `Cancelled` on close.
    pub async fn request(&self, payload: Value) -> Result<Value> {
        match self.state.get() {
            ConnectionState::Failed => {
                return Err(LongwireError::RetryBudgetExhausted {
                    attempts: self.stats.connect_attempts() as u32,
                })
            }
            ConnectionState::Closed => return Err(LongwireError::Cancelled),
            _ => {}
        }

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply_tx, reply_rx) = oneshot::channel();
        let deadline = Instant::now() + self.config.request_timeout;

        let command = Command::Request {
            id,
            payload,
            reply: reply_tx,
            deadline,
        };
        self.command_tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LongwireError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => LongwireError::Cancelled,
        })?;

        let started = Instant::now();
        match tokio::time::timeout(self.config.request_timeout, reply_rx).await {
            Ok(Ok(Ok(value))) => {
                self.stats.record_latency(started.elapsed());
                Ok(value)
            }
            Ok(Ok(Err(e))) => {
                self.stats.record_request_failed();
                Err(e)
            }
            // task went away without resolving the slot (force-release)
            Ok(Err(_)) => {
                self.stats.record_request_failed();
                Err(LongwireError::Cancelled)
            }
            Err(_) => {
                let _ = self.command_tx.try_send(Command::Cancel { id });
                self.stats.record_request_timeout();
                Err(LongwireError::RequestTimeout)
            }
        }
    }

    /// Register a subscription against this channel's event stream
    pub fn subscribe(&self, filter: EventFilter) -> Result<Subscription> {
        match self.state.get() {
            ConnectionState::Closed => Err(LongwireError::Cancelled),
            ConnectionState::Failed => Err(LongwireError::RetryBudgetExhausted {
                attempts: self.stats.connect_attempts() as u32,
            }),
            _ => Ok(self.subs.subscribe(filter, self.config.subscription_buffer)),
        }
    }

    pub(crate) fn subscriptions(&self) -> &Arc<SubscriptionSet> {
        &self.subs
    }

    /// Block until the channel is usable, or fail with the terminal
    /// error / `RequestTimeout` if `wait` elapses first
    pub async fn wait_ready(&self, wait: Duration) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        let settled = async {
            loop {
                let current = *rx.borrow_and_update();
                match current {
                    ConnectionState::Connected | ConnectionState::Degraded => return Ok(()),
                    ConnectionState::Failed => {
                        return Err(LongwireError::RetryBudgetExhausted {
                            attempts: self.stats.connect_attempts() as u32,
                        })
                    }
                    ConnectionState::Closed => return Err(LongwireError::Cancelled),
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(LongwireError::Cancelled);
                }
            }
        };
        tokio::time::timeout(wait, settled)
            .await
            .map_err(|_| LongwireError::RequestTimeout)?
    }

    /// Stop the channel: pending requests resolve with `Cancelled`,
    /// subscriptions are removed, and the task gets `close_grace` to
    /// wind down before it is aborted.
    pub(crate) async fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.command_tx.try_send(Command::Shutdown);

        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(self.config.close_grace, &mut task)
                .await
                .is_err()
            {
                warn!(
                    "handle {} channel task exceeded close grace, aborting",
                    self.handle_id
                );
                task.abort();
                self.state.set(ConnectionState::Closed);
                self.state_tx.send_replace(ConnectionState::Closed);
            }
        }
        self.subs.clear();
    }
}

/// Everything the channel task owns
struct ChannelCtx {
    handle_id: HandleId,
    config: Arc<ConnectionConfig>,
    codec: Arc<dyn FrameCodec>,
    sink: Arc<dyn EventSink>,
    stats: Arc<AtomicStats>,
    state: Arc<AtomicConnectionState>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    subs: Arc<SubscriptionSet>,
    shutdown: Arc<AtomicBool>,
    strategy: Box<dyn ReconnectionStrategy>,
}

impl ChannelCtx {
    fn transition(&self, next: ConnectionState) {
        let prev = self.state.get();
        if prev == next {
            return;
        }
        if !prev.may_transition_to(next) {
            warn!(
                "handle {} illegal transition {} -> {}",
                self.handle_id, prev, next
            );
        }
        debug!("handle {} state {} -> {}", self.handle_id, prev, next);
        self.state.set(next);
        self.state_tx.send_replace(next);
        self.sink.emit(EventRecord::StateChanged {
            handle: self.handle_id,
            from: prev,
            to: next,
        });
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Main channel task: connect/reconnect loop around the connected phase
async fn run_channel(ctx: ChannelCtx, mut command_rx: mpsc::Receiver<Command>) {
    let mut failures: u32 = 0;

    loop {
        if ctx.is_shutting_down() {
            finish_closed(&ctx, &mut command_rx);
            return;
        }

        ctx.transition(ConnectionState::Connecting);
        ctx.stats.record_connect_attempt();

        let connect = connect_with_headers(&ctx);
        match tokio::time::timeout(ctx.config.connect_timeout, connect).await {
            Ok(Ok(ws_stream)) => {
                info!(
                    "handle {} connected to {}",
                    ctx.handle_id,
                    ctx.config.duplex_url.as_deref().unwrap_or_default()
                );
                ctx.stats.record_connected(failures > 0);
                failures = 0;
                ctx.transition(ConnectionState::Connected);

                match drive(ws_stream, &ctx, &mut command_rx).await {
                    Exit::Shutdown => {
                        finish_closed(&ctx, &mut command_rx);
                        return;
                    }
                    Exit::Lost(reason) => {
                        warn!("handle {} connection lost: {}", ctx.handle_id, reason);
                        ctx.transition(ConnectionState::Reconnecting);
                    }
                }
            }
            Ok(Err(e)) => {
                warn!("handle {} connect failed: {}", ctx.handle_id, e);
            }
            Err(_) => {
                warn!(
                    "handle {} connect timed out after {:?}",
                    ctx.handle_id, ctx.config.connect_timeout
                );
            }
        }

        if ctx.is_shutting_down() {
            finish_closed(&ctx, &mut command_rx);
            return;
        }

        failures += 1;
        if !ctx.strategy.should_reconnect(failures) {
            finish_failed(&ctx, &mut command_rx, failures).await;
            return;
        }

        // delay for the upcoming retry; index 0 is the base delay
        let delay = ctx
            .strategy
            .next_delay(failures - 1)
            .unwrap_or(ctx.config.reconnect.base_delay);
        ctx.transition(ConnectionState::Reconnecting);
        info!(
            "handle {} reconnecting in {:?} (attempt {})",
            ctx.handle_id,
            delay,
            failures + 1
        );

        // sleep in short slices so an explicit close interrupts promptly
        let mut elapsed = Duration::ZERO;
        while elapsed < delay {
            if ctx.is_shutting_down() {
                finish_closed(&ctx, &mut command_rx);
                return;
            }
            let step = SHUTDOWN_POLL.min(delay - elapsed);
            tokio::time::sleep(step).await;
            elapsed += step;
        }
    }
}

/// Build the handshake request, applying configured static headers
async fn connect_with_headers(ctx: &ChannelCtx) -> std::result::Result<WsStream, String> {
    let url = ctx.config.duplex_url.as_deref().unwrap_or_default();

    let mut request = url
        .into_client_request()
        .map_err(|e| format!("bad duplex url: {}", e))?;
    for (key, value) in &ctx.config.headers {
        match (
            key.parse::<http::header::HeaderName>(),
            value.parse::<http::header::HeaderValue>(),
        ) {
            (Ok(name), Ok(value)) => {
                request.headers_mut().insert(name, value);
            }
            _ => {
                warn!("handle {} skipping invalid header '{}'", ctx.handle_id, key);
            }
        }
    }

    match connect_async(request).await {
        Ok((ws_stream, _)) => Ok(ws_stream),
        Err(e) => Err(e.to_string()),
    }
}

/// Connected phase: owns the socket halves and the pending-request map
async fn drive(
    ws_stream: WsStream,
    ctx: &ChannelCtx,
    command_rx: &mut mpsc::Receiver<Command>,
) -> Exit {
    let (mut write, mut read) = ws_stream.split();
    let mut pending: HashMap<u64, PendingRequest> = HashMap::new();
    let mut monitor = HeartbeatMonitor::new();
    let mut probe_deadline: Option<Instant> = None;

    let mut heartbeat = tokio::time::interval(ctx.config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await; // skip the immediate first tick

    let sweep_every = (ctx.config.request_timeout / 4)
        .max(Duration::from_millis(50))
        .min(Duration::from_secs(1));
    let mut sweep = tokio::time::interval(sweep_every);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        if ctx.is_shutting_down() {
            let _ = write.close().await;
            fail_all(&mut pending, || LongwireError::Cancelled);
            return Exit::Shutdown;
        }

        tokio::select! {
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(exit) = handle_frame(
                            &text,
                            ctx,
                            &mut write,
                            &mut pending,
                            &mut monitor,
                            &mut probe_deadline,
                        )
                        .await
                        {
                            fail_all(&mut pending, transient_loss);
                            return exit;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("handle {} received close frame", ctx.handle_id);
                    }
                    // control frames are handled at the protocol layer
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("handle {} socket error: {}", ctx.handle_id, e);
                        fail_all(&mut pending, transient_loss);
                        return Exit::Lost(e.to_string());
                    }
                    None => {
                        fail_all(&mut pending, transient_loss);
                        return Exit::Lost("stream ended".into());
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(Command::Request { id, payload, reply, deadline }) => {
                        if Instant::now() >= deadline {
                            // queued past its deadline while we were
                            // between sockets; the caller already gave up
                            let _ = reply.send(Err(LongwireError::RequestTimeout));
                            continue;
                        }
                        let raw = ctx.codec.encode_request(id, &payload);
                        if let Err(e) = write.send(Message::Text(raw)).await {
                            let _ = reply.send(Err(transient_loss()));
                            ctx.sink.emit(EventRecord::RequestFailed {
                                handle: ctx.handle_id,
                                reason: e.to_string(),
                            });
                            fail_all(&mut pending, transient_loss);
                            return Exit::Lost(e.to_string());
                        }
                        ctx.stats.record_request_sent();
                        pending.insert(id, PendingRequest { reply, deadline });
                    }
                    Some(Command::Cancel { id }) => {
                        pending.remove(&id);
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = write.close().await;
                        fail_all(&mut pending, || LongwireError::Cancelled);
                        return Exit::Shutdown;
                    }
                }
            }

            _ = heartbeat.tick() => {
                // only probe when the previous one has been settled
                if probe_deadline.is_none() {
                    if let Err(e) = write.send(Message::Text(ctx.codec.probe())).await {
                        fail_all(&mut pending, transient_loss);
                        return Exit::Lost(format!("probe write failed: {}", e));
                    }
                    monitor.probe_sent();
                    probe_deadline = Some(Instant::now() + ctx.config.heartbeat_timeout);
                }
            }

            _ = probe_timeout(probe_deadline) => {
                probe_deadline = None;
                ctx.stats.record_heartbeat_failure();
                let verdict = monitor.probe_missed();
                ctx.sink.emit(EventRecord::HeartbeatFailed {
                    handle: ctx.handle_id,
                    consecutive: monitor.consecutive_misses(),
                });
                match verdict {
                    ProbeVerdict::Degrade => ctx.transition(ConnectionState::Degraded),
                    ProbeVerdict::Teardown => {
                        let misses = monitor.consecutive_misses();
                        let _ = write.close().await;
                        fail_all(&mut pending, transient_loss);
                        return Exit::Lost(
                            LongwireError::HeartbeatTimeout { misses }.to_string(),
                        );
                    }
                }
            }

            _ = sweep.tick() => {
                let now = Instant::now();
                let expired: Vec<u64> = pending
                    .iter()
                    .filter(|(_, p)| p.deadline <= now)
                    .map(|(id, _)| *id)
                    .collect();
                for id in expired {
                    if let Some(p) = pending.remove(&id) {
                        let _ = p.reply.send(Err(LongwireError::RequestTimeout));
                        ctx.sink.emit(EventRecord::RequestFailed {
                            handle: ctx.handle_id,
                            reason: "request timed out".into(),
                        });
                    }
                }
            }
        }
    }
}

/// Sleep until the outstanding probe's deadline, or forever if none
async fn probe_timeout(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Decode and route one inbound text message. Returns an exit only when
/// the socket must be torn down.
async fn handle_frame(
    raw: &str,
    ctx: &ChannelCtx,
    write: &mut futures::stream::SplitSink<WsStream, Message>,
    pending: &mut HashMap<u64, PendingRequest>,
    monitor: &mut HeartbeatMonitor,
    probe_deadline: &mut Option<Instant>,
) -> Option<Exit> {
    let frame = match ctx.codec.decode(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("handle {} undecodable frame: {}", ctx.handle_id, e);
            ctx.stats.record_unrouted_frame();
            return None;
        }
    };

    // server-initiated probe: answer immediately, never dispatch
    if let Some(reply) = ctx.codec.probe_reply(&frame) {
        if let Err(e) = write.send(Message::Text(reply)).await {
            return Some(Exit::Lost(format!("probe reply write failed: {}", e)));
        }
        return None;
    }

    // reply to our own probe: settle the deadline, maybe recover
    if ctx.codec.is_probe_reply(&frame) {
        *probe_deadline = None;
        if let Some(rtt) = monitor.reply_seen() {
            ctx.stats.record_latency(rtt);
        }
        if ctx.state.get() == ConnectionState::Degraded {
            ctx.transition(ConnectionState::Connected);
        }
        ctx.stats.touch();
        return None;
    }

    // correlated response
    if let Some(id) = frame.correlation_id {
        if let Some(p) = pending.remove(&id) {
            let _ = p.reply.send(Ok(frame.payload));
            ctx.stats.touch();
        } else {
            // late response after timeout, or a stray id
            ctx.stats.record_unrouted_frame();
        }
        return None;
    }

    // unsolicited event
    if ctx.subs.dispatch(&frame) == 0 {
        ctx.stats.record_unrouted_frame();
    }
    None
}

fn transient_loss() -> LongwireError {
    LongwireError::ConnectFailed("connection lost, request may be retried".into())
}

fn fail_all(pending: &mut HashMap<u64, PendingRequest>, make_err: impl Fn() -> LongwireError) {
    for (_, p) in pending.drain() {
        let _ = p.reply.send(Err(make_err()));
    }
}

/// Terminal close: drain queued commands, drop subscriptions
fn finish_closed(ctx: &ChannelCtx, command_rx: &mut mpsc::Receiver<Command>) {
    command_rx.close();
    while let Ok(command) = command_rx.try_recv() {
        if let Command::Request { reply, .. } = command {
            let _ = reply.send(Err(LongwireError::Cancelled));
        }
    }
    ctx.subs.clear();
    ctx.transition(ConnectionState::Closed);
    info!("handle {} channel task exiting", ctx.handle_id);
}

/// Terminal failure: budget exhausted. The task parks to keep answering
/// queued requests with the terminal error until the handle is closed.
async fn finish_failed(ctx: &ChannelCtx, command_rx: &mut mpsc::Receiver<Command>, attempts: u32) {
    ctx.transition(ConnectionState::Failed);
    ctx.subs.clear();
    ctx.sink.emit(EventRecord::RetryBudgetExhausted {
        handle: ctx.handle_id,
        attempts,
    });
    error!(
        "handle {} gave up after {} connect attempts",
        ctx.handle_id, attempts
    );

    while let Some(command) = command_rx.recv().await {
        match command {
            Command::Request { reply, .. } => {
                let _ = reply.send(Err(LongwireError::RetryBudgetExhausted { attempts }));
            }
            Command::Cancel { .. } => {}
            Command::Shutdown => break,
        }
        if ctx.is_shutting_down() {
            break;
        }
    }
    finish_closed(ctx, command_rx);
}
