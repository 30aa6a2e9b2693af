//! Bounded pool of transient request/response sessions
//!
//! No dedicated loop: the pool is purely request-driven. A semaphore
//! with `pool_max` permits bounds how many sessions can ever be live at
//! once; idle sessions wait in a queue and are reused in arrival order.
//! Health is opportunistic — a failed call discards its session and a
//! replacement is created on the next acquire.

use crate::core::config::ConnectionConfig;
use crate::core::connection_state::{AtomicConnectionState, ConnectionState};
use crate::core::stats::AtomicStats;
use crate::traits::error::{LongwireError, Result};
use crate::traits::sink::{EventRecord, EventSink, HandleId};
use crate::traits::transport::{RpcTransport, TransportFactory};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

struct PooledSession {
    transport: Box<dyn RpcTransport>,
}

struct PoolShared {
    idle: Mutex<VecDeque<PooledSession>>,
    live: AtomicUsize,
}

/// Bounded request/response channel over reusable sessions
pub struct PooledChannel {
    handle_id: HandleId,
    config: Arc<ConnectionConfig>,
    factory: Arc<dyn TransportFactory>,
    semaphore: Arc<Semaphore>,
    shared: Arc<PoolShared>,
    state: Arc<AtomicConnectionState>,
    stats: Arc<AtomicStats>,
    sink: Arc<dyn EventSink>,
}

impl PooledChannel {
    pub(crate) fn new(
        handle_id: HandleId,
        config: Arc<ConnectionConfig>,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn EventSink>,
        stats: Arc<AtomicStats>,
    ) -> Self {
        let shared = Arc::new(PoolShared {
            idle: Mutex::new(VecDeque::new()),
            live: AtomicUsize::new(0),
        });
        let state = Arc::new(AtomicConnectionState::new(ConnectionState::Connected));

        let pool = Self {
            handle_id,
            semaphore: Arc::new(Semaphore::new(config.pool_max)),
            config,
            factory,
            shared,
            state,
            stats,
            sink,
        };
        pool.spawn_warmup();
        pool
    }

    /// Pre-create `pool_min` idle sessions without blocking the caller
    fn spawn_warmup(&self) {
        let min = self.config.pool_min;
        if min == 0 {
            return;
        }
        let factory = Arc::clone(&self.factory);
        let config = Arc::clone(&self.config);
        let shared = Arc::clone(&self.shared);
        let stats = Arc::clone(&self.stats);
        let state = Arc::clone(&self.state);
        let semaphore = Arc::clone(&self.semaphore);
        let handle_id = self.handle_id;

        tokio::spawn(async move {
            for _ in 0..min {
                if state.get() == ConnectionState::Closed {
                    return;
                }
                // hold a permit while creating so warmed sessions count
                // against the same bound as on-demand ones
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                stats.record_connect_attempt();
                match factory.create(&config).await {
                    Ok(transport) => {
                        stats.record_connected(false);
                        shared.live.fetch_add(1, Ordering::Relaxed);
                        shared
                            .idle
                            .lock()
                            .push_back(PooledSession { transport });
                    }
                    Err(e) => {
                        warn!("handle {} pool warmup failed: {}", handle_id, e);
                        return;
                    }
                }
                drop(permit);
            }
            debug!("handle {} warmed {} pooled session(s)", handle_id, min);
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Sessions currently live (idle + checked out); never exceeds
    /// `pool_max`
    pub fn live_sessions(&self) -> usize {
        self.shared.live.load(Ordering::Relaxed)
    }

    /// Check out a session, waiting up to the request timeout for a
    /// permit. Fails with `PoolExhausted` on deadline, `Cancelled` once
    /// the pool is closed.
    pub async fn acquire(&self) -> Result<SessionGuard> {
        if self.state.get() == ConnectionState::Closed {
            return Err(LongwireError::Cancelled);
        }

        let permit = match tokio::time::timeout(
            self.config.request_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(LongwireError::Cancelled),
            Err(_) => {
                return Err(LongwireError::PoolExhausted {
                    max: self.config.pool_max,
                })
            }
        };

        let session = { self.shared.idle.lock().pop_front() };
        let session = match session {
            Some(session) => session,
            None => {
                self.stats.record_connect_attempt();
                match self.factory.create(&self.config).await {
                    Ok(transport) => {
                        self.stats.record_connected(false);
                        self.shared.live.fetch_add(1, Ordering::Relaxed);
                        PooledSession { transport }
                    }
                    Err(e) => {
                        self.stats.record_request_failed();
                        return Err(e);
                    }
                }
            }
        };

        Ok(SessionGuard {
            session: Some(session),
            _permit: permit,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Acquire, send, await the response, release. I/O errors discard
    /// the session and surface as retryable; the pool never retries on
    /// the caller's behalf.
    pub async fn request(&self, payload: &Value) -> Result<Value> {
        let guard = self.acquire().await?;
        self.stats.record_request_sent();
        let started = Instant::now();

        match tokio::time::timeout(self.config.request_timeout, guard.call(payload)).await {
            Ok(Ok(value)) => {
                self.stats.record_latency(started.elapsed());
                guard.release(true);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.stats.record_request_failed();
                self.sink.emit(EventRecord::RequestFailed {
                    handle: self.handle_id,
                    reason: e.to_string(),
                });
                guard.release(false);
                Err(e)
            }
            Err(_) => {
                // a late response could still arrive on this session, so
                // it cannot be reused
                self.stats.record_request_timeout();
                self.sink.emit(EventRecord::RequestFailed {
                    handle: self.handle_id,
                    reason: "request timed out".into(),
                });
                guard.release(false);
                Err(LongwireError::RequestTimeout)
            }
        }
    }

    /// Close the pool: waiters inside `acquire` resolve with `Cancelled`,
    /// idle sessions are dropped.
    pub(crate) fn close(&self) {
        self.state.set(ConnectionState::Closed);
        self.semaphore.close();
        let drained = {
            let mut idle = self.shared.idle.lock();
            let count = idle.len();
            idle.clear();
            count
        };
        self.shared.live.fetch_sub(drained, Ordering::Relaxed);
        info!("handle {} pool closed", self.handle_id);
    }
}

/// One checked-out session; returning it to the pool is explicit, and
/// dropping the guard without releasing discards the session.
pub struct SessionGuard {
    session: Option<PooledSession>,
    _permit: OwnedSemaphorePermit,
    shared: Arc<PoolShared>,
}

impl SessionGuard {
    /// Issue one call on the checked-out session
    pub async fn call(&self, payload: &Value) -> Result<Value> {
        match &self.session {
            Some(session) => session.transport.call(payload).await,
            None => Err(LongwireError::Cancelled),
        }
    }

    /// Return the session: healthy sessions rejoin the idle set,
    /// unhealthy ones are discarded so a replacement can be created on
    /// the next acquire.
    pub fn release(mut self, healthy: bool) {
        if let Some(session) = self.session.take() {
            if healthy {
                self.shared.idle.lock().push_back(session);
            } else {
                self.shared.live.fetch_sub(1, Ordering::Relaxed);
            }
        }
        // permit drops here, freeing a slot
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            self.shared.live.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
