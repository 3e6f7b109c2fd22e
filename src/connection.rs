//! Connection lifecycle to the analysis engine.
//!
//! `ConnectionManager` is the only component that changes the connection
//! state or the circuit breaker. Concurrent `connect()` callers join the
//! in-flight attempt instead of starting another handshake.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use debrief_commons::SharedClock;
use debrief_config::CalcConfig;
use debrief_config::ConnectionConfig;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::ToolCache;
use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::engine::CalcEngine;
use crate::error::{CalcError, CalcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

enum ConnectAction {
    AlreadyConnected,
    Join,
    Handshake,
}

pub struct ConnectionManager {
    engine: Arc<dyn CalcEngine>,
    state: Mutex<ConnectionState>,
    breaker: CircuitBreaker,
    tool_cache: Arc<ToolCache>,
    config: ConnectionConfig,
}

impl ConnectionManager {
    pub fn new(engine: Arc<dyn CalcEngine>, config: &CalcConfig, clock: SharedClock) -> Self {
        Self {
            engine,
            state: Mutex::new(ConnectionState::Disconnected),
            breaker: CircuitBreaker::new(config.circuit_breaker, Arc::clone(&clock)),
            tool_cache: Arc::new(ToolCache::new(config.tool_cache.ttl(), clock)),
            config: config.connection,
        }
    }

    /// Returns `false` without any I/O while the breaker is open, otherwise
    /// tries to connect.
    pub async fn check_availability(&self) -> bool {
        if self.breaker.is_open() {
            debug!("engine unavailable: circuit breaker open");
            return false;
        }
        match self.connect().await {
            Ok(()) => self.state() == ConnectionState::Connected,
            Err(err) => {
                debug!(error = %err, "engine unavailable");
                false
            }
        }
    }

    /// A `Connected` state whose engine session has died counts as
    /// disconnected and triggers a fresh handshake.
    pub async fn connect(&self) -> CalcResult<()> {
        let session_alive = self.engine.is_session_alive();
        let action = {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Connected if session_alive => ConnectAction::AlreadyConnected,
                ConnectionState::Connecting => ConnectAction::Join,
                ConnectionState::Connected => {
                    info!("analysis engine session lost; reconnecting");
                    *state = ConnectionState::Connecting;
                    ConnectAction::Handshake
                }
                ConnectionState::Disconnected | ConnectionState::Error => {
                    *state = ConnectionState::Connecting;
                    ConnectAction::Handshake
                }
            }
        };

        match action {
            ConnectAction::AlreadyConnected => Ok(()),
            ConnectAction::Join => self.wait_for_connection().await,
            ConnectAction::Handshake => self.handshake().await,
        }
    }

    /// Connect unless the breaker is open and no session exists.
    pub async fn ensure_connected(&self) -> CalcResult<()> {
        if self.state() == ConnectionState::Connected && self.engine.is_session_alive() {
            return Ok(());
        }
        if let Some(retry_in) = self.breaker.remaining_cooldown() {
            return Err(CalcError::CircuitOpen {
                failures: self.breaker.failure_count(),
                retry_in,
            });
        }
        self.connect().await
    }

    async fn handshake(&self) -> CalcResult<()> {
        let mut guard = ConnectingGuard::new(&self.state);
        let timeout = self.config.connection_timeout();
        info!(timeout_ms = self.config.connection_timeout_ms, "connecting to analysis engine");

        let outcome = tokio::time::timeout(timeout, self.engine.handshake()).await;
        guard.disarm();

        match outcome {
            Ok(Ok(())) => {
                self.set_state(ConnectionState::Connected);
                self.breaker.record_success();
                info!("analysis engine connected");
                Ok(())
            }
            Ok(Err(err)) => {
                let message = format!("{err:#}");
                self.set_state(ConnectionState::Error);
                self.breaker.record_failure();
                warn!(error = %message, "analysis engine handshake failed");
                Err(CalcError::Connection(message))
            }
            Err(_) => {
                self.set_state(ConnectionState::Error);
                self.breaker.record_failure();
                warn!(
                    timeout_ms = self.config.connection_timeout_ms,
                    "analysis engine handshake timed out"
                );
                Err(CalcError::Timeout {
                    operation: "engine handshake",
                    after: timeout,
                })
            }
        }
    }

    /// Poll until the in-flight attempt settles or `wait_max` elapses.
    pub async fn wait_for_connection(&self) -> CalcResult<()> {
        let poll = self.config.poll_interval();
        let max_wait = self.config.wait_max();
        let mut waited = Duration::ZERO;

        while waited < max_wait && self.state() == ConnectionState::Connecting {
            tokio::time::sleep(poll).await;
            waited += poll;
        }

        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Connecting => Err(CalcError::Timeout {
                operation: "waiting for connection",
                after: max_wait,
            }),
            other => Err(CalcError::Connection(format!(
                "connection attempt ended in state {other}"
            ))),
        }
    }

    /// Force `Disconnected`, drop the tool cache and end the engine session.
    pub async fn disconnect(&self) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };
        self.tool_cache.invalidate();
        if let Err(err) = self.engine.shutdown().await {
            warn!(error = %format!("{err:#}"), "analysis engine shutdown failed");
        }
        info!(previous = %previous, "disconnected from analysis engine");
    }

    pub fn record_failure(&self) -> u32 {
        self.breaker.record_failure()
    }

    pub fn is_circuit_open(&self) -> bool {
        self.breaker.is_open()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub fn engine(&self) -> &Arc<dyn CalcEngine> {
        &self.engine
    }

    pub fn tool_cache(&self) -> Arc<ToolCache> {
        Arc::clone(&self.tool_cache)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        let previous = *state;
        if previous != next {
            debug!(from = %previous, to = %next, "connection state change");
        }
        *state = next;
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("breaker", &self.breaker)
            .field("config", &self.config)
            .finish()
    }
}

/// Resets a `Connecting` state if the handshake future is dropped mid-flight,
/// so later callers do not wait on an attempt that no longer exists.
struct ConnectingGuard<'a> {
    state: &'a Mutex<ConnectionState>,
    armed: bool,
}

impl<'a> ConnectingGuard<'a> {
    fn new(state: &'a Mutex<ConnectionState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Disconnected;
        }
    }
}
