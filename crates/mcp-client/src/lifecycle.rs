//! The connection-manager state machine (C3): one instance per configured
//! MCP server, running a connection-maintenance task and a health-check
//! task in the background, both cancellable via a shared stop signal.
//!
//! `McpServer::initialize` already performs the handshake (`initialize`,
//! `notifications/initialized`, `tools/list`); this module wraps that in
//! the state machine the spec requires, adds exponential-backoff
//! reconnection, and publishes lifecycle events onto the shared
//! `EventBus`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sa_domain::config::{McpConnectionConfig, McpServerConfig};
use sa_domain::event::{ConnectionStatus, DomainEvent, EventBus};
use tokio::sync::Notify;

use crate::manager::{McpError, McpServer};
use crate::protocol::{McpToolDef, ToolCallResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl From<ConnectionState> for ConnectionStatus {
    fn from(s: ConnectionState) -> Self {
        match s {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Connected => ConnectionStatus::Connected,
            ConnectionState::Reconnecting => ConnectionStatus::Reconnecting,
            ConnectionState::Error => ConnectionStatus::Error,
        }
    }
}

/// Delay for attempt `n` (1-indexed): `min(base * 2^(n-1) * jitter, ceiling)`.
pub fn backoff_delay_secs(config: &McpConnectionConfig, attempt: u32, jitter: f64) -> f64 {
    let base = config.base_backoff_secs as f64;
    let ceiling = config.ceiling_backoff_secs as f64;
    let exp = base * 2f64.powi(attempt as i32 - 1) * jitter;
    exp.min(ceiling)
}

pub fn should_retry(config: &McpConnectionConfig, attempt: u32) -> bool {
    attempt <= config.max_attempts
}

/// A jitter source, swappable via `ConnectionManager::with_jitter`.
pub trait JitterSource: Send + Sync {
    fn sample(&self, range: (f64, f64)) -> f64;
}

/// Always returns the midpoint of the range — used for reproducible,
/// monotonic backoff sequences in tests.
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self, range: (f64, f64)) -> f64 {
        (range.0 + range.1) / 2.0
    }
}

/// Uniform sampling over the jitter range without pulling in a `rand`
/// dependency the corpus doesn't already use: a counter, seeded once from
/// the process clock, is folded through a fixed-point multiplicative hash
/// on every call so concurrent servers reconnecting at the same instant
/// don't land on the same delay and retry in lockstep.
pub struct RotatingJitter {
    counter: AtomicU64,
}

impl RotatingJitter {
    pub fn new() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self { counter: AtomicU64::new(seed) }
    }
}

impl Default for RotatingJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSource for RotatingJitter {
    fn sample(&self, range: (f64, f64)) -> f64 {
        let mut x = self.counter.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
        x ^= x >> 33;
        x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
        x ^= x >> 33;
        let unit = (x >> 11) as f64 / (1u64 << 53) as f64;
        range.0 + unit * (range.1 - range.0)
    }
}

/// A connection manager for one MCP server. Owns the underlying
/// `McpServer` session once connected, the current state, and the shared
/// stop signal for its background tasks.
pub struct ConnectionManager {
    server_id: String,
    config: McpServerConfig,
    connection_config: McpConnectionConfig,
    state: RwLock<ConnectionState>,
    session: RwLock<Option<McpServer>>,
    attempts: AtomicU32,
    stop: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    events: Arc<EventBus>,
    jitter: Arc<dyn JitterSource>,
}

impl ConnectionManager {
    pub fn new(config: McpServerConfig, defaults: &McpConnectionConfig, events: Arc<EventBus>) -> Self {
        let connection_config = config.effective_connection(defaults);
        Self {
            server_id: config.id.clone(),
            config,
            connection_config,
            state: RwLock::new(ConnectionState::Disconnected),
            session: RwLock::new(None),
            attempts: AtomicU32::new(0),
            stop: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            events,
            jitter: Arc::new(RotatingJitter::new()),
        }
    }

    /// Overrides the jitter source (tests want `NoJitter` for deterministic
    /// delay sequences).
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn transition(&self, next: ConnectionState) {
        *self.state.write() = next;
        self.events.publish(DomainEvent::ConnectionStatusChanged {
            server: self.server_id.clone(),
            status: next.into(),
        });
    }

    /// Establishes the session: CONNECTING, then CONNECTED on success or
    /// RECONNECTING on failure (entering the backoff loop).
    pub async fn connect(&self) {
        self.transition(ConnectionState::Connecting);
        match McpServer::initialize(&self.config).await {
            Ok(server) => {
                *self.session.write() = Some(server);
                self.attempts.store(0, Ordering::SeqCst);
                self.transition(ConnectionState::Connected);
            }
            Err(e) => {
                tracing::warn!(server = %self.server_id, error = %e, "MCP connect failed");
                self.enter_reconnect_loop().await;
            }
        }
    }

    /// Runs the full reconnection loop: RECONNECTING, with a growing
    /// backoff delay between each CONNECTING attempt, until success, the
    /// stop signal fires, or `max_attempts` is exceeded (-> ERROR).
    async fn enter_reconnect_loop(&self) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                self.transition(ConnectionState::Disconnected);
                return;
            }

            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if !should_retry(&self.connection_config, attempt) {
                self.transition(ConnectionState::Error);
                return;
            }

            self.transition(ConnectionState::Reconnecting);
            let delay = backoff_delay_secs(&self.connection_config, attempt, self.jitter.sample(self.connection_config.jitter_range));
            self.events.publish(DomainEvent::ReconnectProgress {
                server: self.server_id.clone(),
                attempts: attempt,
                max_attempts: self.connection_config.max_attempts,
                next_retry_delay_secs: delay,
            });

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs_f64(delay)) => {}
                _ = self.stop_notify.notified() => {
                    self.transition(ConnectionState::Disconnected);
                    return;
                }
            }

            if self.stop.load(Ordering::SeqCst) {
                self.transition(ConnectionState::Disconnected);
                return;
            }

            self.transition(ConnectionState::Connecting);
            match McpServer::initialize(&self.config).await {
                Ok(server) => {
                    *self.session.write() = Some(server);
                    self.attempts.store(0, Ordering::SeqCst);
                    self.transition(ConnectionState::Connected);
                    return;
                }
                Err(e) => {
                    tracing::warn!(server = %self.server_id, attempt, error = %e, "MCP reconnect attempt failed");
                    continue;
                }
            }
        }
    }

    /// Called by the health checker on a failed probe while CONNECTED.
    pub async fn report_unhealthy(&self) {
        if self.state() == ConnectionState::Connected {
            *self.session.write() = None;
            self.enter_reconnect_loop().await;
        }
    }

    /// Permitted only from ERROR; a no-op (with a logged warning) from any
    /// other state.
    pub async fn retry_connection(&self) {
        if self.state() != ConnectionState::Error {
            tracing::warn!(server = %self.server_id, state = ?self.state(), "retry_connection() is a no-op outside ERROR");
            return;
        }
        self.attempts.store(0, Ordering::SeqCst);
        self.connect().await;
    }

    /// Transitions to DISCONNECTED from any state and signals background
    /// tasks to stop without firing further reconnections.
    pub fn disconnect(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        *self.session.write() = None;
        self.transition(ConnectionState::Disconnected);
    }

    /// Like `disconnect`, but first gives the underlying session (if any)
    /// a chance to shut down its transport gracefully — terminating a
    /// stdio child process rather than leaving it to be reaped on drop.
    /// Used at process shutdown, where shutdown order doesn't matter but
    /// not leaking children does.
    pub async fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let session = self.session.write().take();
        if let Some(session) = session {
            session.shutdown().await;
        }
        self.transition(ConnectionState::Disconnected);
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn tools(&self) -> Vec<McpToolDef> {
        self.session.read().as_ref().map(|s| s.tools.clone()).unwrap_or_default()
    }

    pub async fn call_tool(&self, tool_name: &str, arguments: serde_json::Value) -> Result<ToolCallResult, McpError> {
        let alive = {
            let session = self.session.read();
            session.as_ref().map(|s| s.is_alive()).unwrap_or(false)
        };
        if !alive {
            return Err(McpError::ServerDown(self.server_id.clone()));
        }
        // Re-borrow after the liveness check to call through the session;
        // the lock is not held across the await.
        let session_ref = self.session.read();
        let server = session_ref.as_ref().ok_or_else(|| McpError::ServerDown(self.server_id.clone()))?;
        server.call_tool(tool_name, arguments).await
    }

    /// Runs the background health-check loop: while CONNECTED, probes
    /// liveness every `check_interval`, transitioning to RECONNECTING on
    /// failure. Exits when the stop signal fires.
    pub async fn run_health_checker(self: Arc<Self>) {
        let interval = std::time::Duration::from_secs(self.connection_config.check_interval_secs);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop_notify.notified() => return,
            }
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            if self.state() != ConnectionState::Connected {
                continue;
            }
            let healthy = {
                let session = self.session.read();
                session.as_ref().map(|s| s.is_alive()).unwrap_or(false)
            };
            if !healthy {
                self.report_unhealthy().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_config(base: u64, ceiling: u64, max_attempts: u32) -> McpConnectionConfig {
        McpConnectionConfig {
            check_interval_secs: 30,
            health_timeout_secs: 5,
            base_backoff_secs: base,
            ceiling_backoff_secs: ceiling,
            jitter_range: (1.0, 1.0),
            max_attempts,
        }
    }

    #[test]
    fn backoff_sequence_is_nondecreasing_and_bounded() {
        let config = connection_config(1, 4, 3);
        let delays: Vec<f64> = (1..=4).map(|n| backoff_delay_secs(&config, n, 1.0)).collect();
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 4.0]);
        for w in delays.windows(2) {
            assert!(w[1] >= w[0]);
        }
        assert!(delays.iter().all(|d| *d <= 4.0));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let config = connection_config(1, 60, 3);
        assert!(should_retry(&config, 1));
        assert!(should_retry(&config, 3));
        assert!(!should_retry(&config, 4));
    }

    #[test]
    fn max_attempts_zero_never_retries() {
        let config = connection_config(1, 60, 0);
        assert!(!should_retry(&config, 1));
    }

    #[test]
    fn connection_state_maps_to_bus_status() {
        assert_eq!(ConnectionStatus::from(ConnectionState::Reconnecting), ConnectionStatus::Reconnecting);
        assert_eq!(ConnectionStatus::from(ConnectionState::Error), ConnectionStatus::Error);
    }
}
