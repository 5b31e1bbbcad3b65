//! # ConnectionManager
//!
//! Owns the shared pool of one database target.
//!
//! ```text
//!              connect() ok
//!  Disconnected ───────────▶ Connected
//!       ▲                       │
//!       │   health probe fails  │
//!       └───────────────────────┘
//!                 │
//!                 ▼
//!      reconnect(): disconnect ▶ connect ▶ sleep(1s, 2s, 4s .. 60s) ▶ ...
//! ```
//!
//! The state lock is a short `parking_lot` critical section and is never held
//! across I/O. Connect and disconnect are serialized by a separate async lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::error;

use super::backoff::ReconnectBackoff;
use super::settings::PoolSettings;
use crate::audit::{AuditLogger, Severity};
use crate::error::ConnectionError;
use crate::port::Connector;
use crate::signal::shutdown_requested;
use crate::target::DatabaseTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Point-in-time view of the handle, including reconnect progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub database: String,
    pub state: ConnectionState,
    pub reconnecting: bool,
    pub attempt: u32,
    pub current_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

struct HandleState {
    pool: Option<PgPool>,
    status: ConnectionState,
    attempt: u32,
    backoff: ReconnectBackoff,
}

pub struct ConnectionManager {
    target: DatabaseTarget,
    settings: PoolSettings,
    connector: Arc<dyn Connector>,
    logger: AuditLogger,
    state: Mutex<HandleState>,
    lifecycle: tokio::sync::Mutex<()>,
    reconnecting: AtomicBool,
    shut_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("database", &self.target.name)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        target: DatabaseTarget,
        settings: PoolSettings,
        connector: Arc<dyn Connector>,
        logger: AuditLogger,
    ) -> Self {
        let settings = settings.normalized();
        let backoff = ReconnectBackoff::new(
            settings.reconnect_initial_delay,
            settings.reconnect_max_delay,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            target,
            settings,
            connector,
            logger,
            state: Mutex::new(HandleState {
                pool: None,
                status: ConnectionState::Disconnected,
                attempt: 0,
                backoff,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            reconnecting: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn database(&self) -> &str {
        &self.target.name
    }

    pub fn target(&self) -> &DatabaseTarget {
        &self.target
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Opens the pool and probes it. Succeeds immediately when already
    /// connected; fails with [`ConnectionError::Cancelled`] after shutdown.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let _guard = self.lifecycle.lock().await;

        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ConnectionError::Cancelled);
        }
        let stale = {
            let mut state = self.state.lock();
            if state.status == ConnectionState::Connected {
                return Ok(());
            }
            state.pool.take()
        };
        if let Some(pool) = stale {
            self.connector.close(&self.target, &pool).await;
        }

        self.logger.system(
            Severity::Info,
            "database",
            format!("Connecting to database {}", self.target.name),
        );

        let pool = match self.connector.open(&self.target, &self.settings).await {
            Ok(pool) => pool,
            Err(e) => {
                self.logger.db_connect_failed(&self.target.name, &e);
                return Err(e);
            }
        };

        let timeout = self.settings.connect_probe_timeout;
        let probe = match tokio::time::timeout(timeout, self.connector.ping(&self.target, &pool)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::ProbeTimeout(timeout)),
        };
        if let Err(e) = probe {
            self.connector.close(&self.target, &pool).await;
            self.logger.db_connect_failed(&self.target.name, &e);
            return Err(e);
        }

        {
            let mut state = self.state.lock();
            state.pool = Some(pool);
            state.status = ConnectionState::Connected;
        }
        self.logger.db_connected(&self.target.name);
        Ok(())
    }

    /// Closes the pool if open. No-op when already disconnected.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;

        let pool = {
            let mut state = self.state.lock();
            state.status = ConnectionState::Disconnected;
            state.pool.take()
        };
        if let Some(pool) = pool {
            self.connector.close(&self.target, &pool).await;
            self.logger.db_disconnected(&self.target.name);
        }
    }

    pub async fn ping(&self) -> Result<(), ConnectionError> {
        let pool = self.pool().ok_or(ConnectionError::PoolNotInitialized)?;
        self.connector.ping(&self.target, &pool).await
    }

    /// Shared pool handle, if connected.
    pub fn pool(&self) -> Option<PgPool> {
        self.state.lock().pool.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().status == ConnectionState::Connected
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Option<PoolStats> {
        self.state.lock().pool.as_ref().map(|pool| PoolStats {
            size: pool.size(),
            idle: pool.num_idle(),
        })
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.state.lock();
        ConnectionSnapshot {
            database: self.target.name.clone(),
            state: state.status,
            reconnecting: self.reconnecting.load(Ordering::SeqCst),
            attempt: state.attempt,
            current_delay: state.backoff.current(),
        }
    }

    /// Spawns the periodic liveness check. A failed probe flips the state to
    /// disconnected and launches a reconnect sequence unless one is already
    /// running.
    pub fn start_health_check(self: &Arc<Self>) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let period = this.settings.health_check_period;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                    _ = ticker.tick() => this.check_health().await,
                }
            }
        });
        self.track(handle);
    }

    async fn check_health(self: &Arc<Self>) {
        let timeout = self.settings.health_probe_timeout;
        let result = match tokio::time::timeout(timeout, self.ping()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::ProbeTimeout(timeout)),
        };

        match result {
            Ok(()) => self.logger.health_check_passed(&self.target.name),
            Err(e) => {
                self.logger.health_check_failed(&self.target.name, &e);
                self.handle_connection_loss();
            }
        }
    }

    fn handle_connection_loss(self: &Arc<Self>) {
        self.state.lock().status = ConnectionState::Disconnected;

        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.logger.system(
                Severity::Debug,
                "database",
                format!("Reconnect already in progress for {}", self.target.name),
            );
            return;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _ = this.reconnect().await;
            this.reconnecting.store(false, Ordering::SeqCst);
        });
        self.track(handle);
    }

    /// Repeats disconnect + connect with exponential backoff until a connect
    /// succeeds or shutdown is requested. Never gives up on its own.
    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shut_down.load(Ordering::SeqCst) {
                return Err(ConnectionError::Cancelled);
            }

            let (attempt, delay) = {
                let mut state = self.state.lock();
                state.attempt += 1;
                (state.attempt, state.backoff.current())
            };
            self.logger.db_reconnect(&self.target.name, attempt, delay);

            self.disconnect().await;
            match self.connect().await {
                Ok(()) => {
                    {
                        let mut state = self.state.lock();
                        state.attempt = 0;
                        state.backoff.reset();
                    }
                    self.logger.system(
                        Severity::Info,
                        "database",
                        format!(
                            "Successfully reconnected to {} after {} attempts",
                            self.target.name, attempt
                        ),
                    );
                    return Ok(());
                }
                Err(ConnectionError::Cancelled) => return Err(ConnectionError::Cancelled),
                Err(_) => {}
            }

            let delay = self.state.lock().backoff.next_delay();
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => return Err(ConnectionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Stops the health check and any reconnect sequence, waits for them and
    /// closes the pool. Runs once.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        // A task being awaited may still register another one.
        loop {
            let handles = std::mem::take(&mut *self.tasks.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(database = %self.target.name, "Connection task failed: {}", e);
                }
            }
        }

        self.disconnect().await;
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedConnector {
        failing_probes: AtomicUsize,
        opens: AtomicUsize,
        closes: AtomicUsize,
        reject_url: bool,
    }

    impl ScriptedConnector {
        fn new(failing_probes: usize) -> Arc<Self> {
            Arc::new(Self {
                failing_probes: AtomicUsize::new(failing_probes),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                reject_url: false,
            })
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn open(
            &self,
            _target: &DatabaseTarget,
            _settings: &PoolSettings,
        ) -> Result<PgPool, ConnectionError> {
            if self.reject_url {
                return Err(ConnectionError::InvalidConnectionString(
                    "invalid port".to_string(),
                ));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            PgPoolOptions::new()
                .max_connections(1)
                .min_connections(0)
                .connect_lazy("postgres://bridge@localhost/bridge_test")
                .map_err(|e| ConnectionError::PoolCreation(e.to_string()))
        }

        async fn ping(&self, _target: &DatabaseTarget, _pool: &PgPool) -> Result<(), ConnectionError> {
            let remaining = self.failing_probes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_probes.store(remaining - 1, Ordering::SeqCst);
                return Err(ConnectionError::Ping("connection refused".to_string()));
            }
            Ok(())
        }

        async fn close(&self, _target: &DatabaseTarget, pool: &PgPool) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            pool.close().await;
        }
    }

    fn manager(connector: Arc<ScriptedConnector>) -> ConnectionManager {
        ConnectionManager::new(
            DatabaseTarget::new("sales", "postgres://bridge@localhost/sales", ["pgb_trace"]),
            PoolSettings::default(),
            connector,
            AuditLogger::new("pgbridge-test"),
        )
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let connector = ScriptedConnector::new(0);
        let mgr = manager(connector.clone());

        mgr.connect().await.unwrap();
        mgr.connect().await.unwrap();

        assert!(mgr.is_connected());
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_probe_leaves_disconnected() {
        let connector = ScriptedConnector::new(1);
        let mgr = manager(connector.clone());

        let err = mgr.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Ping(_)));
        assert!(!mgr.is_connected());
        assert!(mgr.pool().is_none());
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_connection_string_is_returned() {
        let connector = Arc::new(ScriptedConnector {
            failing_probes: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            reject_url: true,
        });
        let mgr = manager(connector);
        assert!(matches!(
            mgr.connect().await,
            Err(ConnectionError::InvalidConnectionString(_))
        ));
    }

    #[tokio::test]
    async fn test_ping_before_connect_reports_pool_not_initialized() {
        let mgr = manager(ScriptedConnector::new(0));
        assert_eq!(mgr.ping().await, Err(ConnectionError::PoolNotInitialized));
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected_is_noop() {
        let connector = ScriptedConnector::new(0);
        let mgr = manager(connector.clone());
        mgr.disconnect().await;
        assert_eq!(connector.closes.load(Ordering::SeqCst), 0);

        mgr.connect().await.unwrap();
        mgr.disconnect().await;
        mgr.disconnect().await;
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
        assert!(!mgr.is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_runs_once_and_blocks_connect() {
        let connector = ScriptedConnector::new(0);
        let mgr = manager(connector.clone());
        mgr.connect().await.unwrap();

        mgr.shutdown().await;
        mgr.shutdown().await;

        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.connect().await, Err(ConnectionError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_is_cancelled_by_shutdown() {
        let connector = ScriptedConnector::new(usize::MAX);
        let mgr = Arc::new(manager(connector));

        let task = tokio::spawn({
            let mgr = Arc::clone(&mgr);
            async move { mgr.reconnect().await }
        });
        tokio::time::sleep(Duration::from_secs(10)).await;
        mgr.shutdown().await;

        assert_eq!(task.await.unwrap(), Err(ConnectionError::Cancelled));
        assert!(mgr.snapshot().attempt >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_failure_triggers_single_reconnect() {
        let connector = ScriptedConnector::new(0);
        let mgr = Arc::new(manager(connector.clone()));
        mgr.connect().await.unwrap();

        connector.failing_probes.store(usize::MAX, Ordering::SeqCst);
        mgr.start_health_check();

        // Tick at 30s starts the sequence: attempts at 30, 31, 33, 37, 45, 61.
        // The ticks at 60s and 90s fail too but must not start another one.
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(!mgr.is_connected());
        assert!(mgr.is_reconnecting());
        assert_eq!(connector.opens.load(Ordering::SeqCst), 7);
        assert_eq!(mgr.snapshot().attempt, 6);

        // Next attempt is due at 93s.
        connector.failing_probes.store(0, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(mgr.is_connected());
        assert!(!mgr.is_reconnecting());
        assert_eq!(mgr.snapshot().attempt, 0);

        mgr.shutdown().await;
    }
}
