//! # AuditLogger
//!
//! Every event is written twice: synchronously to the local `tracing`
//! stream, and asynchronously through a bounded queue to a [`LogSink`].
//!
//! ```text
//!  component ──log()──┬──▶ tracing (local, never blocks)
//!                     │
//!                     └──▶ try_send ──▶ [queue, cap 1000] ──▶ consumer ──▶ LogSink
//!                            │ full / shutting down
//!                            ▼
//!                         dropped + local warning
//! ```
//!
//! Dropped or failed durable writes are never retried. One instance is built
//! by the binary and cloned into every component; `start` attaches the sink,
//! `shutdown` drains what is left under a bounded deadline.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, warn};

use super::event::{EventKind, LogEvent, Severity};
use super::sink::LogSink;
use crate::catch_up::CatchUpReport;
use crate::error::SinkError;
use crate::signal::shutdown_requested;

/// Default capacity of the durable queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default deadline for draining the queue at shutdown.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

macro_rules! emit {
    ($severity:expr, $($rest:tt)+) => {
        match $severity {
            Severity::Debug => tracing::event!(tracing::Level::DEBUG, $($rest)+),
            Severity::Info => tracing::event!(tracing::Level::INFO, $($rest)+),
            Severity::Warn => tracing::event!(tracing::Level::WARN, $($rest)+),
            Severity::Error => tracing::event!(tracing::Level::ERROR, $($rest)+),
        }
    };
}

/// Queue sizing and flush policy.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub queue_capacity: usize,
    pub flush_timeout: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

/// Cloneable handle to the process-wide audit logger.
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<Inner>,
}

struct Inner {
    service_name: String,
    config: AuditConfig,
    sender: Mutex<Option<mpsc::Sender<LogEvent>>>,
    receiver: Mutex<Option<mpsc::Receiver<LogEvent>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shut_down: AtomicBool,
    dropped: AtomicU64,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("service_name", &self.inner.service_name)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

impl AuditLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self::with_config(service_name, AuditConfig::default())
    }

    pub fn with_config(service_name: impl Into<String>, config: AuditConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                service_name: service_name.into(),
                config,
                sender: Mutex::new(Some(tx)),
                receiver: Mutex::new(Some(rx)),
                consumer: Mutex::new(None),
                shutdown_tx,
                shut_down: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    /// Attaches the durable sink and spawns the single consumer.
    ///
    /// Events enqueued before this call stay queued (up to capacity) and are
    /// written once the consumer runs. Returns `false` if the logger was
    /// already started or is shutting down.
    pub fn start(&self, sink: Arc<dyn LogSink>) -> bool {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return false;
        }
        let Some(rx) = self.inner.receiver.lock().take() else {
            warn!(component = "logger", "Audit logger already started");
            return false;
        };

        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_consumer(Arc::clone(&self.inner), rx, sink, shutdown_rx));
        *self.inner.consumer.lock() = Some(handle);
        true
    }

    pub fn is_started(&self) -> bool {
        self.inner.consumer.lock().is_some()
    }

    /// Stops accepting events and drains the queue under the flush deadline.
    /// Runs once; later calls return immediately.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.sender.lock().take();
        let _ = self.inner.shutdown_tx.send(true);

        let consumer = self.inner.consumer.lock().take();
        match consumer {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!(component = "logger", "Audit consumer task failed: {}", e);
                }
            }
            None => {
                // Never started: nothing can persist the backlog.
                let receiver = self.inner.receiver.lock().take();
                if let Some(mut rx) = receiver {
                    let remaining = drain_count(&mut rx);
                    if remaining > 0 {
                        self.inner.dropped.fetch_add(remaining, Ordering::Relaxed);
                        warn!(
                            component = "logger",
                            remaining, "Audit logger never started: {} log entries dropped", remaining
                        );
                    }
                }
            }
        }
    }

    /// Number of events that never reached the sink's queue or were left
    /// behind at the flush deadline.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Writes to the local stream only.
    pub fn system(&self, severity: Severity, component: &str, message: impl Display) {
        emit!(severity, component, "{}", message);
    }

    /// Writes to the local stream and enqueues for durable persistence.
    pub fn log(&self, severity: Severity, component: &str, event: LogEvent) {
        let details = event
            .details_json()
            .map(|d| d.to_string())
            .unwrap_or_default();
        let database = event.database.as_deref().unwrap_or("");
        let module = event.module.as_deref().unwrap_or("");
        emit!(
            severity,
            component,
            kind = %event.kind,
            database,
            module,
            details = %details,
            "[{}] {}",
            event.kind,
            event.message
        );
        self.enqueue(event);
    }

    /// Non-blocking enqueue; drops the event when the queue is full or the
    /// logger is shutting down.
    pub fn enqueue(&self, event: LogEvent) {
        // The slot lock is held across `try_send` so shutdown cannot take
        // the sender and finish the flush between the two.
        let result = match self.inner.sender.lock().as_ref() {
            Some(sender) => sender.try_send(event),
            None => Err(mpsc::error::TrySendError::Closed(event)),
        };
        match result {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.record_drop("Database log channel full, dropping log entry")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.record_drop("Cannot log to database during shutdown, logging to system")
            }
        }
    }

    fn record_drop(&self, reason: &str) {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(component = "logger", "{}", reason);
    }

    // =========================================================================
    // Event helpers
    // =========================================================================

    pub fn config_loaded(&self, database_count: usize, module_count: usize) {
        self.log(
            Severity::Info,
            "config",
            LogEvent::new(
                EventKind::ConfigLoaded,
                format!(
                    "Configuration loaded successfully: {} databases, {} total modules",
                    database_count, module_count
                ),
            )
            .with_detail("database_count", database_count)
            .with_detail("module_count", module_count),
        );
    }

    pub fn config_error(&self, err: &dyn Display) {
        self.log(
            Severity::Error,
            "config",
            LogEvent::new(EventKind::ConfigError, format!("Configuration error: {}", err))
                .with_detail("error", err.to_string()),
        );
    }

    pub fn db_connected(&self, database: &str) {
        self.log(
            Severity::Info,
            "database",
            LogEvent::new(
                EventKind::DbConnectSuccess,
                format!("Successfully connected to database: {}", database),
            )
            .with_database(database),
        );
    }

    pub fn db_connect_failed(&self, database: &str, err: &dyn Display) {
        self.log(
            Severity::Error,
            "database",
            LogEvent::new(
                EventKind::DbConnectFail,
                format!("Failed to connect to database {}: {}", database, err),
            )
            .with_database(database)
            .with_detail("error", err.to_string()),
        );
    }

    pub fn db_disconnected(&self, database: &str) {
        self.log(
            Severity::Info,
            "database",
            LogEvent::new(
                EventKind::DbDisconnect,
                format!("Disconnected from database: {}", database),
            )
            .with_database(database),
        );
    }

    pub fn db_reconnect(&self, database: &str, attempt: u32, delay: Duration) {
        self.log(
            Severity::Info,
            "database",
            LogEvent::new(
                EventKind::DbReconnect,
                format!(
                    "Reconnection attempt {} for {} (delay: {:?})",
                    attempt, database, delay
                ),
            )
            .with_database(database)
            .with_detail("attempt", attempt)
            .with_detail("delay", format!("{:?}", delay)),
        );
    }

    pub fn health_check_passed(&self, database: &str) {
        self.log(
            Severity::Debug,
            "health",
            LogEvent::new(
                EventKind::HealthCheck,
                format!("Health check passed for {}", database),
            )
            .with_database(database),
        );
    }

    pub fn health_check_failed(&self, database: &str, err: &dyn Display) {
        self.log(
            Severity::Error,
            "health",
            LogEvent::new(
                EventKind::HealthCheckFail,
                format!("Health check failed for {}: {}", database, err),
            )
            .with_database(database)
            .with_detail("error", err.to_string()),
        );
    }

    pub fn module_initializing(&self, database: &str, module: &str) {
        self.log(
            Severity::Info,
            "module",
            LogEvent::new(
                EventKind::ModuleInit,
                format!("Initializing module {} for database {}", module, database),
            )
            .with_database(database)
            .with_module(module),
        );
    }

    pub fn module_started(&self, database: &str, module: &str) {
        self.log(
            Severity::Info,
            "module",
            LogEvent::new(
                EventKind::ModuleStart,
                format!("Started module {} for database {}", module, database),
            )
            .with_database(database)
            .with_module(module),
        );
    }

    pub fn module_stopped(&self, database: &str, module: &str) {
        self.log(
            Severity::Info,
            "module",
            LogEvent::new(
                EventKind::ModuleStop,
                format!("Stopped module {} for database {}", module, database),
            )
            .with_database(database)
            .with_module(module),
        );
    }

    pub fn module_error(&self, database: &str, module: &str, operation: &str, err: &dyn Display) {
        self.log(
            Severity::Error,
            "module",
            LogEvent::new(
                EventKind::ModuleError,
                format!("Module {} error during {}: {}", module, operation, err),
            )
            .with_database(database)
            .with_module(module)
            .with_detail("operation", operation)
            .with_detail("error", err.to_string()),
        );
    }

    pub fn queue_processed(&self, database: &str, module: &str, report: &CatchUpReport) {
        let severity = if report.failed.is_empty() {
            Severity::Info
        } else {
            Severity::Warn
        };
        self.log(
            severity,
            "module",
            LogEvent::new(
                EventKind::QueueProcess,
                format!(
                    "Queue processing for {}/{}: {} of {} items processed",
                    database,
                    module,
                    report.processed,
                    report.scanned
                ),
            )
            .with_database(database)
            .with_module(module)
            .with_detail("scanned", report.scanned)
            .with_detail("processed", report.processed)
            .with_detail("failed", report.failed.len()),
        );
    }

    pub fn listener_started(&self, database: &str, channel: &str) {
        self.log(
            Severity::Info,
            "listener",
            LogEvent::new(
                EventKind::ListenerStarted,
                format!("Started listening on channel {}", channel),
            )
            .with_database(database)
            .with_detail("channel", channel),
        );
    }

    pub fn listener_stopped(&self, database: &str, channel: &str) {
        self.log(
            Severity::Info,
            "listener",
            LogEvent::new(
                EventKind::ListenerStopped,
                format!("Stopped listening on channel {}", channel),
            )
            .with_database(database)
            .with_detail("channel", channel),
        );
    }

    pub fn listener_error(&self, database: &str, channel: &str, err: &dyn Display) {
        self.log(
            Severity::Error,
            "listener",
            LogEvent::new(
                EventKind::ListenerError,
                format!("Listener error on channel {}: {}", channel, err),
            )
            .with_database(database)
            .with_detail("channel", channel)
            .with_detail("error", err.to_string()),
        );
    }

    pub fn notification_failed(&self, database: &str, channel: &str, err: &dyn Display) {
        self.log(
            Severity::Error,
            "listener",
            LogEvent::new(
                EventKind::NotificationError,
                format!(
                    "Failed to process notification on {}/{}: {}",
                    database, channel, err
                ),
            )
            .with_database(database)
            .with_detail("channel", channel)
            .with_detail("error", err.to_string()),
        );
    }

    pub fn service_started(&self, version: &str, database_count: usize) {
        self.log(
            Severity::Info,
            "main",
            LogEvent::new(
                EventKind::ServiceStart,
                format!(
                    "{} {} started successfully with {} databases",
                    self.inner.service_name, version, database_count
                ),
            )
            .with_detail("version", version)
            .with_detail("database_count", database_count),
        );
    }

    pub fn service_stopped(&self) {
        self.log(
            Severity::Info,
            "main",
            LogEvent::new(
                EventKind::ServiceStop,
                format!("{} stopped", self.inner.service_name),
            ),
        );
    }
}

async fn run_consumer(
    inner: Arc<Inner>,
    mut rx: mpsc::Receiver<LogEvent>,
    sink: Arc<dyn LogSink>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // The flush deadline starts when shutdown is observed, including while a
    // write is still in flight.
    let deadline = loop {
        let next = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => None,
            next = rx.recv() => Some(next),
        };
        let event = match next {
            None => break flush_deadline(&inner),
            Some(None) => return,
            Some(Some(event)) => event,
        };

        let write = sink.write(&inner.service_name, &event);
        tokio::pin!(write);
        let result = tokio::select! {
            biased;
            result = &mut write => result,
            _ = shutdown_requested(&mut shutdown_rx) => {
                let deadline = flush_deadline(&inner);
                match tokio::time::timeout_at(deadline, &mut write).await {
                    Ok(result) => {
                        report_write_error(&event, result);
                        break deadline;
                    }
                    Err(_) => {
                        report_flush_timeout(&inner, 1 + drain_count(&mut rx));
                        return;
                    }
                }
            }
        };
        report_write_error(&event, result);
    };

    flush(&inner, &mut rx, sink.as_ref(), deadline).await;
}

fn flush_deadline(inner: &Inner) -> Instant {
    Instant::now() + inner.config.flush_timeout
}

fn report_write_error(event: &LogEvent, result: Result<(), SinkError>) {
    if let Err(e) = result {
        error!(component = "logger", kind = %event.kind, "Failed to write log to database: {}", e);
    }
}

async fn flush(
    inner: &Inner,
    rx: &mut mpsc::Receiver<LogEvent>,
    sink: &dyn LogSink,
    deadline: Instant,
) {
    loop {
        if Instant::now() >= deadline {
            report_flush_timeout(inner, drain_count(rx));
            return;
        }
        let event = match rx.try_recv() {
            Ok(event) => event,
            Err(_) => return,
        };
        match tokio::time::timeout_at(deadline, sink.write(&inner.service_name, &event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(component = "logger", kind = %event.kind, "Failed to flush log entry: {}", e);
            }
            Err(_) => {
                report_flush_timeout(inner, 1 + drain_count(rx));
                return;
            }
        }
    }
}

fn report_flush_timeout(inner: &Inner, remaining: u64) {
    if remaining == 0 {
        return;
    }
    inner.dropped.fetch_add(remaining, Ordering::Relaxed);
    warn!(
        component = "logger",
        remaining, "Flush timeout: {} log entries remaining", remaining
    );
}

fn drain_count(rx: &mut mpsc::Receiver<LogEvent>) -> u64 {
    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Counts WARN events on the local stream.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[derive(Default)]
    struct VecSink {
        events: Mutex<Vec<LogEvent>>,
        attempts: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl LogSink for VecSink {
        async fn write(&self, _service: &str, event: &LogEvent) -> Result<(), SinkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(SinkError::Write("relation does not exist".to_string()));
            }
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    fn numbered(i: usize) -> LogEvent {
        LogEvent::new(EventKind::HealthCheck, format!("event {}", i))
    }

    #[tokio::test]
    async fn test_overflow_drops_newest_without_blocking() {
        let logger = AuditLogger::new("pgbridge");
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        tracing::subscriber::with_default(subscriber, || {
            for i in 0..1005 {
                logger.enqueue(numbered(i));
            }
        });
        assert_eq!(logger.dropped_count(), 5);
        assert_eq!(warnings.load(Ordering::SeqCst), 5);

        let sink = Arc::new(VecSink::default());
        assert!(logger.start(sink.clone()));
        logger.shutdown().await;

        let events = sink.events.lock();
        assert_eq!(events.len(), 1000);
        assert_eq!(events[0].message, "event 0");
        assert_eq!(events[999].message, "event 999");
        assert_eq!(logger.dropped_count(), 5);
    }

    #[tokio::test]
    async fn test_events_after_shutdown_are_dropped() {
        let logger = AuditLogger::new("pgbridge");
        let sink = Arc::new(VecSink::default());
        logger.start(sink.clone());
        logger.shutdown().await;

        logger.db_connected("sales");
        assert_eq!(logger.dropped_count(), 1);
        assert!(sink.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_writes_are_not_retried() {
        let logger = AuditLogger::new("pgbridge");
        let sink = Arc::new(VecSink {
            fail: true,
            ..Default::default()
        });
        logger.start(sink.clone());
        for i in 0..3 {
            logger.enqueue(numbered(i));
        }
        logger.shutdown().await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert!(sink.events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_deadline_drops_remaining() {
        let logger = AuditLogger::with_config(
            "pgbridge",
            AuditConfig {
                queue_capacity: 100,
                flush_timeout: Duration::from_secs(5),
            },
        );
        for i in 0..10 {
            logger.enqueue(numbered(i));
        }
        let sink = Arc::new(VecSink {
            delay: Some(Duration::from_secs(1)),
            ..Default::default()
        });
        logger.start(sink.clone());
        logger.shutdown().await;

        let written = sink.events.lock().len() as u64;
        assert!(written < 10, "flush should stop at the deadline");
        assert!(logger.dropped_count() > 0);
        assert_eq!(written + logger.dropped_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_deadline_covers_write_in_progress() {
        let logger = AuditLogger::new("pgbridge");
        let sink = Arc::new(VecSink {
            delay: Some(Duration::from_secs(25)),
            ..Default::default()
        });
        logger.start(sink.clone());
        logger.enqueue(numbered(0));
        logger.enqueue(numbered(1));

        // Let the consumer pick up the first event and block in the sink.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        logger.shutdown().await;

        assert!(started.elapsed() <= DEFAULT_FLUSH_TIMEOUT);
        assert!(sink.events.lock().is_empty());
        assert_eq!(logger.dropped_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_in_progress_finishing_in_time_is_kept() {
        let logger = AuditLogger::new("pgbridge");
        let sink = Arc::new(VecSink {
            delay: Some(Duration::from_secs(2)),
            ..Default::default()
        });
        logger.start(sink.clone());
        for i in 0..4 {
            logger.enqueue(numbered(i));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        logger.shutdown().await;

        assert!(started.elapsed() <= DEFAULT_FLUSH_TIMEOUT);
        let written = sink.events.lock().len() as u64;
        assert_eq!(written, 2);
        assert_eq!(written + logger.dropped_count(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_enqueue_racing_shutdown_is_written_or_counted() {
        let logger = AuditLogger::new("pgbridge");
        let sink = Arc::new(VecSink::default());
        logger.start(sink.clone());

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let logger = logger.clone();
                tokio::spawn(async move {
                    for i in 0..200 {
                        logger.enqueue(numbered(p * 1000 + i));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        tokio::task::yield_now().await;
        logger.shutdown().await;
        for producer in producers {
            producer.await.unwrap();
        }

        let written = sink.events.lock().len() as u64;
        assert_eq!(written + logger.dropped_count(), 800);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let logger = AuditLogger::new("pgbridge");
        assert!(logger.start(Arc::new(VecSink::default())));
        assert!(!logger.start(Arc::new(VecSink::default())));
        assert!(logger.is_started());
        logger.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_start_counts_backlog() {
        let logger = AuditLogger::new("pgbridge");
        logger.db_disconnected("sales");
        logger.db_disconnected("hr");
        logger.shutdown().await;
        assert_eq!(logger.dropped_count(), 2);
        // second call is a no-op
        logger.shutdown().await;
        assert_eq!(logger.dropped_count(), 2);
    }
}
