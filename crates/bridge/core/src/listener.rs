//! # Listener
//!
//! One per (database, channel). Owns a dedicated LISTEN session and hands each
//! notification to its module on a freshly spawned task.
//!
//! ```text
//!  ListenSession ──recv (≤10s)──▶ dispatch loop ──spawn──▶ handler (≤30s)
//!        ▲                              │                     │
//!        │ timeout: wait again          │ error: log, pause   ▼
//!        └──────────────────────────────┘            module.process_notification
//! ```
//!
//! `stop` ends the loop and closes the session; handlers already spawned run
//! to completion or to their deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::error;

use crate::audit::{AuditLogger, Severity};
use crate::error::{ListenerError, ModuleError};
use crate::module::Module;
use crate::port::{ChannelSubscriber, ListenSession};
use crate::signal::shutdown_requested;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    /// Bound on each wait for a notification.
    pub wait_timeout: Duration,
    /// Deadline given to each spawned handler.
    pub handler_timeout: Duration,
    /// Cap on concurrently executing handlers. `None` is unbounded.
    pub max_in_flight: Option<usize>,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            max_in_flight: None,
        }
    }
}

pub struct Listener {
    database: String,
    channel: String,
    module: Arc<dyn Module>,
    logger: AuditLogger,
    settings: ListenerSettings,
    limiter: Option<Arc<Semaphore>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("database", &self.database)
            .field("channel", &self.channel)
            .field("module", &self.module.name())
            .finish()
    }
}

impl Listener {
    pub fn new(
        database: impl Into<String>,
        module: Arc<dyn Module>,
        logger: AuditLogger,
        settings: ListenerSettings,
    ) -> Self {
        let channel = module.channel_name().to_string();
        let limiter = settings
            .max_in_flight
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            database: database.into(),
            channel,
            module,
            logger,
            settings,
            limiter,
            shutdown_tx,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Opens the dedicated session, subscribes and launches the dispatch loop.
    pub async fn start(
        &self,
        subscriber: &dyn ChannelSubscriber,
        connection_string: &str,
    ) -> Result<(), ListenerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::AlreadyStarted(self.channel.clone()));
        }

        let session = match subscriber.subscribe(connection_string, &self.channel).await {
            Ok(session) => session,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.logger.system(
            Severity::Info,
            "listener",
            format!("LISTEN {} on {}", self.channel, self.database),
        );

        let dispatcher = Dispatcher {
            database: self.database.clone(),
            channel: self.channel.clone(),
            module: Arc::clone(&self.module),
            logger: self.logger.clone(),
            settings: self.settings.clone(),
            limiter: self.limiter.clone(),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(dispatcher.run(session, shutdown_rx));
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Ends the dispatch loop, closes the session and waits for the loop to
    /// exit. Does not wait for spawned handlers. No-op if not running.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.task.lock().take();
        let Some(handle) = handle else {
            return;
        };
        if let Err(e) = handle.await {
            error!(channel = %self.channel, "Listener task failed: {}", e);
        }
        self.logger.listener_stopped(&self.database, &self.channel);
    }
}

struct Dispatcher {
    database: String,
    channel: String,
    module: Arc<dyn Module>,
    logger: AuditLogger,
    settings: ListenerSettings,
    limiter: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    async fn run(self, mut session: Box<dyn ListenSession>, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => break,
                received = tokio::time::timeout(self.settings.wait_timeout, session.recv()) => received,
            };

            match received {
                // Idle channel: wait again.
                Err(_) => continue,
                Ok(Ok(notification)) => {
                    self.logger.system(
                        Severity::Debug,
                        "listener",
                        format!(
                            "Received notification on {}/{}: {}",
                            self.database, notification.channel, notification.payload
                        ),
                    );
                    self.dispatch(notification.payload);
                }
                Ok(Err(e)) => {
                    self.logger.listener_error(&self.database, &self.channel, &e);
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown_rx) => break,
                        _ = tokio::time::sleep(ERROR_PAUSE) => {}
                    }
                }
            }
        }

        session.close().await;
    }

    fn dispatch(&self, payload: String) {
        let database = self.database.clone();
        let channel = self.channel.clone();
        let module = Arc::clone(&self.module);
        let logger = self.logger.clone();
        let limiter = self.limiter.clone();
        let deadline = self.settings.handler_timeout;

        tokio::spawn(async move {
            let work = async {
                // The permit wait counts against the deadline.
                let _permit = match limiter {
                    Some(semaphore) => Some(
                        semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| ModuleError::failed("handler limiter closed"))?,
                    ),
                    None => None,
                };
                module.process_notification(&payload).await
            };

            match tokio::time::timeout(deadline, work).await {
                Ok(Ok(())) => logger.system(
                    Severity::Debug,
                    "listener",
                    format!("Processed notification on {}/{}: {}", database, channel, payload),
                ),
                Ok(Err(e)) => logger.notification_failed(&database, &channel, &e),
                Err(_) => {
                    logger.notification_failed(&database, &channel, &ModuleError::Timeout(deadline))
                }
            }
        });
    }
}
