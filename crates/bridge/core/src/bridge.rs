//! # Bridge
//!
//! Wires one [`ConnectionManager`], its modules and their listeners per
//! configured database.
//!
//! ## Startup (per database, in configuration order; fail fast)
//!
//! ```text
//! connect ▶ audit bootstrap ▶ for each module:
//!     initialize ▶ start ▶ process_queue ▶ listener.start
//! ▶ health check
//! ```
//!
//! Any failure rolls back everything started so far, across all databases.
//!
//! ## Shutdown (phases across the whole fleet)
//!
//! ```text
//! every listener ▶ every module ▶ audit flush ▶ every connection manager
//! ```
//!
//! The audit flush runs while the pools are still open so queued events can
//! reach the log table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditLogger, Severity};
use crate::connection::{ConnectionManager, ConnectionSnapshot, PoolSettings};
use crate::error::{BridgeError, ConnectionError, ModuleError};
use crate::listener::{Listener, ListenerSettings};
use crate::module::{Module, ModuleContext, ModuleFactory, ModuleRegistry};
use crate::port::BridgePorts;
use crate::target::DatabaseTarget;

pub const DEFAULT_MODULE_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub pool: PoolSettings,
    pub listener: ListenerSettings,
    /// Upper bound on each `Module::stop` during shutdown.
    pub module_stop_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            listener: ListenerSettings::default(),
            module_stop_timeout: DEFAULT_MODULE_STOP_TIMEOUT,
        }
    }
}

struct TargetPlan {
    target: DatabaseTarget,
    modules: Vec<(String, ModuleFactory)>,
}

struct RunningModule {
    id: String,
    module: Arc<dyn Module>,
}

struct DatabaseRuntime {
    name: String,
    connection: Arc<ConnectionManager>,
    modules: Vec<RunningModule>,
    listeners: Vec<Listener>,
}

impl DatabaseRuntime {
    fn new(name: String, connection: Arc<ConnectionManager>) -> Self {
        Self {
            name,
            connection,
            modules: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

pub struct Bridge {
    plans: Vec<TargetPlan>,
    ports: BridgePorts,
    logger: AuditLogger,
    settings: BridgeSettings,
    runtimes: tokio::sync::Mutex<Vec<DatabaseRuntime>>,
    started: AtomicBool,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field(
                "databases",
                &self.plans.iter().map(|p| &p.target.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Bridge {
    /// Resolves every target's module identifiers against `registry`.
    /// Unknown identifiers are logged and skipped.
    pub fn new(
        targets: Vec<DatabaseTarget>,
        registry: &ModuleRegistry,
        ports: BridgePorts,
        logger: AuditLogger,
        settings: BridgeSettings,
    ) -> Self {
        let plans = targets
            .into_iter()
            .map(|target| {
                let modules = target
                    .modules
                    .iter()
                    .filter_map(|id| match registry.get(id) {
                        Some(factory) => Some((id.clone(), factory)),
                        None => {
                            logger.system(
                                Severity::Warn,
                                "main",
                                format!("Unknown module: {} (database {})", id, target.name),
                            );
                            None
                        }
                    })
                    .collect();
                TargetPlan { target, modules }
            })
            .collect();

        Self {
            plans,
            ports,
            logger,
            settings,
            runtimes: tokio::sync::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn logger(&self) -> &AuditLogger {
        &self.logger
    }

    pub fn database_count(&self) -> usize {
        self.plans.len()
    }

    /// Module identifiers that survived resolution, per database.
    pub fn resolved_modules(&self) -> Vec<(String, Vec<String>)> {
        self.plans
            .iter()
            .map(|p| {
                (
                    p.target.name.clone(),
                    p.modules.iter().map(|(id, _)| id.clone()).collect(),
                )
            })
            .collect()
    }

    /// Brings every database up in order. On the first failure everything
    /// already started is shut down and the error is returned.
    pub async fn start(&self) -> Result<(), BridgeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadyStarted);
        }

        for (index, plan) in self.plans.iter().enumerate() {
            let connection = Arc::new(ConnectionManager::new(
                plan.target.clone(),
                self.settings.pool.clone(),
                Arc::clone(&self.ports.connector),
                self.logger.clone(),
            ));
            let mut runtime = DatabaseRuntime::new(plan.target.name.clone(), connection);

            let result = self.start_database(plan, index == 0, &mut runtime).await;
            self.runtimes.lock().await.push(runtime);

            if let Err(e) = result {
                self.logger.system(
                    Severity::Error,
                    "main",
                    format!("Startup failed, rolling back: {}", e),
                );
                self.shutdown().await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn start_database(
        &self,
        plan: &TargetPlan,
        first: bool,
        runtime: &mut DatabaseRuntime,
    ) -> Result<(), BridgeError> {
        let database = plan.target.name.as_str();
        let connection = Arc::clone(&runtime.connection);

        connection
            .connect()
            .await
            .map_err(|source| BridgeError::Connection {
                database: database.to_string(),
                source,
            })?;
        let pool = connection.pool().ok_or_else(|| BridgeError::Connection {
            database: database.to_string(),
            source: ConnectionError::PoolNotInitialized,
        })?;

        self.ports
            .audit
            .bootstrap(database, &pool)
            .await
            .map_err(|source| BridgeError::Schema {
                database: database.to_string(),
                source,
            })?;

        if first {
            let sink = self.ports.audit.sink(Arc::clone(&connection));
            if self.logger.start(sink) {
                self.logger.system(
                    Severity::Info,
                    "main",
                    format!("Database logging initialized on: {}", database),
                );
            }
        }

        let context = ModuleContext {
            database: database.to_string(),
            connection: Arc::clone(&connection),
            logger: self.logger.clone(),
        };
        let mut channels: HashMap<String, String> = HashMap::new();

        for (id, factory) in &plan.modules {
            let module_err = |operation: &'static str, source: ModuleError| BridgeError::Module {
                database: database.to_string(),
                module: id.clone(),
                operation,
                source,
            };

            self.logger.module_initializing(database, id);
            let module = factory(&context).map_err(|e| {
                self.logger.module_error(database, id, "create", &e);
                module_err("create", e)
            })?;

            let channel = module.channel_name().to_string();
            if let Some(owner) = channels.get(&channel) {
                return Err(BridgeError::DuplicateChannel {
                    database: database.to_string(),
                    channel,
                    first: owner.clone(),
                    second: id.clone(),
                });
            }

            if let Err(e) = module.initialize(&pool).await {
                self.logger.module_error(database, id, "initialize", &e);
                return Err(module_err("initialize", e));
            }
            if let Err(e) = module.start().await {
                self.logger.module_error(database, id, "start", &e);
                return Err(module_err("start", e));
            }
            runtime.modules.push(RunningModule {
                id: id.clone(),
                module: Arc::clone(&module),
            });
            self.logger.module_started(database, id);

            // A failed scan is not fatal: live traffic still needs serving.
            match module.process_queue().await {
                Ok(report) => self.logger.queue_processed(database, id, &report),
                Err(e) => self.logger.system(
                    Severity::Warn,
                    "main",
                    format!("Queue processing for {}/{} had errors: {}", database, id, e),
                ),
            }

            let listener = Listener::new(
                database,
                Arc::clone(&module),
                self.logger.clone(),
                self.settings.listener.clone(),
            );
            if let Err(source) = listener
                .start(self.ports.subscriber.as_ref(), &plan.target.connection_string)
                .await
            {
                self.logger.listener_error(database, &channel, &source);
                return Err(BridgeError::Listener {
                    database: database.to_string(),
                    channel,
                    source,
                });
            }
            self.logger.listener_started(database, &channel);
            runtime.listeners.push(listener);
            channels.insert(channel, id.clone());
        }

        connection.start_health_check();
        self.logger.system(
            Severity::Info,
            "main",
            format!(
                "Database {} ready with {} modules",
                database,
                runtime.modules.len()
            ),
        );
        Ok(())
    }

    /// Stops every listener, then every module, flushes the audit log and
    /// finally closes every pool. Safe to call more than once.
    pub async fn shutdown(&self) {
        let runtimes = std::mem::take(&mut *self.runtimes.lock().await);
        if runtimes.is_empty() {
            self.logger.shutdown().await;
            return;
        }

        for runtime in &runtimes {
            for listener in &runtime.listeners {
                self.logger.system(
                    Severity::Info,
                    "main",
                    format!("Stopping listener {}/{}", runtime.name, listener.channel()),
                );
                listener.stop().await;
            }
        }

        for runtime in &runtimes {
            for running in &runtime.modules {
                self.stop_module(&runtime.name, running).await;
            }
        }

        self.logger.shutdown().await;

        for runtime in &runtimes {
            runtime.connection.shutdown().await;
        }
    }

    async fn stop_module(&self, database: &str, running: &RunningModule) {
        self.logger.system(
            Severity::Info,
            "main",
            format!("Stopping module {}/{}", database, running.id),
        );
        let timeout = self.settings.module_stop_timeout;
        match tokio::time::timeout(timeout, running.module.stop()).await {
            Ok(Ok(())) => self.logger.module_stopped(database, &running.id),
            Ok(Err(e)) => self.logger.module_error(database, &running.id, "stop", &e),
            Err(_) => self.logger.module_error(
                database,
                &running.id,
                "stop",
                &ModuleError::Timeout(timeout),
            ),
        }
    }

    /// Connection state of every running database.
    pub async fn connection_snapshots(&self) -> Vec<ConnectionSnapshot> {
        self.runtimes
            .lock()
            .await
            .iter()
            .map(|r| r.connection.snapshot())
            .collect()
    }

    /// Connection manager of a running database.
    pub async fn connection(&self, database: &str) -> Option<Arc<ConnectionManager>> {
        self.runtimes
            .lock()
            .await
            .iter()
            .find(|r| r.name == database)
            .map(|r| Arc::clone(&r.connection))
    }

    /// Channels with a running listener, per database.
    pub async fn active_channels(&self) -> Vec<(String, String)> {
        self.runtimes
            .lock()
            .await
            .iter()
            .flat_map(|r| {
                r.listeners
                    .iter()
                    .filter(|l| l.is_running())
                    .map(move |l| (r.name.clone(), l.channel().to_string()))
            })
            .collect()
    }
}
