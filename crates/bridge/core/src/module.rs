//! # Module contract
//!
//! A module is a pluggable background handler bound to one channel. The
//! bridge drives it through a fixed lifecycle:
//!
//! ```text
//! initialize(pool) ▶ start ▶ process_queue ▶ [listener live] ▶ process_notification* ▶ stop
//! ```
//!
//! Implementations must tolerate duplicates: a live notification can race the
//! startup scan for the same row, and delivery across restarts is at least
//! once. Check and update a persisted "handled" marker before any side effect
//! that is not itself idempotent.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::audit::AuditLogger;
use crate::catch_up::CatchUpReport;
use crate::connection::ConnectionManager;
use crate::error::ModuleError;

#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Channel this module listens on. Fixed per module type.
    fn channel_name(&self) -> &str;

    /// Creates whatever the module needs on the target. Must be idempotent.
    async fn initialize(&self, pool: &PgPool) -> Result<(), ModuleError>;

    async fn start(&self) -> Result<(), ModuleError>;

    /// Releases module resources. Must return promptly.
    async fn stop(&self) -> Result<(), ModuleError>;

    /// Handles one live notification payload.
    async fn process_notification(&self, payload: &str) -> Result<(), ModuleError>;

    /// Processes work that accumulated while the process was down. Runs once
    /// at startup, before the module's listener subscribes. Continues past
    /// individual failures and reports them.
    async fn process_queue(&self) -> Result<CatchUpReport, ModuleError>;
}

/// What a module factory gets to build a module for one database.
#[derive(Clone)]
pub struct ModuleContext {
    pub database: String,
    pub connection: Arc<ConnectionManager>,
    pub logger: AuditLogger,
}

impl ModuleContext {
    /// Current shared pool of the database, if connected.
    pub fn pool(&self) -> Option<PgPool> {
        self.connection.pool()
    }
}

pub type ModuleFactory =
    Arc<dyn Fn(&ModuleContext) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync>;

/// Maps module identifiers (as they appear in configuration) to factories.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: BTreeMap<String, ModuleFactory>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `id`, replacing any earlier registration.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ModuleContext) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn with<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ModuleContext) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync + 'static,
    {
        self.register(id, factory);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<ModuleFactory> {
        self.factories.get(id).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Module for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn channel_name(&self) -> &str {
            "noop"
        }
        async fn initialize(&self, _pool: &PgPool) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn start(&self) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn process_notification(&self, _payload: &str) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn process_queue(&self) -> Result<CatchUpReport, ModuleError> {
            Ok(CatchUpReport::empty())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ModuleRegistry::new()
            .with("noop", |_ctx: &ModuleContext| Ok(Arc::new(Noop) as Arc<dyn Module>));

        assert!(registry.contains("noop"));
        assert!(!registry.contains("pgb_mail"));
        assert!(registry.get("noop").is_some());
        assert_eq!(registry.names(), vec!["noop"]);
        assert_eq!(registry.len(), 1);
    }
}
