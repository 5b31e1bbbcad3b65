//! Built-in modules shipped with the binary.
//!
//! Business modules are registered the same way, through
//! [`ModuleRegistry::register`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pgbridge_core::{
    AuditLogger, CatchUpReport, EventKind, LogEvent, Module, ModuleContext, ModuleError,
    ModuleRegistry, Severity,
};
use sqlx::PgPool;

pub const TRACE_MODULE: &str = "pgb_trace";

/// Records every payload published on `pgb_trace` as an audit event.
/// Lets an operator verify a channel end to end with
/// `NOTIFY pgb_trace, 'hello'`.
pub struct TraceModule {
    database: String,
    logger: AuditLogger,
    received: AtomicU64,
}

impl TraceModule {
    pub fn new(context: &ModuleContext) -> Self {
        Self {
            database: context.database.clone(),
            logger: context.logger.clone(),
            received: AtomicU64::new(0),
        }
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Module for TraceModule {
    fn name(&self) -> &str {
        TRACE_MODULE
    }

    fn channel_name(&self) -> &str {
        TRACE_MODULE
    }

    async fn initialize(&self, _pool: &PgPool) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        self.logger.system(
            Severity::Info,
            TRACE_MODULE,
            format!(
                "Trace module on {} saw {} notifications",
                self.database,
                self.received()
            ),
        );
        Ok(())
    }

    async fn process_notification(&self, payload: &str) -> Result<(), ModuleError> {
        let seq = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        self.logger.log(
            Severity::Info,
            TRACE_MODULE,
            LogEvent::new(
                EventKind::NotificationRecv,
                format!("Trace notification on {}", self.database),
            )
            .with_database(&self.database)
            .with_module(TRACE_MODULE)
            .with_detail("channel", TRACE_MODULE)
            .with_detail("payload", payload)
            .with_detail("sequence", seq),
        );
        Ok(())
    }

    async fn process_queue(&self) -> Result<CatchUpReport, ModuleError> {
        Ok(CatchUpReport::empty())
    }
}

/// Registry holding every module compiled into the binary.
pub fn builtin_registry() -> ModuleRegistry {
    ModuleRegistry::new().with(TRACE_MODULE, |context: &ModuleContext| {
        Ok(Arc::new(TraceModule::new(context)) as Arc<dyn Module>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbridge_core::connection::PoolSettings;
    use pgbridge_core::{ConnectionManager, DatabaseTarget};
    use pgbridge_testing::{FakeConnector, Journal};

    fn context(logger: &AuditLogger) -> ModuleContext {
        let target = DatabaseTarget::new(
            "sales",
            "postgres://bridge@localhost/sales",
            [TRACE_MODULE],
        );
        let connection = ConnectionManager::new(
            target,
            PoolSettings::default(),
            Arc::new(FakeConnector::new(Journal::new())),
            logger.clone(),
        );
        ModuleContext {
            database: "sales".to_string(),
            connection: Arc::new(connection),
            logger: logger.clone(),
        }
    }

    #[test]
    fn test_builtin_registry_has_trace() {
        let registry = builtin_registry();
        assert!(registry.contains(TRACE_MODULE));
    }

    #[tokio::test]
    async fn test_trace_counts_payloads() {
        let logger = AuditLogger::new("test");
        let factory = builtin_registry().get(TRACE_MODULE).unwrap();
        let module = factory(&context(&logger)).unwrap();

        assert_eq!(module.channel_name(), TRACE_MODULE);
        module.process_notification("hello").await.unwrap();
        module.process_notification("world").await.unwrap();

        let report = module.process_queue().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.scanned, 0);
    }

    #[tokio::test]
    async fn test_trace_sequence() {
        let logger = AuditLogger::new("test");
        let module = TraceModule::new(&context(&logger));

        for payload in ["a", "b", "c"] {
            module.process_notification(payload).await.unwrap();
        }
        assert_eq!(module.received(), 3);
        module.stop().await.unwrap();
    }
}
