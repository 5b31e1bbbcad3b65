use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::audit::LogSink;
use crate::connection::ConnectionManager;
use crate::error::SchemaError;

/// Storage side of the audit log.
#[async_trait]
pub trait AuditBackend: Send + Sync {
    /// Creates the audit objects on `database` if they are missing and
    /// records the service start there. Idempotent.
    async fn bootstrap(&self, database: &str, pool: &PgPool) -> Result<(), SchemaError>;

    /// Sink writing into the database managed by `connection`. The sink
    /// resolves the pool on every write so it follows reconnects.
    fn sink(&self, connection: Arc<ConnectionManager>) -> Arc<dyn LogSink>;
}
