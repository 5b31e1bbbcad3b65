use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pgbridge_core::{
    AuditBackend, ConnectionManager, EventKind, LogEvent, LogSink, SchemaError, SinkError,
};
use serde_json::json;
use sqlx::PgPool;
use tracing::info;

use crate::schema;

/// Creates the `pgb` schema objects and writes audit rows to `pgb.pgb_log`.
#[derive(Debug, Clone)]
pub struct PgAuditBackend {
    service_name: String,
    version: String,
}

impl PgAuditBackend {
    pub fn new(service_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            version: version.into(),
        }
    }
}

#[async_trait]
impl AuditBackend for PgAuditBackend {
    async fn bootstrap(&self, database: &str, pool: &PgPool) -> Result<(), SchemaError> {
        info!(database, "Initializing database schema");

        sqlx::query(schema::CREATE_SCHEMA)
            .execute(pool)
            .await
            .map_err(|e| SchemaError::Schema(e.to_string()))?;

        sqlx::query(schema::CREATE_LOG_TABLE)
            .execute(pool)
            .await
            .map_err(|e| SchemaError::LogTable(e.to_string()))?;

        for ddl in [schema::CREATE_TIMESTAMP_INDEX, schema::CREATE_EVENT_TYPE_INDEX] {
            sqlx::query(ddl)
                .execute(pool)
                .await
                .map_err(|e| SchemaError::Indexes(e.to_string()))?;
        }

        let details = json!({
            "initialized_at": Utc::now().to_rfc3339(),
            "version": self.version,
        });
        sqlx::query(schema::INSERT_LOG)
            .bind(&self.service_name)
            .bind(EventKind::ServiceStart.as_str())
            .bind(database)
            .bind(None::<String>)
            .bind(format!("{} service connected and initialized", self.service_name))
            .bind(details)
            .execute(pool)
            .await
            .map_err(|e| SchemaError::StartupRecord(e.to_string()))?;

        info!(database, "Schema initialization completed");
        Ok(())
    }

    fn sink(&self, connection: Arc<ConnectionManager>) -> Arc<dyn LogSink> {
        Arc::new(PgLogSink::new(connection))
    }
}

/// Writes audit rows through whatever pool the bound database currently has.
#[derive(Debug)]
pub struct PgLogSink {
    connection: Arc<ConnectionManager>,
}

impl PgLogSink {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl LogSink for PgLogSink {
    async fn write(&self, service_name: &str, event: &LogEvent) -> Result<(), SinkError> {
        let pool = self
            .connection
            .pool()
            .ok_or(SinkError::PoolNotInitialized)?;

        sqlx::query(schema::INSERT_LOG)
            .bind(service_name)
            .bind(event.kind.as_str())
            .bind(event.database.as_deref())
            .bind(event.module.as_deref())
            .bind(&event.message)
            .bind(event.details_json())
            .execute(&pool)
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;
        Ok(())
    }
}
