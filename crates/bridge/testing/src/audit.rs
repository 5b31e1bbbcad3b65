//! In-memory audit storage.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgbridge_core::{
    AuditBackend, ConnectionManager, EventKind, LogEvent, LogSink, SchemaError, SinkError,
};
use sqlx::PgPool;

use crate::journal::Journal;

#[derive(Clone, Default)]
pub struct MemoryAuditBackend {
    inner: Arc<AuditState>,
    journal: Journal,
}

#[derive(Default)]
struct AuditState {
    bootstrapped: Mutex<Vec<String>>,
    refused: Mutex<HashSet<String>>,
    rows: Mutex<Vec<(String, LogEvent)>>,
    fail_writes: AtomicBool,
}

impl MemoryAuditBackend {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: Arc::default(),
            journal,
        }
    }

    /// Bootstrapping `database` fails.
    pub fn refuse(&self, database: &str) {
        self.inner.refused.lock().insert(database.to_string());
    }

    /// Every sink write fails while set.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn bootstrapped(&self) -> Vec<String> {
        self.inner.bootstrapped.lock().clone()
    }

    /// Persisted events, in write order.
    pub fn events(&self) -> Vec<LogEvent> {
        self.inner
            .rows
            .lock()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<LogEvent> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.inner
            .rows
            .lock()
            .iter()
            .map(|(s, _)| s.clone())
            .collect()
    }
}

#[async_trait]
impl AuditBackend for MemoryAuditBackend {
    async fn bootstrap(&self, database: &str, _pool: &PgPool) -> Result<(), SchemaError> {
        self.journal.record(format!("bootstrap:{}", database));
        if self.inner.refused.lock().contains(database) {
            return Err(SchemaError::Schema(format!(
                "permission denied for database {}",
                database
            )));
        }
        self.inner.bootstrapped.lock().push(database.to_string());
        Ok(())
    }

    fn sink(&self, connection: Arc<ConnectionManager>) -> Arc<dyn LogSink> {
        Arc::new(MemoryLogSink {
            state: Arc::clone(&self.inner),
            connection,
        })
    }
}

/// Writes into the backend's rows, but only while the database it is bound
/// to has an open pool.
pub struct MemoryLogSink {
    state: Arc<AuditState>,
    connection: Arc<ConnectionManager>,
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn write(&self, service_name: &str, event: &LogEvent) -> Result<(), SinkError> {
        if self.connection.pool().is_none() {
            return Err(SinkError::PoolNotInitialized);
        }
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(SinkError::Write("relation \"pgb.pgb_log\" does not exist".to_string()));
        }
        self.state
            .rows
            .lock()
            .push((service_name.to_string(), event.clone()));
        Ok(())
    }
}
