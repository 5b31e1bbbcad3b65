//! Scriptable [`Connector`] backed by lazy pools that never dial out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgbridge_core::{ConnectionError, Connector, DatabaseTarget, PoolSettings};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::time::Instant;

use crate::journal::Journal;

/// A pool that is never used for I/O by the fakes.
pub fn lazy_pool() -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .connect_lazy("postgres://bridge@localhost/bridge_test")
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    inner: Arc<ConnectorState>,
    journal: Journal,
}

#[derive(Default)]
struct ConnectorState {
    failing_probes: AtomicUsize,
    down: AtomicBool,
    rejected: Mutex<Vec<String>>,
    opens: Mutex<HashMap<String, Vec<Instant>>>,
}

impl FakeConnector {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: Arc::default(),
            journal,
        }
    }

    /// The next `n` probes fail, across all databases.
    pub fn fail_next_probes(&self, n: usize) {
        self.inner.failing_probes.store(n, Ordering::SeqCst);
    }

    /// While down, every probe fails.
    pub fn set_down(&self, down: bool) {
        self.inner.down.store(down, Ordering::SeqCst);
    }

    /// Opening a pool for `database` fails with an unreachable-host error.
    pub fn reject(&self, database: &str) {
        self.inner.rejected.lock().push(database.to_string());
    }

    pub fn open_instants(&self, database: &str) -> Vec<Instant> {
        self.inner
            .opens
            .lock()
            .get(database)
            .cloned()
            .unwrap_or_default()
    }

    pub fn open_count(&self, database: &str) -> usize {
        self.open_instants(database).len()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(
        &self,
        target: &DatabaseTarget,
        _settings: &PoolSettings,
    ) -> Result<PgPool, ConnectionError> {
        self.journal.record(format!("connect:{}", target.name));
        self.inner
            .opens
            .lock()
            .entry(target.name.clone())
            .or_default()
            .push(Instant::now());

        if self.inner.rejected.lock().contains(&target.name) {
            return Err(ConnectionError::PoolCreation(format!(
                "could not resolve host for {}",
                target.name
            )));
        }
        lazy_pool().map_err(|e| ConnectionError::PoolCreation(e.to_string()))
    }

    async fn ping(&self, _target: &DatabaseTarget, _pool: &PgPool) -> Result<(), ConnectionError> {
        if self.inner.down.load(Ordering::SeqCst) {
            return Err(ConnectionError::Ping("connection refused".to_string()));
        }
        let failed = self
            .inner
            .failing_probes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ConnectionError::Ping("connection refused".to_string()));
        }
        Ok(())
    }

    async fn close(&self, target: &DatabaseTarget, pool: &PgPool) {
        self.journal.record(format!("pool.close:{}", target.name));
        pool.close().await;
    }
}
