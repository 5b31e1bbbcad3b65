//! Recording module with a persisted queue table.
//!
//! The table models what a real module keeps in its own schema: one row per
//! unit of work plus a "handled" marker. Side effects are only recorded for
//! rows that were not yet handled, so duplicates show up as missing entries in
//! [`QueueTable::side_effects`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgbridge_core::{
    drain, parse_row_id, CatchUpReport, Module, ModuleContext, ModuleError,
};
use sqlx::PgPool;

use crate::journal::Journal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub id: i64,
    pub payload: String,
    pub handled: bool,
}

/// Observable persisted state of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    pub schema_created: bool,
    pub rows: Vec<QueueRow>,
    pub side_effects: Vec<i64>,
}

#[derive(Clone, Default)]
pub struct QueueTable {
    inner: Arc<Mutex<TableState>>,
}

#[derive(Default)]
struct TableState {
    schema_created: bool,
    next_id: i64,
    rows: BTreeMap<i64, QueueRow>,
    side_effects: Vec<i64>,
}

impl QueueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pending row and returns its id.
    pub fn insert(&self, payload: &str) -> i64 {
        let mut state = self.inner.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.rows.insert(
            id,
            QueueRow {
                id,
                payload: payload.to_string(),
                handled: false,
            },
        );
        id
    }

    pub fn pending_ids(&self) -> Vec<i64> {
        self.inner
            .lock()
            .rows
            .values()
            .filter(|r| !r.handled)
            .map(|r| r.id)
            .collect()
    }

    pub fn is_handled(&self, id: i64) -> bool {
        self.inner
            .lock()
            .rows
            .get(&id)
            .map(|r| r.handled)
            .unwrap_or(false)
    }

    pub fn side_effects(&self) -> Vec<i64> {
        self.inner.lock().side_effects.clone()
    }

    pub fn snapshot(&self) -> TableSnapshot {
        let state = self.inner.lock();
        TableSnapshot {
            schema_created: state.schema_created,
            rows: state.rows.values().cloned().collect(),
            side_effects: state.side_effects.clone(),
        }
    }

    fn ensure_schema(&self) {
        self.inner.lock().schema_created = true;
    }

    /// Checks and sets the handled marker under one lock, then records the
    /// side effect. Already-handled rows are a no-op.
    fn handle(&self, id: i64, failing: &HashSet<i64>) -> Result<(), ModuleError> {
        let mut state = self.inner.lock();
        let row = state.rows.get_mut(&id).ok_or(ModuleError::NotFound(id))?;
        if row.handled {
            return Ok(());
        }
        if failing.contains(&id) {
            return Err(ModuleError::failed(format!("delivery of item {} refused", id)));
        }
        row.handled = true;
        state.side_effects.push(id);
        Ok(())
    }
}

/// Lifecycle stage that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initialize,
    Start,
    ProcessQueue,
    Stop,
}

pub struct RecordingModule {
    name: String,
    channel: String,
    table: QueueTable,
    journal: Journal,
    failing_ids: Mutex<HashSet<i64>>,
    failing_stage: Mutex<Option<Stage>>,
    handling_delay: Mutex<Duration>,
    stop_delay: Mutex<Duration>,
}

impl RecordingModule {
    pub fn new(
        name: impl Into<String>,
        channel: impl Into<String>,
        table: QueueTable,
        journal: Journal,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            channel: channel.into(),
            table,
            journal,
            failing_ids: Mutex::new(HashSet::new()),
            failing_stage: Mutex::new(None),
            handling_delay: Mutex::new(Duration::ZERO),
            stop_delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Factory handing out this very instance, for `ModuleRegistry::register`.
    pub fn factory(
        module: &Arc<Self>,
    ) -> impl Fn(&ModuleContext) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync + 'static
    {
        let module = Arc::clone(module);
        move |_ctx: &ModuleContext| Ok(Arc::clone(&module) as Arc<dyn Module>)
    }

    pub fn table(&self) -> &QueueTable {
        &self.table
    }

    pub fn fail_on(&self, id: i64) {
        self.failing_ids.lock().insert(id);
    }

    pub fn fail_at(&self, stage: Stage) {
        *self.failing_stage.lock() = Some(stage);
    }

    pub fn set_handling_delay(&self, delay: Duration) {
        *self.handling_delay.lock() = delay;
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock() = delay;
    }

    fn check_stage(&self, stage: Stage) -> Result<(), ModuleError> {
        if *self.failing_stage.lock() == Some(stage) {
            return Err(ModuleError::failed(format!("{:?} failed", stage)));
        }
        Ok(())
    }

    fn handle(&self, id: i64) -> Result<(), ModuleError> {
        let failing = self.failing_ids.lock().clone();
        self.table.handle(id, &failing)
    }
}

#[async_trait]
impl Module for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_name(&self) -> &str {
        &self.channel
    }

    async fn initialize(&self, _pool: &PgPool) -> Result<(), ModuleError> {
        self.journal.record(format!("initialize:{}", self.name));
        self.check_stage(Stage::Initialize)?;
        self.table.ensure_schema();
        Ok(())
    }

    async fn start(&self) -> Result<(), ModuleError> {
        self.journal.record(format!("start:{}", self.name));
        self.check_stage(Stage::Start)
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        let delay = *self.stop_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.journal.record(format!("stop:{}", self.name));
        self.check_stage(Stage::Stop)
    }

    async fn process_notification(&self, payload: &str) -> Result<(), ModuleError> {
        self.journal.record(format!("notify:{}:{}", self.name, payload));
        let id = parse_row_id(payload)?;
        let delay = *self.handling_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.handle(id)
    }

    async fn process_queue(&self) -> Result<CatchUpReport, ModuleError> {
        self.journal.record(format!("process_queue:{}", self.name));
        self.check_stage(Stage::ProcessQueue)?;
        let ids = self.table.pending_ids();
        Ok(drain(ids, |id| std::future::ready(self.handle(id))).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::lazy_pool;

    #[tokio::test]
    async fn test_initialize_twice_leaves_same_state() {
        let table = QueueTable::new();
        table.insert("welcome mail");
        let module = RecordingModule::new("pgb_mail", "pgb_mail", table.clone(), Journal::new());
        let pool = lazy_pool().unwrap();

        module.initialize(&pool).await.unwrap();
        let first = table.snapshot();
        module.initialize(&pool).await.unwrap();

        assert_eq!(table.snapshot(), first);
        assert!(first.schema_created);
    }

    #[tokio::test]
    async fn test_duplicate_notification_is_noop() {
        let table = QueueTable::new();
        let id = table.insert("invoice");
        let module = RecordingModule::new("pgb_mail", "pgb_mail", table.clone(), Journal::new());

        module.process_notification(&id.to_string()).await.unwrap();
        module.process_notification(&id.to_string()).await.unwrap();

        assert_eq!(table.side_effects(), vec![id]);
    }

    #[tokio::test]
    async fn test_catch_up_continues_past_failures() {
        let table = QueueTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        let c = table.insert("c");
        let module = RecordingModule::new("pgb_mail", "pgb_mail", table.clone(), Journal::new());
        module.fail_on(b);

        let report = module.process_queue().await.unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, b);
        assert_eq!(table.side_effects(), vec![a, c]);
        assert_eq!(table.pending_ids(), vec![b]);
    }
}
