//! Shared fixtures for the orchestration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pgbridge_core::{AuditLogger, Bridge, BridgeSettings, DatabaseTarget, Module, ModuleRegistry};
use pgbridge_testing::{FakePorts, Journal, QueueTable, RecordingModule};

pub const SALES_URL: &str = "postgres://bridge@sales-db/sales";
pub const HR_URL: &str = "postgres://bridge@hr-db/hr";

pub struct Fixture {
    pub fakes: FakePorts,
    pub logger: AuditLogger,
    pub bridge: Bridge,
}

impl Fixture {
    pub fn journal(&self) -> &Journal {
        &self.fakes.journal
    }
}

/// A module named `name` on `channel` with its own queue table.
pub fn recorder(fakes: &FakePorts, name: &str, channel: &str) -> Arc<RecordingModule> {
    RecordingModule::new(name, channel, QueueTable::new(), fakes.journal.clone())
}

pub fn registry_of(modules: &[&Arc<RecordingModule>]) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    for module in modules {
        registry.register(module.name().to_string(), RecordingModule::factory(module));
    }
    registry
}

pub fn build(
    fakes: FakePorts,
    targets: Vec<DatabaseTarget>,
    registry: &ModuleRegistry,
    settings: BridgeSettings,
) -> Fixture {
    let logger = AuditLogger::new("pgbridge-test");
    let bridge = Bridge::new(targets, registry, fakes.ports(), logger.clone(), settings);
    Fixture {
        fakes,
        logger,
        bridge,
    }
}

/// Polls `condition` until it holds, failing the test after 60s (virtual or
/// real).
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(60), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for: {}", what);
}
