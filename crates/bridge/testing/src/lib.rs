//! # pgbridge-testing
//!
//! In-memory implementations of the pgbridge ports plus a recording module.
//! Every fake writes to a shared [`Journal`] so tests can assert the order in
//! which the bridge touched connections, sessions and modules.

pub mod audit;
pub mod connector;
pub mod journal;
pub mod module;
pub mod subscriber;

use std::sync::Arc;

use pgbridge_core::BridgePorts;

pub use audit::{MemoryAuditBackend, MemoryLogSink};
pub use connector::{lazy_pool, FakeConnector};
pub use journal::Journal;
pub use module::{QueueTable, RecordingModule, Stage};
pub use subscriber::FakeSubscriber;

/// One set of fakes sharing a journal.
#[derive(Clone)]
pub struct FakePorts {
    pub journal: Journal,
    pub connector: FakeConnector,
    pub subscriber: FakeSubscriber,
    pub audit: MemoryAuditBackend,
}

impl FakePorts {
    pub fn new() -> Self {
        let journal = Journal::new();
        Self {
            connector: FakeConnector::new(journal.clone()),
            subscriber: FakeSubscriber::new(journal.clone()),
            audit: MemoryAuditBackend::new(journal.clone()),
            journal,
        }
    }

    pub fn ports(&self) -> BridgePorts {
        BridgePorts::new(
            Arc::new(self.connector.clone()),
            Arc::new(self.subscriber.clone()),
            Arc::new(self.audit.clone()),
        )
    }
}

impl Default for FakePorts {
    fn default() -> Self {
        Self::new()
    }
}
