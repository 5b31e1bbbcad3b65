//! Ports implemented by the PostgreSQL adapters and the in-memory fakes.

pub mod audit;
pub mod connector;
pub mod subscriber;

use std::sync::Arc;

pub use audit::AuditBackend;
pub use connector::Connector;
pub use subscriber::{ChannelSubscriber, ListenSession};

/// The adapters a [`crate::Bridge`] runs against.
#[derive(Clone)]
pub struct BridgePorts {
    pub connector: Arc<dyn Connector>,
    pub subscriber: Arc<dyn ChannelSubscriber>,
    pub audit: Arc<dyn AuditBackend>,
}

impl BridgePorts {
    pub fn new(
        connector: Arc<dyn Connector>,
        subscriber: Arc<dyn ChannelSubscriber>,
        audit: Arc<dyn AuditBackend>,
    ) -> Self {
        Self {
            connector,
            subscriber,
            audit,
        }
    }
}
