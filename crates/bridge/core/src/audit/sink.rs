use async_trait::async_trait;

use super::event::LogEvent;
use crate::error::SinkError;

/// Durable destination for audit events (append-only).
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn write(&self, service_name: &str, event: &LogEvent) -> Result<(), SinkError>;
}
