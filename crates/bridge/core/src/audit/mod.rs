//! Audit logging: event model, durable sink port and the async logger.

pub mod event;
pub mod logger;
pub mod sink;

pub use event::{EventKind, LogEvent, Severity};
pub use logger::{AuditConfig, AuditLogger, DEFAULT_FLUSH_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
pub use sink::LogSink;
