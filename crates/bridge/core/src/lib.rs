//! # pgbridge-core
//!
//! Runtime that bridges PostgreSQL LISTEN/NOTIFY to pluggable modules.
//!
//! ## Architecture
//!
//! The crate owns the coordination logic: connection lifecycle, per-channel
//! dispatch, the module contract, audit logging and the startup/shutdown
//! order. Storage and network access go through the traits in [`port`], which
//! `pgbridge-pg` implements for PostgreSQL and `pgbridge-testing` implements
//! in memory.
//!
//! ## Modules
//!
//! - [`connection`]: [`ConnectionManager`] with health check and backoff reconnect
//! - [`listener`]: [`Listener`], one dedicated LISTEN session per (database, channel)
//! - [`module`]: [`Module`] contract, [`ModuleRegistry`]
//! - [`catch_up`]: startup backlog helpers
//! - [`audit`]: [`AuditLogger`], [`LogEvent`], [`EventKind`]
//! - [`bridge`]: [`Bridge`] orchestrator
//! - [`port`]: adapter traits
//! - [`error`]: error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pgbridge_core::{AuditLogger, Bridge, BridgePorts, BridgeSettings, DatabaseTarget, ModuleRegistry};
//!
//! let logger = AuditLogger::new("pgbridge");
//! let bridge = Bridge::new(targets, &registry, ports, logger.clone(), BridgeSettings::default());
//! bridge.start().await?;
//! // ... wait for a signal
//! logger.service_stopped();
//! bridge.shutdown().await;
//! ```

pub mod audit;
pub mod bridge;
pub mod catch_up;
pub mod connection;
pub mod error;
pub mod listener;
pub mod module;
pub mod port;
pub mod target;

mod signal;

pub use audit::{AuditConfig, AuditLogger, EventKind, LogEvent, LogSink, Severity};
pub use bridge::{Bridge, BridgeSettings};
pub use catch_up::{drain, parse_row_id, CatchUpReport};
pub use connection::{
    ConnectionManager, ConnectionSnapshot, ConnectionState, PoolSettings, PoolStats,
    ReconnectBackoff,
};
pub use error::{
    BridgeError, ConnectionError, ListenerError, ModuleError, SchemaError, SinkError,
};
pub use listener::{Listener, ListenerSettings};
pub use module::{Module, ModuleContext, ModuleFactory, ModuleRegistry};
pub use port::{AuditBackend, BridgePorts, ChannelSubscriber, Connector, ListenSession};
pub use target::{DatabaseTarget, NotificationMessage, TargetError};
