//! # pgbridge-pg
//!
//! PostgreSQL adapters for the pgbridge ports:
//! - [`PgConnector`]: sqlx pool construction and liveness probe
//! - [`PgChannelSubscriber`]: dedicated `PgListener` connection per channel
//! - [`PgAuditBackend`]: `pgb` schema bootstrap and the `pgb.pgb_log` sink
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pgbridge_core::BridgePorts;
//! use pgbridge_pg::{PgAuditBackend, PgChannelSubscriber, PgConnector};
//!
//! let ports = BridgePorts::new(
//!     Arc::new(PgConnector::new()),
//!     Arc::new(PgChannelSubscriber::new()),
//!     Arc::new(PgAuditBackend::new("pgbridge", env!("CARGO_PKG_VERSION"))),
//! );
//! ```

pub mod audit;
pub mod connector;
pub mod schema;
pub mod subscriber;

pub use audit::{PgAuditBackend, PgLogSink};
pub use connector::PgConnector;
pub use subscriber::{PgChannelSubscriber, PgListenSession, LISTENER_APPLICATION_NAME};
