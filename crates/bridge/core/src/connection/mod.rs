//! Per-database connection lifecycle.

pub mod backoff;
pub mod manager;
pub mod settings;

pub use backoff::ReconnectBackoff;
pub use manager::{ConnectionManager, ConnectionSnapshot, ConnectionState, PoolStats};
pub use settings::PoolSettings;
