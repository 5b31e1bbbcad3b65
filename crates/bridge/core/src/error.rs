//! # Error Types
//!
//! One error enum per concern. Only [`BridgeError`] crosses the orchestration
//! boundary; it wraps the component errors with the database, module or
//! channel that produced them.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while establishing or probing a pooled connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("failed to parse connection string: {0}")]
    InvalidConnectionString(String),

    #[error("failed to create connection pool: {0}")]
    PoolCreation(String),

    #[error("failed to ping database: {0}")]
    Ping(String),

    #[error("liveness probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("pool not initialized")]
    PoolNotInitialized,

    #[error("shutdown requested")]
    Cancelled,
}

/// Errors raised by a dedicated LISTEN session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListenerError {
    #[error("failed to create LISTEN connection: {0}")]
    Connect(String),

    #[error("failed to LISTEN on channel {channel}: {message}")]
    Subscribe { channel: String, message: String },

    #[error("failed to receive notification: {0}")]
    Receive(String),

    #[error("listener already started for channel {0}")]
    AlreadyStarted(String),
}

/// Errors returned by [`crate::module::Module`] implementations.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("invalid payload '{payload}': {reason}")]
    InvalidPayload { payload: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("item {0} not found")]
    NotFound(i64),

    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

impl ModuleError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors raised while creating the audit schema objects.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to create schema: {0}")]
    Schema(String),

    #[error("failed to create log table: {0}")]
    LogTable(String),

    #[error("failed to create indexes: {0}")]
    Indexes(String),

    #[error("failed to log service startup: {0}")]
    StartupRecord(String),
}

/// Errors raised by a durable log sink. Never propagated past the logger.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database pool is not initialized")]
    PoolNotInitialized,

    #[error("failed to marshal details: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write log to database: {0}")]
    Write(String),
}

/// Orchestration error: the only error that aborts the process.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to connect to database {database}: {source}")]
    Connection {
        database: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to initialize schema for {database}: {source}")]
    Schema {
        database: String,
        #[source]
        source: SchemaError,
    },

    #[error("module {module} failed during {operation} for {database}: {source}")]
    Module {
        database: String,
        module: String,
        operation: &'static str,
        #[source]
        source: ModuleError,
    },

    #[error("failed to start listener for {database}/{channel}: {source}")]
    Listener {
        database: String,
        channel: String,
        #[source]
        source: ListenerError,
    },

    #[error("channel {channel} on {database} is claimed by both {first} and {second}")]
    DuplicateChannel {
        database: String,
        channel: String,
        first: String,
        second: String,
    },

    #[error("bridge already started")]
    AlreadyStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_messages() {
        assert_eq!(
            ConnectionError::PoolNotInitialized.to_string(),
            "pool not initialized"
        );
        assert_eq!(
            ConnectionError::ProbeTimeout(Duration::from_secs(10)).to_string(),
            "liveness probe timed out after 10s"
        );
    }

    #[test]
    fn test_bridge_error_carries_context() {
        let err = BridgeError::Module {
            database: "sales".to_string(),
            module: "pgb_mail".to_string(),
            operation: "initialize",
            source: ModuleError::failed("boom"),
        };
        assert_eq!(
            err.to_string(),
            "module pgb_mail failed during initialize for sales: boom"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
