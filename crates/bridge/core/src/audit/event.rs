//! Audit event model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Kind of audit event, persisted as `event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ServiceStart,
    ServiceStop,
    ConfigLoaded,
    ConfigError,
    DbConnectSuccess,
    DbConnectFail,
    DbDisconnect,
    DbReconnect,
    ListenerStarted,
    ListenerStopped,
    ListenerError,
    ModuleInit,
    ModuleStart,
    ModuleStop,
    ModuleError,
    NotificationRecv,
    NotificationProc,
    NotificationError,
    QueueProcess,
    HealthCheck,
    HealthCheckFail,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceStart => "SERVICE_START",
            Self::ServiceStop => "SERVICE_STOP",
            Self::ConfigLoaded => "CONFIG_LOADED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::DbConnectSuccess => "DB_CONNECT_SUCCESS",
            Self::DbConnectFail => "DB_CONNECT_FAIL",
            Self::DbDisconnect => "DB_DISCONNECT",
            Self::DbReconnect => "DB_RECONNECT",
            Self::ListenerStarted => "LISTENER_STARTED",
            Self::ListenerStopped => "LISTENER_STOPPED",
            Self::ListenerError => "LISTENER_ERROR",
            Self::ModuleInit => "MODULE_INIT",
            Self::ModuleStart => "MODULE_START",
            Self::ModuleStop => "MODULE_STOP",
            Self::ModuleError => "MODULE_ERROR",
            Self::NotificationRecv => "NOTIFICATION_RECV",
            Self::NotificationProc => "NOTIFICATION_PROC",
            Self::NotificationError => "NOTIFICATION_ERROR",
            Self::QueueProcess => "QUEUE_PROCESS",
            Self::HealthCheck => "HEALTH_CHECK",
            Self::HealthCheckFail => "HEALTH_CHECK_FAIL",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of the local stream record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A structured audit record. Consumed at most once by the logger's
/// consumer; may be dropped under backpressure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub kind: EventKind,
    pub database: Option<String>,
    pub module: Option<String>,
    pub message: String,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            database: None,
            module: None,
            message: message.into(),
            details: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Details rendered as a JSON object, or `None` when empty.
    pub fn details_json(&self) -> Option<Value> {
        if self.details.is_empty() {
            None
        } else {
            Some(Value::Object(self.details.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(EventKind::DbConnectSuccess.as_str(), "DB_CONNECT_SUCCESS");
        assert_eq!(EventKind::HealthCheckFail.to_string(), "HEALTH_CHECK_FAIL");
        assert_eq!(
            serde_json::to_value(EventKind::NotificationProc).unwrap(),
            Value::String("NOTIFICATION_PROC".to_string())
        );
    }

    #[test]
    fn test_details_json_empty_is_none() {
        let event = LogEvent::new(EventKind::ServiceStop, "stopped");
        assert!(event.details_json().is_none());

        let event = event.with_detail("attempt", 3);
        assert_eq!(event.details_json().unwrap()["attempt"], 3);
    }
}
