//! Database targets and the notifications they emit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One configured database: identity, connection string and the module
/// identifiers to activate on it. Immutable once loaded.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseTarget {
    pub name: String,
    pub connection_string: String,
    #[serde(default)]
    pub modules: Vec<String>,
}

impl DatabaseTarget {
    pub fn new(
        name: impl Into<String>,
        connection_string: impl Into<String>,
        modules: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            connection_string: connection_string.into(),
            modules: modules.into_iter().map(Into::into).collect(),
        }
    }

    /// Checks the fields every target needs before it can be started.
    pub fn validate(&self) -> Result<(), TargetError> {
        if self.name.trim().is_empty() {
            return Err(TargetError::MissingName);
        }
        if self.connection_string.trim().is_empty() {
            return Err(TargetError::MissingConnectionString(self.name.clone()));
        }
        if self.modules.iter().all(|m| m.trim().is_empty()) {
            return Err(TargetError::NoModules(self.name.clone()));
        }
        Ok(())
    }
}

// Connection strings carry credentials; keep them out of Debug output.
impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseTarget")
            .field("name", &self.name)
            .field("connection_string", &"<redacted>")
            .field("modules", &self.modules)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("missing database name in configuration")]
    MissingName,

    #[error("missing connection string in configuration for database {0}")]
    MissingConnectionString(String),

    #[error("at least one module must be enabled in configuration for database {0}")]
    NoModules(String),
}

/// A notification received on a LISTEN session: channel plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub channel: String,
    pub payload: String,
}

impl NotificationMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}
