use std::collections::HashSet;
use std::time::Duration;

use pgbridge_core::connection::PoolSettings;
use pgbridge_core::{AuditConfig, BridgeSettings, DatabaseTarget, ListenerSettings, TargetError};
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "PGBRIDGE_CONFIG";
pub const ENV_PREFIX: &str = "PGBRIDGE";
pub const DEFAULT_CONFIG_FILE: &str = "config/pgbridge";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("no databases configured")]
    NoDatabases,

    #[error("duplicate database name in configuration: {0}")]
    DuplicateDatabase(String),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub databases: Vec<DatabaseTarget>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub audit: AuditSection,
    #[serde(default = "default_module_stop_timeout")]
    pub module_stop_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_health_check_period")]
    pub health_check_period_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            health_check_period_secs: default_health_check_period(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,
    /// Unset means unbounded.
    #[serde(default)]
    pub max_in_flight_handlers: Option<usize>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout(),
            handler_timeout_secs: default_handler_timeout(),
            max_in_flight_handlers: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AuditSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_secs: u64,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            flush_timeout_secs: default_flush_timeout(),
        }
    }
}

fn default_service_name() -> String {
    "pgbridge".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_health_check_period() -> u64 {
    30
}

fn default_wait_timeout() -> u64 {
    10
}

fn default_handler_timeout() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_flush_timeout() -> u64 {
    5
}

fn default_module_stop_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl BridgeConfig {
    /// Loads `config/pgbridge.*`, then the file named by `PGBRIDGE_CONFIG`,
    /// then `PGBRIDGE__*` environment variables, and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Self::from_config(settings)
    }

    /// Deserializes and validates an already-built configuration.
    pub fn from_config(settings: config::Config) -> Result<Self, ConfigError> {
        let config: BridgeConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.databases.is_empty() {
            return Err(ConfigError::NoDatabases);
        }

        let mut seen = HashSet::new();
        for target in &self.databases {
            target.validate()?;
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::DuplicateDatabase(target.name.clone()));
            }
        }

        if self.pool.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "pool.max_connections",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(ConfigError::Invalid {
                field: "pool.min_connections",
                reason: format!(
                    "{} exceeds max_connections {}",
                    self.pool.min_connections, self.pool.max_connections
                ),
            });
        }
        if self.audit.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "audit.queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.listener.max_in_flight_handlers == Some(0) {
            return Err(ConfigError::Invalid {
                field: "listener.max_in_flight_handlers",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }

    /// Total number of module activations across all databases.
    pub fn module_count(&self) -> usize {
        self.databases.iter().map(|d| d.modules.len()).sum()
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        let pool = PoolSettings {
            max_connections: self.pool.max_connections,
            min_connections: self.pool.min_connections,
            health_check_period: Duration::from_secs(self.pool.health_check_period_secs),
            ..PoolSettings::default()
        };
        let listener = ListenerSettings {
            wait_timeout: Duration::from_secs(self.listener.wait_timeout_secs),
            handler_timeout: Duration::from_secs(self.listener.handler_timeout_secs),
            max_in_flight: self.listener.max_in_flight_handlers,
        };

        BridgeSettings {
            pool: pool.normalized(),
            listener,
            module_stop_timeout: Duration::from_secs(self.module_stop_timeout_secs),
        }
    }

    pub fn audit_config(&self) -> AuditConfig {
        AuditConfig {
            queue_capacity: self.audit.queue_capacity,
            flush_timeout: Duration::from_secs(self.audit.flush_timeout_secs),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
