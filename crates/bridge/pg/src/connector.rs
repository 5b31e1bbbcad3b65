use std::str::FromStr;

use async_trait::async_trait;
use pgbridge_core::{ConnectionError, Connector, DatabaseTarget, PoolSettings};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgPool};
use tracing::debug;

/// Builds sqlx pools. The pool is created lazily; the first real connection
/// is made by the liveness probe.
#[derive(Debug, Clone, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn open(
        &self,
        target: &DatabaseTarget,
        settings: &PoolSettings,
    ) -> Result<PgPool, ConnectionError> {
        let options = PgConnectOptions::from_str(&target.connection_string)
            .map_err(|e| ConnectionError::InvalidConnectionString(e.to_string()))?
            .application_name("pgbridge");

        debug!(
            database = %target.name,
            max = settings.max_connections,
            min = settings.min_connections,
            "Creating connection pool"
        );

        Ok(PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_probe_timeout)
            .connect_lazy_with(options))
    }

    async fn ping(&self, _target: &DatabaseTarget, pool: &PgPool) -> Result<(), ConnectionError> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| ConnectionError::Ping(e.to_string()))?;
        conn.ping()
            .await
            .map_err(|e| ConnectionError::Ping(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_rejects_malformed_connection_string() {
        let target = DatabaseTarget::new("sales", "postgres://bridge@db:notaport/sales", ["pgb_trace"]);
        let err = PgConnector::new()
            .open(&target, &PoolSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidConnectionString(_)));
    }

    #[tokio::test]
    async fn test_open_applies_pool_bounds() {
        let target = DatabaseTarget::new("sales", "postgres://bridge@localhost:1/sales", ["pgb_trace"]);
        let settings = PoolSettings {
            max_connections: 4,
            min_connections: 0,
            ..Default::default()
        };
        let pool = PgConnector::new().open(&target, &settings).await.unwrap();
        assert_eq!(pool.options().get_max_connections(), 4);
        assert_eq!(pool.size(), 0);
        pool.close().await;
    }
}
