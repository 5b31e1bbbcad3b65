use async_trait::async_trait;
use sqlx::PgPool;

use crate::connection::PoolSettings;
use crate::error::ConnectionError;
use crate::target::DatabaseTarget;

/// Opens and probes the shared pool of one database target.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Parses the target's connection string and builds a pool with the
    /// given bounds. Must not block on the network for longer than the
    /// pool needs to be constructed; liveness is checked through `ping`.
    async fn open(
        &self,
        target: &DatabaseTarget,
        settings: &PoolSettings,
    ) -> Result<PgPool, ConnectionError>;

    /// Liveness probe.
    async fn ping(&self, target: &DatabaseTarget, pool: &PgPool) -> Result<(), ConnectionError>;

    async fn close(&self, _target: &DatabaseTarget, pool: &PgPool) {
        pool.close().await;
    }
}
