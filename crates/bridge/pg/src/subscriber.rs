use std::str::FromStr;

use async_trait::async_trait;
use pgbridge_core::{ChannelSubscriber, ListenSession, ListenerError, NotificationMessage};
use sqlx::postgres::{PgConnectOptions, PgListener, PgPoolOptions};
use sqlx::PgPool;
use tracing::{debug, info, warn};

/// `application_name` reported by LISTEN connections.
pub const LISTENER_APPLICATION_NAME: &str = "pgbridge-listener";

/// Opens one `PgListener` connection per subscription. Each session owns a
/// single-connection pool of its own; nothing is borrowed from the shared
/// pool.
#[derive(Debug, Clone, Default)]
pub struct PgChannelSubscriber;

impl PgChannelSubscriber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelSubscriber for PgChannelSubscriber {
    async fn subscribe(
        &self,
        connection_string: &str,
        channel: &str,
    ) -> Result<Box<dyn ListenSession>, ListenerError> {
        let options = PgConnectOptions::from_str(connection_string)
            .map_err(|e| ListenerError::Connect(e.to_string()))?
            .application_name(LISTENER_APPLICATION_NAME);
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .connect_with(options)
            .await
            .map_err(|e| ListenerError::Connect(e.to_string()))?;
        let mut listener = match PgListener::connect_with(&pool).await {
            Ok(listener) => listener,
            Err(e) => {
                pool.close().await;
                return Err(ListenerError::Connect(e.to_string()));
            }
        };

        if let Err(e) = listener.listen(channel).await {
            drop(listener);
            pool.close().await;
            return Err(ListenerError::Subscribe {
                channel: channel.to_string(),
                message: e.to_string(),
            });
        }
        info!("LISTEN on channel: {}", channel);

        Ok(Box::new(PgListenSession {
            channel: channel.to_string(),
            listener,
            pool,
        }))
    }
}

pub struct PgListenSession {
    channel: String,
    listener: PgListener,
    pool: PgPool,
}

impl std::fmt::Debug for PgListenSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgListenSession")
            .field("channel", &self.channel)
            .finish()
    }
}

#[async_trait]
impl ListenSession for PgListenSession {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn recv(&mut self) -> Result<NotificationMessage, ListenerError> {
        let notification = self
            .listener
            .recv()
            .await
            .map_err(|e| ListenerError::Receive(e.to_string()))?;
        Ok(NotificationMessage::new(
            notification.channel(),
            notification.payload(),
        ))
    }

    async fn close(self: Box<Self>) {
        let Self {
            channel,
            mut listener,
            pool,
        } = *self;
        if let Err(e) = listener.unlisten(&channel).await {
            warn!("UNLISTEN {} failed: {}", channel, e);
        }
        // Dropping the listener hands its connection back to `pool`; closing
        // the pool then terminates it gracefully.
        drop(listener);
        pool.close().await;
        debug!("Closed LISTEN connection for channel: {}", channel);
    }
}
