use async_trait::async_trait;

use crate::error::ListenerError;
use crate::target::NotificationMessage;

/// Opens dedicated LISTEN sessions.
#[async_trait]
pub trait ChannelSubscriber: Send + Sync {
    /// Opens a connection outside the shared pool and subscribes it to
    /// `channel`. Fails if either step fails.
    async fn subscribe(
        &self,
        connection_string: &str,
        channel: &str,
    ) -> Result<Box<dyn ListenSession>, ListenerError>;
}

/// A dedicated connection subscribed to exactly one channel.
#[async_trait]
pub trait ListenSession: Send {
    fn channel(&self) -> &str;

    /// Waits for the next notification. Callers bound this wait themselves.
    async fn recv(&mut self) -> Result<NotificationMessage, ListenerError>;

    /// Unsubscribes and closes the connection.
    async fn close(self: Box<Self>);
}
