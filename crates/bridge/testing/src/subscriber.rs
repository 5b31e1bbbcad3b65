//! In-memory LISTEN sessions keyed by (connection string, channel).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgbridge_core::{ChannelSubscriber, ListenSession, ListenerError, NotificationMessage};
use tokio::sync::mpsc;

use crate::journal::Journal;

type Delivery = Result<NotificationMessage, ListenerError>;
type SessionKey = (String, String);

#[derive(Clone, Default)]
pub struct FakeSubscriber {
    inner: Arc<SubscriberState>,
    journal: Journal,
}

#[derive(Default)]
struct SubscriberState {
    sessions: Mutex<HashMap<SessionKey, mpsc::UnboundedSender<Delivery>>>,
    refused: Mutex<HashSet<String>>,
}

impl FakeSubscriber {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: Arc::default(),
            journal,
        }
    }

    /// NOTIFY `channel` on every database. Returns false when nobody is
    /// listening, in which case the notification is lost, as it would be on
    /// a real server.
    pub fn publish(&self, channel: &str, payload: &str) -> bool {
        self.deliver(
            |_, ch| ch == channel,
            || Ok(NotificationMessage::new(channel, payload)),
        )
    }

    /// NOTIFY `channel` on the database reached through `connection_string`.
    pub fn publish_to(&self, connection_string: &str, channel: &str, payload: &str) -> bool {
        self.deliver(
            |conn, ch| conn == connection_string && ch == channel,
            || Ok(NotificationMessage::new(channel, payload)),
        )
    }

    /// Makes every session on `channel` report a transient receive error.
    pub fn inject_error(&self, channel: &str, message: &str) -> bool {
        self.deliver(
            |_, ch| ch == channel,
            || Err(ListenerError::Receive(message.to_string())),
        )
    }

    /// Subscribing to `channel` fails.
    pub fn refuse(&self, channel: &str) {
        self.inner.refused.lock().insert(channel.to_string());
    }

    /// True when any database has a session on `channel`.
    pub fn is_listening(&self, channel: &str) -> bool {
        self.inner.sessions.lock().keys().any(|(_, ch)| ch == channel)
    }

    pub fn is_listening_on(&self, connection_string: &str, channel: &str) -> bool {
        self.inner
            .sessions
            .lock()
            .contains_key(&(connection_string.to_string(), channel.to_string()))
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    fn deliver(
        &self,
        matches: impl Fn(&str, &str) -> bool,
        delivery: impl Fn() -> Delivery,
    ) -> bool {
        let mut delivered = false;
        for ((conn, ch), tx) in self.inner.sessions.lock().iter() {
            if matches(conn, ch) && tx.send(delivery()).is_ok() {
                delivered = true;
            }
        }
        delivered
    }
}

#[async_trait]
impl ChannelSubscriber for FakeSubscriber {
    async fn subscribe(
        &self,
        connection_string: &str,
        channel: &str,
    ) -> Result<Box<dyn ListenSession>, ListenerError> {
        if self.inner.refused.lock().contains(channel) {
            return Err(ListenerError::Subscribe {
                channel: channel.to_string(),
                message: "permission denied".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let key = (connection_string.to_string(), channel.to_string());
        self.inner.sessions.lock().insert(key.clone(), tx);
        self.journal.record(format!("listen:{}", channel));

        Ok(Box::new(FakeSession {
            key,
            rx,
            state: Arc::clone(&self.inner),
            journal: self.journal.clone(),
        }))
    }
}

struct FakeSession {
    key: SessionKey,
    rx: mpsc::UnboundedReceiver<Delivery>,
    state: Arc<SubscriberState>,
    journal: Journal,
}

#[async_trait]
impl ListenSession for FakeSession {
    fn channel(&self) -> &str {
        &self.key.1
    }

    async fn recv(&mut self) -> Result<NotificationMessage, ListenerError> {
        match self.rx.recv().await {
            Some(delivery) => delivery,
            None => Err(ListenerError::Receive("connection closed".to_string())),
        }
    }

    async fn close(self: Box<Self>) {
        self.state.sessions.lock().remove(&self.key);
        self.journal.record(format!("unlisten:{}", self.key.1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALES: &str = "postgres://bridge@sales-db/sales";
    const HR: &str = "postgres://bridge@hr-db/hr";

    #[tokio::test]
    async fn test_same_channel_on_two_databases() {
        let subscriber = FakeSubscriber::new(Journal::new());
        let mut sales = subscriber.subscribe(SALES, "X").await.unwrap();
        let mut hr = subscriber.subscribe(HR, "X").await.unwrap();
        assert_eq!(subscriber.session_count(), 2);

        assert!(subscriber.publish_to(HR, "X", "7"));
        assert_eq!(hr.recv().await.unwrap().payload, "7");

        assert!(subscriber.publish_to(SALES, "X", "3"));
        assert_eq!(sales.recv().await.unwrap().payload, "3");

        sales.close().await;
        assert!(!subscriber.is_listening_on(SALES, "X"));
        assert!(subscriber.is_listening_on(HR, "X"));
        assert!(!subscriber.publish_to(SALES, "X", "lost"));

        hr.close().await;
        assert!(!subscriber.is_listening("X"));
    }
}
