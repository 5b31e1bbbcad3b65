//! Graceful shutdown coordination.
//!
//! A [`GracefulShutdown`] is triggered either by an OS signal (SIGINT,
//! SIGTERM) or programmatically. Waiters observe the first trigger only; the
//! bridge teardown itself is bounded by [`ShutdownConfig::timeout`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Upper bound on the bridge teardown once a signal arrived.
    pub timeout: Duration,
    /// Install SIGINT/SIGTERM handlers.
    pub enable_signals: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            enable_signals: true,
        }
    }
}

impl ShutdownConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn without_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    SigTerm,
    SigInt,
    Programmatic(String),
    Unknown,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::SigTerm => write!(f, "SIGTERM"),
            ShutdownReason::SigInt => write!(f, "SIGINT"),
            ShutdownReason::Programmatic(why) => write!(f, "requested: {}", why),
            ShutdownReason::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    pub reason: ShutdownReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ShutdownState {
    Running,
    ShuttingDown(ShutdownSignal),
}

/// Cloneable handle shared by the signal handler and the main task.
#[derive(Clone)]
pub struct GracefulShutdown {
    state_tx: Arc<watch::Sender<ShutdownState>>,
    config: Arc<ShutdownConfig>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (state_tx, _) = watch::channel(ShutdownState::Running);
        Self {
            state_tx: Arc::new(state_tx),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Triggers shutdown. Later triggers are ignored.
    pub fn shutdown(&self, reason: ShutdownReason) {
        let signal = ShutdownSignal {
            reason,
            timestamp: Utc::now(),
        };
        let triggered = self.state_tx.send_if_modified(|state| match state {
            ShutdownState::Running => {
                *state = ShutdownState::ShuttingDown(signal.clone());
                true
            }
            ShutdownState::ShuttingDown(_) => false,
        });
        if triggered {
            info!("Triggering shutdown: {}", signal.reason);
        }
    }

    /// Resolves with the first trigger, including one that happened before
    /// the call.
    pub async fn wait_for_signal(&self) -> ShutdownSignal {
        let mut rx = self.state_tx.subscribe();
        loop {
            if let ShutdownState::ShuttingDown(signal) = &*rx.borrow_and_update() {
                return signal.clone();
            }
            if rx.changed().await.is_err() {
                return ShutdownSignal {
                    reason: ShutdownReason::Unknown,
                    timestamp: Utc::now(),
                };
            }
        }
    }

    pub fn state(&self) -> ShutdownState {
        self.state_tx.borrow().clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self.state(), ShutdownState::ShuttingDown(_))
    }
}

/// Spawns a task that triggers `coordinator` on SIGINT or SIGTERM.
pub fn start_signal_handler(coordinator: &GracefulShutdown) {
    if !coordinator.config.enable_signals {
        return;
    }
    let coordinator = coordinator.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            match signal::ctrl_c().await {
                Ok(()) => ShutdownReason::SigInt,
                Err(e) => {
                    error!("Failed to register ctrl-c handler: {}", e);
                    std::future::pending().await
                }
            }
        };

        #[cfg(unix)]
        let term = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    ShutdownReason::SigTerm
                }
                Err(e) => {
                    error!("Failed to register SIGTERM handler: {}", e);
                    std::future::pending().await
                }
            }
        };
        #[cfg(not(unix))]
        let term = std::future::pending::<ShutdownReason>();

        let reason = tokio::select! {
            reason = ctrl_c => reason,
            reason = term => reason,
        };
        coordinator.shutdown(reason);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_graceful_shutdown_trigger() {
        let shutdown = GracefulShutdown::new(ShutdownConfig::default());

        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.wait_for_signal().await }
        });
        tokio::task::yield_now().await;

        shutdown.shutdown(ShutdownReason::Programmatic("test".to_string()));

        let signal = handle.await.unwrap();
        assert_eq!(signal.reason, ShutdownReason::Programmatic("test".into()));
    }

    #[tokio::test]
    async fn test_shutdown_state() {
        let shutdown = GracefulShutdown::new(ShutdownConfig::default());

        assert!(!shutdown.is_shutting_down());
        assert!(matches!(shutdown.state(), ShutdownState::Running));

        shutdown.shutdown(ShutdownReason::SigInt);

        assert!(shutdown.is_shutting_down());
        assert!(matches!(shutdown.state(), ShutdownState::ShuttingDown(_)));
    }

    #[tokio::test]
    async fn test_signal_before_wait_is_observed() {
        let shutdown = GracefulShutdown::new(ShutdownConfig::default());
        shutdown.shutdown(ShutdownReason::SigTerm);

        let signal = shutdown.wait_for_signal().await;
        assert_eq!(signal.reason, ShutdownReason::SigTerm);
    }

    #[tokio::test]
    async fn test_first_trigger_wins() {
        let shutdown = GracefulShutdown::new(ShutdownConfig::default());
        shutdown.shutdown(ShutdownReason::SigTerm);
        shutdown.shutdown(ShutdownReason::SigInt);

        let signal = shutdown.wait_for_signal().await;
        assert_eq!(signal.reason, ShutdownReason::SigTerm);
    }

    #[test]
    fn test_config_builder() {
        let config = ShutdownConfig::default()
            .with_timeout(Duration::from_secs(5))
            .without_signals();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!config.enable_signals);
    }
}
