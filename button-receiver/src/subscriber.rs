//! Subscriber lifecycle manager
//!
//! Owns the single broker connection of the process and walks it through
//! its states:
//!
//! ```text
//! Disconnected(NotStarted) --connect ok-----> Connected
//! Disconnected(NotStarted) --connect err----> Disconnected(ConnectFailed)   fatal
//! Connected                --subscribe ok---> Subscribed
//! Connected                --subscribe err--> Disconnected(SubscribeFailed) fatal
//! Subscribed               --shutdown-------> Disconnected(Shutdown)
//! Subscribed               --lost-----------> Disconnected(ConnectionLost)  no retry
//! ```
//!
//! Reconnection is not attempted here. Fatal errors are returned to the
//! caller, which terminates the process.

use crate::config::ReceiverConfig;
use crate::handler::MessageRouter;
use crate::transport::{Transport, TransportError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    NotStarted,
    ConnectFailed(String),
    SubscribeFailed(String),
    ConnectionLost(String),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected(DisconnectReason),
    Connecting,
    Connected,
    Subscribed { topic: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Subscribed { .. })
    }

    /// Shutdown or failure: the manager accepts no further work.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected(reason) if *reason != DisconnectReason::NotStarted)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("failed to connect to MQTT broker {broker}: {source}")]
    Connect {
        broker: String,
        #[source]
        source: TransportError,
    },
    #[error("failed to subscribe to topic {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: TransportError,
    },
    #[error("{operation} not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },
}

pub type ConnectHook = Arc<dyn Fn(&ReceiverConfig) + Send + Sync>;
pub type ConnectionLostHook = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// Callbacks injectés à la construction (connexion établie, connexion perdue)
#[derive(Clone)]
pub struct SubscriberHooks {
    pub on_connect: ConnectHook,
    pub on_connection_lost: ConnectionLostHook,
}

impl Default for SubscriberHooks {
    fn default() -> Self {
        Self {
            on_connect: Arc::new(|config: &ReceiverConfig| {
                info!(broker = %config.broker_address(), client_id = %config.broker.client_id, "✅ Connected to MQTT broker!");
            }),
            on_connection_lost: Arc::new(|e: &TransportError| {
                error!("❌ Connection lost: {e}");
            }),
        }
    }
}

/// Issue d'un shutdown borné
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Disconnected,
    TimedOut,
    Failed(String),
    /// Rien à fermer (jamais connecté, ou connexion déjà perdue)
    NotConnected,
}

pub struct Subscriber<T: Transport> {
    config: Arc<ReceiverConfig>,
    transport: T,
    router: Arc<MessageRouter>,
    hooks: SubscriberHooks,
    state: watch::Sender<ConnectionState>,
}

impl<T: Transport> Subscriber<T> {
    pub fn new(
        config: Arc<ReceiverConfig>,
        transport: T,
        router: MessageRouter,
        hooks: SubscriberHooks,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected(DisconnectReason::NotStarted));
        Self { config, transport, router: Arc::new(router), hooks, state }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Observe state transitions from another task.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn router(&self) -> Arc<MessageRouter> {
        self.router.clone()
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }

    /// Single attempt, no retry.
    pub async fn connect(&mut self) -> Result<(), ReceiverError> {
        let current = self.state();
        if current != ConnectionState::Disconnected(DisconnectReason::NotStarted) {
            return Err(ReceiverError::InvalidState { operation: "connect", state: current });
        }

        let broker = self.config.broker_address();
        info!(%broker, client_id = %self.config.broker.client_id, "connecting to MQTT broker");
        self.set_state(ConnectionState::Connecting);

        match self.transport.connect().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                (self.hooks.on_connect)(&self.config);
                Ok(())
            }
            Err(source) => {
                self.set_state(ConnectionState::Disconnected(DisconnectReason::ConnectFailed(
                    source.to_string(),
                )));
                Err(ReceiverError::Connect { broker, source })
            }
        }
    }

    /// Registers the configured topic at the configured QoS. Only valid once,
    /// right after a successful `connect`.
    pub async fn subscribe(&mut self) -> Result<(), ReceiverError> {
        let current = self.state();
        if current != ConnectionState::Connected {
            return Err(ReceiverError::InvalidState { operation: "subscribe", state: current });
        }

        let topic = self.config.subscription.topic.clone();
        match self.transport.subscribe(&topic, self.config.subscription.qos()).await {
            Ok(()) => {
                info!(%topic, qos = self.config.subscription.qos, "📡 Subscribed to topic");
                self.set_state(ConnectionState::Subscribed { topic });
                Ok(())
            }
            Err(source) => {
                self.set_state(ConnectionState::Disconnected(DisconnectReason::SubscribeFailed(
                    source.to_string(),
                )));
                Err(ReceiverError::Subscribe { topic, source })
            }
        }
    }

    /// Pumps deliveries into the router until `shutdown` resolves.
    ///
    /// A lost connection is reported through the hook and ends message
    /// delivery, but this still waits for `shutdown` so the process stays up
    /// until it is told to stop.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        while matches!(self.state(), ConnectionState::Subscribed { .. }) {
            let delivery = tokio::select! {
                _ = &mut shutdown => return,
                delivery = self.transport.next_message() => delivery,
            };

            match delivery {
                Ok(message) => {
                    self.router.on_message(&message.topic, &message.payload);
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected(DisconnectReason::ConnectionLost(
                        e.to_string(),
                    )));
                    (self.hooks.on_connection_lost)(&e);
                }
            }
        }

        warn!(state = ?self.state(), "no longer receiving messages, waiting for shutdown signal");
        shutdown.await;
    }

    /// Graceful disconnect bounded by `limit`. Returns once the broker
    /// disconnect completed or `limit` elapsed, whichever comes first.
    pub async fn shutdown(&mut self, limit: Duration) -> ShutdownOutcome {
        if !self.state().is_connected() {
            info!(state = ?self.state(), "shutdown: nothing to disconnect");
            return ShutdownOutcome::NotConnected;
        }

        // plus aucune souscription acceptée à partir d'ici
        self.set_state(ConnectionState::Disconnected(DisconnectReason::Shutdown));

        let outcome = match tokio::time::timeout(limit, self.transport.disconnect()).await {
            Ok(Ok(())) => ShutdownOutcome::Disconnected,
            Ok(Err(e)) => {
                warn!("disconnect failed: {e}");
                ShutdownOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(?limit, "broker did not acknowledge disconnect in time");
                ShutdownOutcome::TimedOut
            }
        };
        info!(?outcome, "🛑 subscriber stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        let idle = ConnectionState::Disconnected(DisconnectReason::NotStarted);
        assert!(!idle.is_connected());
        assert!(!idle.is_terminal());

        let subscribed = ConnectionState::Subscribed { topic: "esp8266/button".into() };
        assert!(subscribed.is_connected());
        assert!(!subscribed.is_terminal());

        let lost = ConnectionState::Disconnected(DisconnectReason::ConnectionLost("eof".into()));
        assert!(!lost.is_connected());
        assert!(lost.is_terminal());
        assert!(ConnectionState::Disconnected(DisconnectReason::Shutdown).is_terminal());
    }

    #[test]
    fn test_fatal_errors_render_context() {
        let err = ReceiverError::Connect {
            broker: "tcp://localhost:1883".into(),
            source: TransportError::Refused("BadClientId".into()),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to MQTT broker tcp://localhost:1883: broker refused connection: BadClientId"
        );
    }
}
