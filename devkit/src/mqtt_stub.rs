/*!
Mock transport pour tester le receiver sans broker

Implémente `button_receiver::Transport` en mémoire. Le `MockBroker` associé
permet de scripter les échecs (connect, subscribe), de simuler la réception
de messages ou une perte de connexion, et de compter les appels.
*/

use async_trait::async_trait;
use button_receiver::{InboundMessage, Transport, TransportError, BUTTON_PRESSED};
use parking_lot::Mutex;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

enum Delivery {
    Message(InboundMessage),
    Drop(String),
}

#[derive(Default)]
struct Script {
    connect_error: Option<String>,
    subscribe_error: Option<String>,
    hang_on_disconnect: bool,
    connect_calls: usize,
    disconnect_calls: usize,
    subscriptions: Vec<(String, QoS)>,
}

/// Transport en mémoire, piloté par un `MockBroker`
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    incoming: mpsc::UnboundedReceiver<Delivery>,
}

/// Côté "broker" du mock : scripts et simulation
#[derive(Clone)]
pub struct MockBroker {
    script: Arc<Mutex<Script>>,
    sender: mpsc::UnboundedSender<Delivery>,
}

/// Crée une paire transport / broker reliés
pub fn mock_transport() -> (MockTransport, MockBroker) {
    let script = Arc::new(Mutex::new(Script::default()));
    let (sender, incoming) = mpsc::unbounded_channel();
    (
        MockTransport { script: script.clone(), incoming },
        MockBroker { script, sender },
    )
}

impl MockBroker {
    /// Le prochain connect échouera avec ce motif
    pub fn fail_connect<S: Into<String>>(&self, reason: S) -> &Self {
        self.script.lock().connect_error = Some(reason.into());
        self
    }

    /// Le SUBACK sera un refus
    pub fn reject_subscription<S: Into<String>>(&self, reason: S) -> &Self {
        self.script.lock().subscribe_error = Some(reason.into());
        self
    }

    /// Le disconnect ne répondra jamais (broker muet)
    pub fn hang_on_disconnect(&self) -> &Self {
        self.script.lock().hang_on_disconnect = true;
        self
    }

    /// Simule la livraison d'un message sur un topic
    pub fn simulate_incoming<S, V>(&self, topic: S, payload: V)
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = InboundMessage::new(topic, payload);
        info!("📨 [MOCK] Simulated incoming: {}", message.topic);
        // le receiver peut déjà être arrêté, le message est alors perdu
        let _ = self.sender.send(Delivery::Message(message));
    }

    /// Simule une perte de connexion côté transport
    pub fn drop_connection<S: Into<String>>(&self, reason: S) {
        let _ = self.sender.send(Delivery::Drop(reason.into()));
    }

    pub fn connect_attempts(&self) -> usize {
        self.script.lock().connect_calls
    }

    pub fn disconnect_attempts(&self) -> usize {
        self.script.lock().disconnect_calls
    }

    /// Abonnements reçus (pour assertions de tests)
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.script.lock().subscriptions.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut script = self.script.lock();
        script.connect_calls += 1;
        match script.connect_error.clone() {
            Some(reason) => Err(TransportError::Refused(reason)),
            None => Ok(()),
        }
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let mut script = self.script.lock();
        script.subscriptions.push((topic.to_string(), qos));
        match script.subscribe_error.clone() {
            Some(_) => Err(TransportError::SubscriptionRejected(topic.to_string())),
            None => Ok(()),
        }
    }

    async fn next_message(&mut self) -> Result<InboundMessage, TransportError> {
        match self.incoming.recv().await {
            Some(Delivery::Message(message)) => Ok(message),
            Some(Delivery::Drop(reason)) => Err(TransportError::Other(reason)),
            None => Err(TransportError::Closed),
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let hang = {
            let mut script = self.script.lock();
            script.disconnect_calls += 1;
            script.hang_on_disconnect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Construit des payloads au format du firmware ESP8266
#[derive(Debug, Clone)]
pub struct ButtonMessageBuilder {
    device: String,
    action: String,
    timestamp: i64,
    status: String,
}

impl Default for ButtonMessageBuilder {
    fn default() -> Self {
        Self {
            device: "esp8266-01".to_string(),
            action: BUTTON_PRESSED.to_string(),
            timestamp: 1_700_000_000_000,
            status: "ok".to_string(),
        }
    }
}

impl ButtonMessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device<S: Into<String>>(mut self, device: S) -> Self {
        self.device = device.into();
        self
    }

    pub fn action<S: Into<String>>(mut self, action: S) -> Self {
        self.action = action.into();
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn status<S: Into<String>>(mut self, status: S) -> Self {
        self.status = status.into();
        self
    }

    pub fn build(&self) -> Value {
        serde_json::json!({
            "device": self.device,
            "action": self.action,
            "timestamp": self.timestamp,
            "status": self.status,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.build().to_string().into_bytes()
    }

    /// Payloads qui ne doivent jamais produire de ButtonEvent
    pub fn malformed_payloads() -> Vec<Vec<u8>> {
        vec![
            b"not json".to_vec(),
            b"".to_vec(),
            br#"["esp8266-01","button_pressed",1,"ok"]"#.to_vec(),
            br#"{"action":"button_pressed","timestamp":1,"status":"ok"}"#.to_vec(),
            br#"{"device":"esp8266-01","action":"button_pressed","timestamp":"soon","status":"ok"}"#.to_vec(),
            br#"{"device":"","action":"button_pressed","timestamp":1,"status":"ok"}"#.to_vec(),
        ]
    }
}
