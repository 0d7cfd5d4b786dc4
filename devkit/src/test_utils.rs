/*!
Test Harness pour le receiver

Câble un `Subscriber` complet sur un `MockTransport` :
- handler enregistreur sur `button_pressed` (et actions additionnelles)
- démarrage connect + subscribe, boucle de réception dans une task
- arrêt par signal simulé, avec shutdown borné
*/

use crate::mqtt_stub::{mock_transport, MockBroker, MockTransport};
use anyhow::Result;
use button_receiver::{
    ActionHandler, ButtonEvent, ConnectionState, Dispatcher, MessageRouter, ReceiverConfig,
    ReceiverError, ShutdownOutcome, Subscriber, SubscriberHooks, BUTTON_PRESSED,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Handler qui garde une copie de chaque événement dispatché
#[derive(Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<ButtonEvent>>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<ButtonEvent> {
        self.events.lock().clone()
    }
}

impl ActionHandler for RecordingHandler {
    fn handle(&self, event: &ButtonEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Harness de test complet pour le subscriber
pub struct TestHarness {
    pub config: Arc<ReceiverConfig>,
    pub broker: MockBroker,
    pub recorder: RecordingHandler,
    subscriber: Subscriber<MockTransport>,
}

impl TestHarness {
    /// Config par défaut, client id de test
    pub fn new() -> Self {
        let mut config = ReceiverConfig::default();
        config.broker.client_id = "button-devkit-test".to_string();
        Self::with_config(config)
    }

    pub fn with_config(config: ReceiverConfig) -> Self {
        Self::with_parts(config, Dispatcher::new(), SubscriberHooks::default())
    }

    /// `button_pressed` est toujours enregistré, les autres actions de
    /// `dispatcher` sont conservées.
    pub fn with_parts(config: ReceiverConfig, dispatcher: Dispatcher, hooks: SubscriberHooks) -> Self {
        // Init logging pour tests
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("button_receiver=debug")
            .try_init()
            .ok();

        let config = Arc::new(config);
        let recorder = RecordingHandler::default();
        let dispatcher = dispatcher.register(BUTTON_PRESSED, recorder.clone());
        let router = MessageRouter::new(config.subscription.topic.clone(), dispatcher);
        let (transport, broker) = mock_transport();
        let subscriber = Subscriber::new(config.clone(), transport, router, hooks);

        Self { config, broker, recorder, subscriber }
    }

    pub fn subscriber(&mut self) -> &mut Subscriber<MockTransport> {
        &mut self.subscriber
    }

    pub fn state(&self) -> ConnectionState {
        self.subscriber.state()
    }

    /// connect puis subscribe, comme le main
    pub async fn start(&mut self) -> Result<(), ReceiverError> {
        self.subscriber.connect().await?;
        self.subscriber.subscribe().await
    }

    /// Lance la boucle de réception dans une task, jusqu'au `stop`
    pub fn spawn(self) -> RunningHarness {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let state = self.subscriber.watch_state();
        let shutdown_timeout = self.config.shutdown_timeout();
        let mut subscriber = self.subscriber;

        let task = tokio::spawn(async move {
            subscriber
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await;
            let outcome = subscriber.shutdown(shutdown_timeout).await;
            (subscriber, outcome)
        });

        RunningHarness {
            broker: self.broker,
            recorder: self.recorder,
            state,
            stop: Some(stop_tx),
            task,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Harness dont la boucle tourne dans une task tokio
pub struct RunningHarness {
    pub broker: MockBroker,
    pub recorder: RecordingHandler,
    pub state: watch::Receiver<ConnectionState>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<(Subscriber<MockTransport>, ShutdownOutcome)>,
}

impl RunningHarness {
    /// Attend que `count` événements aient été enregistrés
    pub async fn wait_for_events(&self, count: usize, timeout_ms: u64) -> Vec<ButtonEvent> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let events = self.recorder.events();
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tracing::warn!("⏰ Timeout waiting for {} events", count);
        self.recorder.events()
    }

    /// Attend un état satisfaisant `predicate`
    pub async fn wait_for_state<F>(&mut self, predicate: F, timeout_ms: u64) -> Result<ConnectionState>
    where
        F: Fn(&ConnectionState) -> bool,
    {
        let state = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.state.wait_for(|state| predicate(state)),
        )
        .await??;
        Ok(state.clone())
    }

    /// Simule le signal de terminaison et récupère le subscriber arrêté
    pub async fn stop(mut self) -> Result<(Subscriber<MockTransport>, ShutdownOutcome)> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_stub::ButtonMessageBuilder;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let mut harness = TestHarness::new();
        assert_eq!(harness.subscriber().config().broker.client_id, "button-devkit-test");
        let router = harness.subscriber().router();
        assert_eq!(router.topic_filter(), harness.config.subscription.topic);
        assert!(router.dispatcher().is_known(BUTTON_PRESSED));

        harness.start().await.unwrap();
        assert!(matches!(harness.state(), ConnectionState::Subscribed { .. }));

        let running = harness.spawn();
        running
            .broker
            .simulate_incoming("esp8266/button", ButtonMessageBuilder::new().to_bytes());

        let events = running.wait_for_events(1, 1000).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].device, "esp8266-01");

        let (subscriber, outcome) = running.stop().await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Disconnected);
        assert!(subscriber.state().is_terminal());
    }
}
