//! End-to-end lifecycle of the subscriber against the in-memory transport.

use button_devkit::{ButtonMessageBuilder, TestHarness};
use button_receiver::{
    ButtonEvent, ConnectionState, DisconnectReason, Dispatcher, ReceiverConfig, ReceiverError,
    ShutdownOutcome, SubscriberHooks, TransportError,
};
use rumqttc::QoS;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TOPIC: &str = "esp8266/button";

#[tokio::test]
async fn known_unknown_and_garbage_messages() {
    let mut harness = TestHarness::new();
    harness.start().await.unwrap();
    let mut running = harness.spawn();

    running.broker.simulate_incoming(TOPIC, "not json");
    running.broker.simulate_incoming(
        TOPIC,
        r#"{"device":"esp8266-01","action":"wiggle","timestamp":1,"status":"ok"}"#,
    );
    running.broker.simulate_incoming(
        TOPIC,
        r#"{"device":"esp8266-01","action":"button_pressed","timestamp":1700000000000,"status":"ok"}"#,
    );

    // les messages sont traités dans l'ordre : seul le troisième est enregistré
    let events = running.wait_for_events(1, 2000).await;
    assert_eq!(
        events,
        vec![ButtonEvent {
            device: "esp8266-01".into(),
            action: "button_pressed".into(),
            timestamp: 1_700_000_000_000,
            status: "ok".into(),
        }]
    );

    let state = running
        .wait_for_state(|s| matches!(s, ConnectionState::Subscribed { .. }), 100)
        .await
        .unwrap();
    assert_eq!(state, ConnectionState::Subscribed { topic: TOPIC.into() });

    let (_, outcome) = running.stop().await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Disconnected);
}

#[tokio::test]
async fn malformed_payloads_do_not_disturb_the_connection() {
    let mut harness = TestHarness::new();
    harness.start().await.unwrap();
    let running = harness.spawn();

    for payload in ButtonMessageBuilder::malformed_payloads() {
        running.broker.simulate_incoming(TOPIC, payload);
    }
    running
        .broker
        .simulate_incoming(TOPIC, ButtonMessageBuilder::new().device("after-garbage").to_bytes());

    let events = running.wait_for_events(1, 2000).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].device, "after-garbage");
    assert!(matches!(*running.state.borrow(), ConnectionState::Subscribed { .. }));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn messages_outside_the_subscription_are_ignored() {
    let mut harness = TestHarness::new();
    harness.start().await.unwrap();
    let running = harness.spawn();

    running
        .broker
        .simulate_incoming("esp8266/relay", ButtonMessageBuilder::new().device("relay").to_bytes());
    running
        .broker
        .simulate_incoming(TOPIC, ButtonMessageBuilder::new().device("button").to_bytes());

    let events = running.wait_for_events(1, 2000).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].device, "button");

    running.stop().await.unwrap();
}

#[tokio::test]
async fn failed_connect_is_fatal_and_not_retried() {
    let mut harness = TestHarness::new();
    harness.broker.fail_connect("ServiceUnavailable");

    let err = harness.start().await.unwrap_err();
    assert!(matches!(
        err,
        ReceiverError::Connect { source: TransportError::Refused(_), .. }
    ));
    assert_eq!(harness.broker.connect_attempts(), 1);
    assert!(harness.broker.subscriptions().is_empty());
    assert!(matches!(
        harness.state(),
        ConnectionState::Disconnected(DisconnectReason::ConnectFailed(_))
    ));

    // aucune seconde tentative possible sur ce subscriber
    let again = harness.subscriber().connect().await;
    assert!(matches!(again, Err(ReceiverError::InvalidState { operation: "connect", .. })));
    assert_eq!(harness.broker.connect_attempts(), 1);
}

#[tokio::test]
async fn failed_subscribe_is_fatal() {
    let mut harness = TestHarness::new();
    harness.broker.reject_subscription("not authorized");

    let err = harness.start().await.unwrap_err();
    assert!(matches!(err, ReceiverError::Subscribe { ref topic, .. } if topic == TOPIC));
    assert_eq!(harness.broker.subscriptions().len(), 1);
    assert!(matches!(
        harness.state(),
        ConnectionState::Disconnected(DisconnectReason::SubscribeFailed(_))
    ));

    let outcome = harness.subscriber().shutdown(Duration::from_millis(50)).await;
    assert_eq!(outcome, ShutdownOutcome::NotConnected);
}

#[tokio::test]
async fn subscribe_registers_exactly_one_handler() {
    let mut harness = TestHarness::new();
    harness.start().await.unwrap();

    let second = harness.subscriber().subscribe().await;
    assert!(matches!(second, Err(ReceiverError::InvalidState { operation: "subscribe", .. })));
    assert_eq!(
        harness.broker.subscriptions(),
        vec![(TOPIC.to_string(), QoS::AtLeastOnce)]
    );
}

#[tokio::test]
async fn subscribe_before_connect_is_rejected() {
    let mut harness = TestHarness::new();
    let result = harness.subscriber().subscribe().await;
    assert!(matches!(result, Err(ReceiverError::InvalidState { .. })));
    assert!(harness.broker.subscriptions().is_empty());
}

#[tokio::test]
async fn shutdown_is_bounded_when_broker_does_not_answer() {
    let mut config = ReceiverConfig::default();
    config.shutdown_timeout_ms = 100;
    let mut harness = TestHarness::with_config(config);
    harness.broker.hang_on_disconnect();
    harness.start().await.unwrap();

    let started = Instant::now();
    let outcome = harness.subscriber().shutdown(Duration::from_millis(100)).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, ShutdownOutcome::TimedOut);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600), "shutdown took {elapsed:?}");
    assert_eq!(harness.broker.disconnect_attempts(), 1);
    assert_eq!(
        harness.state(),
        ConnectionState::Disconnected(DisconnectReason::Shutdown)
    );

    // plus de nouvelle souscription après le shutdown
    assert!(harness.subscriber().subscribe().await.is_err());
}

#[tokio::test]
async fn connection_loss_is_reported_without_retry() {
    let lost = Arc::new(AtomicUsize::new(0));
    let connected = Arc::new(AtomicUsize::new(0));
    let hooks = SubscriberHooks {
        on_connect: {
            let connected = connected.clone();
            Arc::new(move |_: &ReceiverConfig| {
                connected.fetch_add(1, Ordering::SeqCst);
            })
        },
        on_connection_lost: {
            let lost = lost.clone();
            Arc::new(move |_: &TransportError| {
                lost.fetch_add(1, Ordering::SeqCst);
            })
        },
    };

    let mut harness = TestHarness::with_parts(ReceiverConfig::default(), Dispatcher::new(), hooks);
    harness.start().await.unwrap();
    assert_eq!(connected.load(Ordering::SeqCst), 1);

    let mut running = harness.spawn();
    running.broker.drop_connection("keep-alive timeout");

    let state = running
        .wait_for_state(|s| !s.is_connected(), 2000)
        .await
        .unwrap();
    assert_eq!(
        state,
        ConnectionState::Disconnected(DisconnectReason::ConnectionLost("keep-alive timeout".into()))
    );
    assert_eq!(lost.load(Ordering::SeqCst), 1);

    // le process reste en vie mais ne reçoit plus rien
    running
        .broker
        .simulate_incoming(TOPIC, ButtonMessageBuilder::new().to_bytes());
    assert!(running.wait_for_events(1, 100).await.is_empty());

    let (_, outcome) = running.stop().await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::NotConnected);
    assert_eq!(connected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn additional_action_handlers_are_dispatched() {
    let long_presses = Arc::new(AtomicUsize::new(0));
    let counter = long_presses.clone();
    let dispatcher = Dispatcher::new().register("long_press", move |_: &ButtonEvent| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let mut harness =
        TestHarness::with_parts(ReceiverConfig::default(), dispatcher, SubscriberHooks::default());
    harness.start().await.unwrap();
    let running = harness.spawn();

    running
        .broker
        .simulate_incoming(TOPIC, ButtonMessageBuilder::new().action("long_press").to_bytes());
    running
        .broker
        .simulate_incoming(TOPIC, ButtonMessageBuilder::new().to_bytes());

    running.wait_for_events(1, 2000).await;
    assert_eq!(long_presses.load(Ordering::SeqCst), 1);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn subscription_follows_yaml_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "subscription:\n  topic: esp8266/+\n  qos: 0\nshutdown_timeout_ms: 50").unwrap();

    let config = ReceiverConfig::from_file_or_default(file.path()).await.unwrap();
    config.validate().unwrap();

    let mut harness = TestHarness::with_config(config);
    harness.start().await.unwrap();
    assert_eq!(
        harness.broker.subscriptions(),
        vec![("esp8266/+".to_string(), QoS::AtMostOnce)]
    );

    let running = harness.spawn();
    running
        .broker
        .simulate_incoming("esp8266/button-2", ButtonMessageBuilder::new().device("second").to_bytes());
    let events = running.wait_for_events(1, 2000).await;
    assert_eq!(events[0].device, "second");

    running.stop().await.unwrap();
}
