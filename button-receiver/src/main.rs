//! Button Receiver - subscriber process
//!
//! Connects to the broker, subscribes to the button topic and reports every
//! decoded press until SIGINT/SIGTERM. Connect or subscribe failures end the
//! process immediately, there is no reconnection.

use anyhow::{Context, Result};
use button_receiver::signals::shutdown_signal;
use button_receiver::{Dispatcher, MessageRouter, MqttTransport, ReceiverConfig, Subscriber, SubscriberHooks};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();
    button_receiver::init_tracing();

    info!("🚀 Starting MQTT button receiver...");

    let config = Arc::new(ReceiverConfig::load().await.context("failed to load configuration")?);

    let transport = MqttTransport::new(&config);
    let router = MessageRouter::new(config.subscription.topic.clone(), Dispatcher::with_defaults());
    let mut subscriber = Subscriber::new(config.clone(), transport, router, SubscriberHooks::default());

    subscriber.connect().await.context("Failed to connect to MQTT broker")?;
    subscriber.subscribe().await.context("Failed to subscribe to topic")?;

    let router = subscriber.router();
    info!(
        filter = router.topic_filter(),
        actions = ?router.dispatcher().known_actions(),
        "⏳ Waiting for button presses... (Press Ctrl+C to exit)"
    );
    subscriber.run_until(shutdown_signal()).await;

    info!("🛑 Shutting down...");
    let timeout = subscriber.config().shutdown_timeout();
    subscriber.shutdown(timeout).await;
    info!("✅ Goodbye!");
    Ok(())
}
