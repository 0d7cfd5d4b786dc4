//! Button Press - publie un appui bouton comme le firmware ESP8266
//!
//! Usage: `button-press [action]` (défaut : button_pressed).
//! Broker, topic et QoS viennent de la même configuration que le receiver.

use anyhow::{Context, Result};
use button_receiver::{ButtonEvent, ReceiverConfig, BUTTON_PRESSED};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use std::time::Instant;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

const DEVICE_ID: &str = "esp8266_lolin";

#[tokio::main]
async fn main() -> Result<()> {
    let started = Instant::now();
    dotenvy::dotenv().ok();
    button_receiver::init_tracing();

    let config = ReceiverConfig::load().await.context("failed to load configuration")?;
    let action = std::env::args().nth(1).unwrap_or_else(|| BUTTON_PRESSED.to_string());

    // id aléatoire façon firmware : ESP8266Client-xxxx
    let client_id = format!("ESP8266Client-{:x}", Uuid::new_v4().as_u128() as u16);
    let mut opts = MqttOptions::new(&client_id, &config.broker.host, config.broker.port);
    opts.set_keep_alive(config.keep_alive());
    let (client, mut eventloop) = AsyncClient::new(opts, config.channel_capacity);

    let event = ButtonEvent {
        device: DEVICE_ID.to_string(),
        action,
        timestamp: device_millis(started),
        status: "active".to_string(),
    };
    let payload = event.to_payload().context("Failed to serialize button event")?;
    let qos = config.subscription.qos();

    client
        .publish(&config.subscription.topic, qos, false, payload.clone())
        .await
        .context("Failed to queue publish")?;

    timeout(config.connect_timeout(), wait_for_delivery(&mut eventloop, qos))
        .await
        .context("broker did not confirm the publish in time")?
        .context("Failed to send message")?;

    info!(
        broker = %config.broker_address(),
        topic = %config.subscription.topic,
        %client_id,
        message = %String::from_utf8_lossy(&payload),
        "📤 Message sent successfully!"
    );

    client.disconnect().await.context("Failed to request disconnect")?;
    if timeout(config.shutdown_timeout(), drain_until_disconnect(&mut eventloop)).await.is_err() {
        warn!("disconnect not flushed within {:?}", config.shutdown_timeout());
    }
    Ok(())
}

/// Équivalent de `millis()` : uptime de la machine depuis son boot, lu dans
/// /proc/uptime. Hors Linux, durée depuis le lancement du process.
fn device_millis(started: Instant) -> i64 {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|txt| parse_uptime_ms(&txt))
        .unwrap_or_else(|| started.elapsed().as_millis() as i64)
}

/// "12345.67 54321.00" -> 12345670
fn parse_uptime_ms(txt: &str) -> Option<i64> {
    let secs: f64 = txt.split_whitespace().next()?.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some((secs * 1000.0) as i64)
}

/// QoS 0 : écrit sur la socket, QoS 1 : PUBACK, QoS 2 : PUBCOMP
async fn wait_for_delivery(eventloop: &mut EventLoop, qos: QoS) -> Result<()> {
    loop {
        let delivered = match (eventloop.poll().await?, qos) {
            (Event::Outgoing(Outgoing::Publish(_)), QoS::AtMostOnce) => true,
            (Event::Incoming(Incoming::PubAck(_)), QoS::AtLeastOnce) => true,
            (Event::Incoming(Incoming::PubComp(_)), QoS::ExactlyOnce) => true,
            _ => false,
        };
        if delivered {
            return Ok(());
        }
    }
}

async fn drain_until_disconnect(eventloop: &mut EventLoop) {
    while let Ok(event) = eventloop.poll().await {
        if let Event::Outgoing(Outgoing::Disconnect) = event {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_uptime() {
        assert_eq!(parse_uptime_ms("12345.67 54321.00\n"), Some(12_345_670));
        assert_eq!(parse_uptime_ms("0.00 0.00"), Some(0));
        assert_eq!(parse_uptime_ms(""), None);
        assert_eq!(parse_uptime_ms("uptime? 1.0"), None);
        assert_eq!(parse_uptime_ms("-3.0 1.0"), None);
    }

    #[test]
    fn test_device_millis_covers_process_lifetime() {
        // démarré il y a 50 ms : l'uptime machine ou process est au moins ça
        let started = Instant::now() - Duration::from_millis(50);
        assert!(device_millis(started) >= 50);
    }
}
