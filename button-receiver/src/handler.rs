//! Per-message callback: topic guard, decode, report, dispatch.
//!
//! `MessageRouter::on_message` is the handler the transport drives for every
//! delivered message. It never fails and never touches the connection state:
//! a bad payload costs one event, nothing more.

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::event::{ButtonEvent, DecodeError};
use chrono::Local;
use tracing::{debug, info, warn};

/// Ce qu'il est advenu d'un message livré
#[derive(Debug)]
pub enum MessageOutcome {
    Dispatched(DispatchOutcome),
    DecodeFailed(DecodeError),
    /// Topic hors du filtre souscrit
    IgnoredTopic,
}

#[derive(Debug, Clone)]
pub struct MessageRouter {
    topic_filter: String,
    dispatcher: Dispatcher,
}

impl MessageRouter {
    pub fn new<S: Into<String>>(topic_filter: S, dispatcher: Dispatcher) -> Self {
        Self { topic_filter: topic_filter.into(), dispatcher }
    }

    pub fn topic_filter(&self) -> &str {
        &self.topic_filter
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Décodage puis dispatch synchrone, avant de rendre la main au transport
    pub fn on_message(&self, topic: &str, payload: &[u8]) -> MessageOutcome {
        if !rumqttc::matches(topic, &self.topic_filter) {
            debug!(topic, filter = %self.topic_filter, "ignoring message outside subscription");
            return MessageOutcome::IgnoredTopic;
        }

        info!(topic, raw = %String::from_utf8_lossy(payload), "=== NEW MESSAGE RECEIVED ===");

        let event = match ButtonEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(topic, "❌ Error parsing JSON: {e}");
                return MessageOutcome::DecodeFailed(e);
            }
        };

        info!(
            device = %event.device,
            action = %event.action,
            device_timestamp_ms = event.timestamp,
            status = %event.status,
            received_at = %Local::now().format("%Y-%m-%d %H:%M:%S"),
            "button event decoded"
        );

        MessageOutcome::Dispatched(self.dispatcher.dispatch(&event))
    }
}
