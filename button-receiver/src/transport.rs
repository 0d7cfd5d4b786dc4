//! Broker transport seam.
//!
//! `Transport` is what the lifecycle manager consumes: connect, subscribe,
//! per-message delivery and disconnect. `MqttTransport` is the rumqttc
//! implementation; the devkit crate provides an in-memory one for tests.

use crate::config::ReceiverConfig;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Outgoing, Publish,
    QoS, SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Message brut livré par le broker, opaque tant qu'il n'est pas décodé
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new<S: Into<String>, V: Into<Vec<u8>>>(topic: S, payload: V) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }
}

impl From<Publish> for InboundMessage {
    fn from(publish: Publish) -> Self {
        Self { topic: publish.topic, payload: publish.payload.to_vec() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("broker rejected subscription to {0}")]
    SubscriptionRejected(String),
    #[error("no answer from broker within {0:?}")]
    Timeout(Duration),
    #[error("connection closed by broker")]
    Closed,
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Transport: Send {
    /// Opens the session. Called once; failures are not retried.
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Waits for the next delivered message. An error means the connection
    /// is gone.
    async fn next_message(&mut self) -> Result<InboundMessage, TransportError>;

    /// Requests a graceful disconnect. Callers bound it with a timeout.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Transport rumqttc : un AsyncClient + son EventLoop, pilotés par le subscriber
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    response_timeout: Duration,
    // publications arrivées avant le SUBACK
    pending: VecDeque<InboundMessage>,
}

impl MqttTransport {
    pub fn new(config: &ReceiverConfig) -> Self {
        let mut opts = MqttOptions::new(
            &config.broker.client_id,
            &config.broker.host,
            config.broker.port,
        );
        opts.set_keep_alive(config.keep_alive());
        opts.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(opts, config.channel_capacity);
        Self {
            client,
            eventloop,
            response_timeout: config.connect_timeout(),
            pending: VecDeque::new(),
        }
    }

    async fn await_connack(&mut self) -> Result<(), TransportError> {
        loop {
            match self.eventloop.poll().await? {
                Event::Incoming(Incoming::ConnAck(ack)) => {
                    return match ack.code {
                        ConnectReturnCode::Success => Ok(()),
                        code => Err(TransportError::Refused(format!("{code:?}"))),
                    };
                }
                Event::Incoming(Incoming::Publish(p)) => self.pending.push_back(p.into()),
                other => debug!("[mqtt] waiting for CONNACK, got {other:?}"),
            }
        }
    }

    async fn await_suback(&mut self, topic: &str) -> Result<(), TransportError> {
        loop {
            match self.eventloop.poll().await? {
                Event::Incoming(Incoming::SubAck(ack)) => {
                    let rejected = ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    return if rejected {
                        Err(TransportError::SubscriptionRejected(topic.to_string()))
                    } else {
                        Ok(())
                    };
                }
                Event::Incoming(Incoming::Publish(p)) => self.pending.push_back(p.into()),
                other => debug!("[mqtt] waiting for SUBACK, got {other:?}"),
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        // rumqttc n'ouvre la socket qu'au premier poll
        let limit = self.response_timeout;
        timeout(limit, self.await_connack())
            .await
            .map_err(|_| TransportError::Timeout(limit))?
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client.subscribe(topic, qos).await?;
        let limit = self.response_timeout;
        timeout(limit, self.await_suback(topic))
            .await
            .map_err(|_| TransportError::Timeout(limit))?
    }

    async fn next_message(&mut self) -> Result<InboundMessage, TransportError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(message);
        }
        loop {
            match self.eventloop.poll().await? {
                Event::Incoming(Incoming::Publish(p)) => return Ok(p.into()),
                Event::Incoming(Incoming::Disconnect) => return Err(TransportError::Closed),
                _ => {}
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client.disconnect().await?;
        // le DISCONNECT n'est écrit sur la socket que via poll
        loop {
            if let Event::Outgoing(Outgoing::Disconnect) = self.eventloop.poll().await? {
                return Ok(());
            }
        }
    }
}
