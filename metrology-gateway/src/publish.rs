//! MQTT publishing.

use crate::config::MqttConfig;
use crate::error::{BoxError, PublishError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Capacity of the request channel between client and event loop.
const REQUEST_CAPACITY: usize = 10;

/// Pause before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Sink for state and discovery messages.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), PublishError>;
}

/// Publisher backed by an MQTT broker connection.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Creates the client and the event loop driving its connection.
    ///
    /// Nothing is sent until [`MqttEventLoop::run`] is polling.
    pub fn new(config: &MqttConfig) -> (Self, MqttEventLoop) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive());
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        (
            Self {
                client: client.clone(),
            },
            MqttEventLoop { client, eventloop },
        )
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), PublishError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await?;
        Ok(())
    }
}

/// Drives the broker connection.
pub struct MqttEventLoop {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttEventLoop {
    /// Polls the connection until `cancel` fires, reconnecting on errors.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BoxError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        tracing::info!("Connected to MQTT broker ({:?})", ack.code);
                    }
                    Ok(event) => tracing::trace!(?event, "mqtt event"),
                    Err(e) => {
                        tracing::warn!("MQTT connection error: {}", e);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                },
            }
        }

        tracing::debug!("Disconnecting from MQTT broker");
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!("MQTT disconnect failed: {}", e);
        }
        Ok(())
    }
}
