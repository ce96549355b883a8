//! MQTT transport over `rumqttc`.
//!
//! The event loop runs in its own task and forwards every publish on an
//! inbound topic into a channel consumed by [`Gateway::run`]. Subscriptions are
//! renewed after each reconnect.
//!
//! [`Gateway::run`]: crate::gateway::Gateway::run

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::gateway::InboundMessage;
use crate::transport::Transport;

const INBOUND_CAPACITY: usize = 256;
const MAX_POLL_ERRORS: u32 = 5;

/// Publish side of an MQTT connection to the gateway broker.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    /// Connect to the broker named in `config`.
    ///
    /// Returns the transport and the inbound stream. The stream ends when the
    /// connection fails repeatedly.
    pub fn connect(config: &GatewayConfig) -> (Self, mpsc::Receiver<InboundMessage>) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(60));

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

        let topics = config.topics.inbound.clone();
        let host = config.host.clone();
        let subscriber = client.clone();

        tokio::spawn(async move {
            let mut error_count = 0;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        error_count = 0;
                        tracing::info!("Connected to MQTT broker {}", host);
                        for topic in &topics {
                            if let Err(e) = subscriber.subscribe(topic, QoS::AtMostOnce).await {
                                tracing::warn!("Failed to subscribe to {}: {}", topic, e);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = (publish.topic, publish.payload.to_vec());
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error_count += 1;
                        if error_count >= MAX_POLL_ERRORS {
                            tracing::error!(
                                "MQTT broker {} error count reached {}, stopping: {}",
                                host,
                                MAX_POLL_ERRORS,
                                e
                            );
                            break;
                        }
                        tracing::warn!(
                            "MQTT broker {} error ({}/{}): {}",
                            host,
                            error_count,
                            MAX_POLL_ERRORS,
                            e
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            tracing::info!("MQTT connection to {} closed", host);
        });

        (Self { client }, rx)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: &Value, retain: bool) -> Result<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.client
            .publish(topic, QoS::AtMostOnce, retain, bytes)
            .await
            .map_err(|e| Error::Publish(e.to_string()))
    }
}
