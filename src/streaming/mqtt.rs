// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! MQTT transport
//!
//! Each node publishes on `<prefix>/<node id>` and listens on `<prefix>/+`.
//! Messages on our own topic are echoes and are not forwarded.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn, debug};

use super::{BroadcastMessage, InboundMessage, Transport};
use crate::config::TransportConfig;

/// MQTT-backed link
pub struct MqttTransport {
    client: AsyncClient,
    topic: String,
}

impl MqttTransport {
    /// Start the client. Received messages from other nodes go to `inbound`;
    /// the event loop, and with it the connection, ends on `shutdown` or when
    /// `inbound` is closed.
    pub fn connect(
        config: &TransportConfig,
        node_id: &str,
        inbound: mpsc::Sender<InboundMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let client_id = format!("meshsense-{}", node_id.trim_start_matches('!'));
        let mut options = MqttOptions::new(client_id, &config.mqtt_broker, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        let prefix = config.topic_prefix.trim_end_matches('/').to_string();
        let topic = format!("{}/{}", prefix, node_id);
        let filter = format!("{}/+", prefix);

        let own_topic = topic.clone();
        let subscriber = client.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = eventloop.poll() => event,
                    _ = shutdown.recv() => break,
                };

                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected, subscribing to {}", filter);
                        if let Err(e) = subscriber.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                            warn!("MQTT subscribe failed: {}", e);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        if msg.topic == own_topic {
                            continue;
                        }
                        let from = msg.topic.rsplit('/').next().unwrap_or_default().to_string();
                        debug!("MQTT received {} bytes from {}", msg.payload.len(), from);
                        let message = InboundMessage::new(&from, msg.payload.to_vec());
                        if inbound.send(message).await.is_err() {
                            debug!("Inbound handler gone, stopping MQTT event loop");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT error: {:?}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
            debug!("MQTT event loop stopped");
        });

        info!("MQTT transport initialized for {}:{} on {}", config.mqtt_broker, config.mqtt_port, topic);
        Ok(Self { client, topic })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn send(&self, message: &BroadcastMessage) -> Result<()> {
        let payload = message.to_bytes()?;

        self.client
            .publish(self.topic.as_str(), QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| anyhow!("MQTT publish failed: {}", e))
    }
}
