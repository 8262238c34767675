//! Streaming module - outbound messages, pacing and transports

mod queue;
mod mqtt;

pub use queue::{EnqueueOutcome, OverflowPolicy, PacedQueue, QueueState};
pub use mqtt::MqttTransport;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::sensors::Reading;

/// Aggregated readings of one tick, queued for transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub sequence: u64,
    pub source_node_num: u32,
    pub source_node_name: String,
    pub timestamp: DateTime<Utc>,
    /// Successful readings keyed by sensor name
    pub data: Map<String, Value>,
}

impl BroadcastMessage {
    /// Fold the successful readings of a tick; failed ones are left out
    pub fn from_readings(sequence: u64, node_num: u32, node_name: &str, readings: &[Reading]) -> Self {
        let data = readings
            .iter()
            .filter_map(|r| r.value().map(|v| (r.name.clone(), v.clone())))
            .collect();

        Self {
            sequence,
            source_node_num: node_num,
            source_node_name: node_name.to_string(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// JSON object form, as stored in local log records
    pub fn to_payload(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(anyhow!("broadcast message serialized to {}", other)),
        }
    }

    /// Wire bytes handed to byte-oriented transports
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A message received from another node
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Sender identity as reported by the transport
    pub from: String,
    pub payload: Vec<u8>,
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
}

impl InboundMessage {
    pub fn new(from: &str, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            from: from.to_string(),
            payload: payload.into(),
            rssi: None,
            snr: None,
        }
    }
}

/// The link below the queue
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Hand one message to the link. Delivery is best effort.
    async fn send(&self, message: &BroadcastMessage) -> Result<()>;
}

/// Keeps outgoing messages in memory and logs them instead of transmitting
#[derive(Default)]
pub struct DryRunTransport {
    sent: Mutex<Vec<BroadcastMessage>>,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far
    pub fn sent(&self) -> Vec<BroadcastMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn send(&self, message: &BroadcastMessage) -> Result<()> {
        let data = Value::Object(message.data.clone());
        info!("[dry-run] would broadcast #{}: {}", message.sequence, data);
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::ReadError;
    use serde_json::json;

    #[test]
    fn test_failed_readings_left_out() {
        let readings = vec![
            Reading::new("label", Ok(json!("X"))),
            Reading::new("broken", Err(ReadError::Failed("nope".into()))),
            Reading::new("temp", Ok(json!(21.5))),
        ];
        let msg = BroadcastMessage::from_readings(3, 42, "node", &readings);

        assert_eq!(msg.sequence, 3);
        assert_eq!(Value::Object(msg.data.clone()), json!({"label": "X", "temp": 21.5}));

        let payload = msg.to_payload().unwrap();
        assert_eq!(payload["source_node_num"], json!(42));
        assert_eq!(payload["data"]["label"], json!("X"));
    }

    #[tokio::test]
    async fn test_dry_run_records_sent_messages() {
        let transport = DryRunTransport::new();
        let msg = BroadcastMessage::from_readings(4, 7, "n", &[Reading::new("label", Ok(json!("X")))]);

        transport.send(&msg).await.unwrap();
        assert_eq!(transport.sent(), vec![msg]);
        assert_eq!(transport.name(), "dry-run");
    }

    #[test]
    fn test_wire_bytes_round_trip() {
        let msg = BroadcastMessage::from_readings(1, 7, "n", &[Reading::new("a", Ok(json!(1)))]);
        let back: BroadcastMessage = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(back, msg);
    }
}
