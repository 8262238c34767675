// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Event bus for operator-visible conditions

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::streaming::OverflowPolicy;

/// Generic event wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A tick finished
    TickCompleted { sequence: u64, readings_ok: usize, readings_failed: usize },
    /// A sensor produced no value this tick
    ReaderFailed { sensor: String, reason: String, unavailable: bool },
    /// The outbound queue was full and a message was discarded
    QueueOverflow { dropped_sequence: u64, policy: OverflowPolicy },
    /// A message was handed to the transport
    MessageSent { sequence: u64 },
    /// The transport rejected a message; it is not retried
    SendFailed { sequence: u64, error: String },
    /// The log file was unreadable and has been reset
    LogRepaired { path: PathBuf, reason: String, archived_to: Option<PathBuf> },
    /// An append could not be written
    LogWriteFailed { origin: String, error: String },
    /// A record from another node was stored
    RemoteLogged { origin: String },
    /// The sensor configuration changed and the registry was rebuilt
    ConfigReloaded { sensors: usize },
    /// A changed configuration was invalid; the previous one stays active
    ConfigRejected { error: String },
}

/// Central event bus for pub/sub communication
pub struct EventBus {
    event_tx: broadcast::Sender<Event>,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);

        Self {
            event_tx,
            event_counter: AtomicU64::new(0),
        }
    }

    /// Publish to current subscribers. Having none is fine.
    pub fn publish(&self, payload: EventPayload) {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        let event = Event {
            id,
            timestamp: Utc::now(),
            payload,
        };
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Events published so far
    pub fn published(&self) -> u64 {
        self.event_counter.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
