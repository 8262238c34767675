// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Paced outbound queue
//!
//! Producers enqueue without ever blocking. A single release loop hands
//! messages to the transport in FIFO order, waiting at least `min_interval`
//! after one hand-off completes before starting the next.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn, error, debug};

use super::{BroadcastMessage, Transport};
use crate::core::{EventBus, EventPayload};

/// What to discard when a message arrives at a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending message, keep the new one
    #[default]
    DropOldest,
    /// Keep the queue as is, discard the new message
    DropNewest,
}

/// Result of [`PacedQueue::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after evicting the message with this sequence number
    DroppedOldest(u64),
    /// Not queued; the queue was full
    DroppedNewest(u64),
}

/// Observable queue state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Pending,
    Releasing,
}

struct Inner {
    pending: VecDeque<BroadcastMessage>,
    releasing: bool,
    dropped: u64,
    released: u64,
}

/// Bounded FIFO released at a limited rate
pub struct PacedQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    policy: OverflowPolicy,
    min_interval: Duration,
    notify: Notify,
    event_bus: Option<Arc<EventBus>>,
}

impl PacedQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy, min_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                pending: VecDeque::with_capacity(capacity),
                releasing: false,
                dropped: 0,
                released: 0,
            }),
            capacity,
            policy,
            min_interval,
            notify: Notify::new(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Add a message; never blocks. A full queue applies the overflow policy.
    pub fn enqueue(&self, message: BroadcastMessage) -> EnqueueOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.pending.len() < self.capacity {
                inner.pending.push_back(message);
                EnqueueOutcome::Queued
            } else {
                inner.dropped += 1;
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        let evicted = inner.pending.pop_front().map(|m| m.sequence).unwrap_or_default();
                        inner.pending.push_back(message);
                        EnqueueOutcome::DroppedOldest(evicted)
                    }
                    OverflowPolicy::DropNewest => EnqueueOutcome::DroppedNewest(message.sequence),
                }
            }
        };

        match outcome {
            EnqueueOutcome::Queued => {
                self.notify.notify_one();
            }
            EnqueueOutcome::DroppedOldest(seq) | EnqueueOutcome::DroppedNewest(seq) => {
                warn!(
                    "Outbound queue full ({} messages), dropped message #{} ({:?}). The link is not keeping up.",
                    self.capacity, seq, self.policy
                );
                if let Some(bus) = &self.event_bus {
                    bus.publish(EventPayload::QueueOverflow {
                        dropped_sequence: seq,
                        policy: self.policy,
                    });
                }
                self.notify.notify_one();
            }
        }
        outcome
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Sequence numbers waiting to be sent, oldest first
    pub fn pending_sequences(&self) -> Vec<u64> {
        self.inner.lock().pending.iter().map(|m| m.sequence).collect()
    }

    pub fn state(&self) -> QueueState {
        let inner = self.inner.lock();
        if inner.releasing {
            QueueState::Releasing
        } else if inner.pending.is_empty() {
            QueueState::Idle
        } else {
            QueueState::Pending
        }
    }

    /// Messages discarded by the overflow policy so far
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Messages handed to the transport so far
    pub fn released(&self) -> u64 {
        self.inner.lock().released
    }

    fn begin_release(&self) -> Option<BroadcastMessage> {
        let mut inner = self.inner.lock();
        let message = inner.pending.pop_front()?;
        inner.releasing = true;
        Some(message)
    }

    fn end_release(&self) {
        let mut inner = self.inner.lock();
        inner.releasing = false;
        inner.released += 1;
    }

    /// Release loop. Runs until `shutdown` fires; a hand-off already in
    /// progress is always allowed to finish.
    pub async fn run(&self, transport: Arc<dyn Transport>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Outbound queue started (capacity {}, min interval {:?}, transport {})",
            self.capacity,
            self.min_interval,
            transport.name()
        );
        let mut last_release: Option<Instant> = None;

        loop {
            if self.is_empty() {
                tokio::select! {
                    _ = self.notify.notified() => continue,
                    _ = shutdown.recv() => break,
                }
            }

            if let Some(last) = last_release {
                tokio::select! {
                    _ = sleep_until(last + self.min_interval) => {}
                    _ = shutdown.recv() => break,
                }
            }

            let Some(message) = self.begin_release() else {
                continue;
            };

            let sequence = message.sequence;
            match transport.send(&message).await {
                Ok(()) => {
                    info!("Sent sensor payload #{} ({} readings)", sequence, message.data.len());
                    if let Some(bus) = &self.event_bus {
                        bus.publish(EventPayload::MessageSent { sequence });
                    }
                }
                Err(e) => {
                    error!("Error sending payload #{} via {}: {:#}", sequence, transport.name(), e);
                    if let Some(bus) = &self.event_bus {
                        bus.publish(EventPayload::SendFailed {
                            sequence,
                            error: e.to_string(),
                        });
                    }
                }
            }
            last_release = Some(Instant::now());
            self.end_release();
            debug!("{} messages still queued", self.len());
        }

        info!("Outbound queue stopped with {} messages unsent", self.len());
    }
}
