//! Core module - engine, scheduler and event bus

mod engine;
mod scheduler;
mod event_bus;

pub use engine::{Engine, EngineTasks};
pub use scheduler::{Scheduler, TickReport};
pub use event_bus::{EventBus, Event, EventPayload};

use serde::{Deserialize, Serialize};

/// System-wide state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemState {
    pub running: bool,
    pub sensors_enabled: usize,
    pub ticks: u64,
    pub queued: usize,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub uptime_seconds: u64,
}
