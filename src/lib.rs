// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! MeshSense - sensor sampling and broadcast daemon for mesh radio nodes
//!
//! Reads a configured set of sensors on a fixed period, keeps every reading
//! (local or received from other nodes) in a crash-safe JSON log, and
//! broadcasts the aggregate over a rate-limited link.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       MeshSense Engine                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌───────────┐   ┌────────────┐  ┌─────────┐  │
//! │  │ Sensor   │ → │ Scheduler │ → │ PacedQueue │→ │Transport│  │
//! │  │ Registry │   │  (tick)   │   │            │  │         │  │
//! │  └──────────┘   └───────────┘   └────────────┘  └─────────┘  │
//! │                   ↓       ↑ inbound                  │       │
//! │             ┌─────────────┴──┐                       │       │
//! │             │  ResilientLog  │ ←─────────────────────┘       │
//! │             └────────────────┘                               │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                       Event Bus                        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod core;
pub mod sensors;
pub mod streaming;
pub mod config;
pub mod store;

// Re-exports for convenience
pub use config::{Config, ConfigError};
pub use core::{Engine, EventBus, Scheduler};
pub use sensors::{ReaderTable, Reading, SensorDefinition, SensorRegistry};
pub use store::{LogRecord, ResilientLog};
pub use streaming::{BroadcastMessage, DryRunTransport, InboundMessage, PacedQueue, Transport};

/// MeshSense version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// MeshSense name
pub const NAME: &str = "MeshSense";

/// Build info
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION.to_string(),
        target: std::env::consts::ARCH.to_string(),
        os: std::env::consts::OS.to_string(),
    }
}

/// Build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Version string
    pub version: String,
    /// Target architecture
    pub target: String,
    /// Operating system
    pub os: String,
}
