// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Main engine - wires registry, log, queue and scheduler together

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use anyhow::Result;
use tracing::{info, error};

use crate::config::Config;
use crate::sensors::{ReaderTable, SensorRegistry};
use crate::store::ResilientLog;
use crate::streaming::{InboundMessage, PacedQueue, Transport};
use super::{EventBus, Scheduler, SystemState};

/// Tasks spawned by [`Engine::start`]
pub struct EngineTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

/// Main MeshSense engine
pub struct Engine {
    pub config: Arc<Config>,
    event_bus: Arc<EventBus>,
    log: Arc<ResilientLog>,
    queue: Arc<PacedQueue>,
    scheduler: Arc<Scheduler>,
    state: Arc<RwLock<SystemState>>,
    start_time: Option<Instant>,
}

impl Engine {
    /// Build every component. `config_path` enables live reloading of the
    /// sensor list when `settings.watch_config` is set.
    pub fn new(config: Config, table: ReaderTable, config_path: Option<PathBuf>) -> Result<Self> {
        config.validate()?;
        let settings = &config.settings;

        let event_bus = Arc::new(EventBus::default());
        let registry = SensorRegistry::build(&config.sensors, &table)?;

        let log = Arc::new(
            ResilientLog::open(&settings.log_file, settings.archive_corrupt_log)
                .with_event_bus(Arc::clone(&event_bus)),
        );

        let min_interval = settings.min_send_duration()?;
        let queue = Arc::new(
            PacedQueue::new(settings.queue_capacity, settings.overflow_policy, min_interval)
                .with_event_bus(Arc::clone(&event_bus)),
        );

        let mut scheduler = Scheduler::new(
            settings,
            registry,
            Arc::clone(&log),
            Arc::clone(&queue),
            Arc::clone(&event_bus),
        );
        if let (true, Some(path)) = (settings.watch_config, config_path) {
            info!("Watching {:?} for sensor changes", path);
            scheduler = scheduler.with_config_watch(&path, table);
        }

        Ok(Self {
            config: Arc::new(config),
            event_bus,
            log,
            queue,
            scheduler: Arc::new(scheduler),
            state: Arc::new(RwLock::new(SystemState::default())),
            start_time: None,
        })
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn log(&self) -> Arc<ResilientLog> {
        Arc::clone(&self.log)
    }

    pub fn queue(&self) -> Arc<PacedQueue> {
        Arc::clone(&self.queue)
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Spawn the tick loop, the inbound handler and the queue release loop.
    /// Every task is subscribed to `shutdown` before this returns, so a
    /// signal sent afterwards is never missed.
    pub async fn start(
        &mut self,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<InboundMessage>,
        shutdown: &broadcast::Sender<()>,
    ) -> EngineTasks {
        let queue_rx = shutdown.subscribe();
        let tick_rx = shutdown.subscribe();
        let inbound_rx = shutdown.subscribe();

        info!(
            "Starting MeshSense engine as {} ({}) over {}",
            self.scheduler.node_id(),
            self.config.settings.node_name,
            transport.name()
        );
        self.start_time = Some(Instant::now());
        self.state.write().await.running = true;

        let queue_task = {
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move { queue.run(transport, queue_rx).await })
        };

        let tick_task = {
            let scheduler = Arc::clone(&self.scheduler);
            tokio::spawn(async move { scheduler.run_ticks(tick_rx).await })
        };

        let inbound_task = {
            let scheduler = Arc::clone(&self.scheduler);
            tokio::spawn(async move { scheduler.run_inbound(inbound, inbound_rx).await })
        };

        info!("MeshSense engine started");
        EngineTasks {
            handles: vec![("queue", queue_task), ("scheduler", tick_task), ("inbound", inbound_task)],
        }
    }

    /// Wait for the tasks of [`Engine::start`] to stop. In-progress ticks,
    /// appends and sends finish first.
    pub async fn join(&mut self, tasks: EngineTasks) -> Result<()> {
        for (name, handle) in tasks.handles {
            if let Err(e) = handle.await {
                error!("{} task ended abnormally: {}", name, e);
            }
        }

        self.state.write().await.running = false;
        info!("MeshSense engine stopped");
        Ok(())
    }

    /// [`Engine::start`] then [`Engine::join`]
    pub async fn run(
        &mut self,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<InboundMessage>,
        shutdown: broadcast::Sender<()>,
    ) -> Result<()> {
        let tasks = self.start(transport, inbound, &shutdown).await;
        self.join(tasks).await
    }

    /// Snapshot of the running system
    pub async fn state(&self) -> SystemState {
        let mut state = self.state.read().await.clone();
        state.sensors_enabled = self.scheduler.registry().await.enabled_count();
        state.ticks = self.scheduler.ticks();
        state.queued = self.queue.len();
        state.messages_sent = self.queue.released();
        state.messages_dropped = self.queue.dropped();
        state.uptime_seconds = self.uptime();
        state
    }

    pub fn uptime(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorDefinition;
    use crate::streaming::DryRunTransport;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.settings.log_file = dir.join("log.json");
        config.settings.min_send_interval = 0.01;
        config.sensors = vec![SensorDefinition {
            name: "label".to_string(),
            sensor_type: "static_value".to_string(),
            enabled: true,
            params: json!({"value": "X"}).as_object().cloned().unwrap(),
        }];
        config
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.sensors[0].sensor_type = "nope".to_string();
        assert!(Engine::new(cfg, ReaderTable::builtin(), None).is_err());

        let mut cfg = config(dir.path());
        cfg.settings.broadcast_interval = 1;
        assert!(Engine::new(cfg, ReaderTable::builtin(), None).is_err());

        let mut cfg = config(dir.path());
        cfg.settings.min_send_interval = -3.0;
        assert!(Engine::new(cfg, ReaderTable::builtin(), None).is_err());
    }

    #[test]
    fn test_queue_paced_by_configured_interval() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.settings.min_send_interval = 2.5;
        let engine = Engine::new(cfg, ReaderTable::builtin(), None).unwrap();
        assert_eq!(engine.queue().min_interval(), Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_shutdown_right_after_start_is_seen() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::new(config(dir.path()), ReaderTable::builtin(), None).unwrap();
        let (_inbound_tx, inbound_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);

        let tasks = engine
            .start(Arc::new(DryRunTransport::new()), inbound_rx, &shutdown_tx)
            .await;
        // Receivers exist before start returns, so the send has someone to reach.
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), engine.join(tasks))
            .await
            .unwrap()
            .unwrap();
        assert!(!engine.state().await.running);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::new(config(dir.path()), ReaderTable::builtin(), None).unwrap();
        let transport = Arc::new(DryRunTransport::new());
        let (_inbound_tx, inbound_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);

        let stopper = {
            let shutdown_tx = shutdown_tx.clone();
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                let deadline = Instant::now() + Duration::from_secs(5);
                while transport.sent().is_empty() && Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                let _ = shutdown_tx.send(());
            })
        };

        engine.run(transport.clone(), inbound_rx, shutdown_tx).await.unwrap();
        stopper.await.unwrap();

        let state = engine.state().await;
        assert!(!state.running);
        assert_eq!(state.ticks, 1);
        assert_eq!(state.messages_sent, 1);
        assert_eq!(transport.sent().len(), 1);
    }
}
