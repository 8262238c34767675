// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Sampling and broadcast scheduler
//!
//! Two independent paths share the log: the tick path (read, log, enqueue)
//! and the inbound path (decode, log). Neither ever waits on the transport.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn, error, debug};

use super::{EventBus, EventPayload};
use crate::config::{Config, ConfigError, Settings};
use crate::sensors::{ReaderTable, SensorDefinition, SensorRegistry};
use crate::store::{LogRecord, ResilientLog};
use crate::streaming::{BroadcastMessage, EnqueueOutcome, InboundMessage, PacedQueue};

/// Summary of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub sequence: u64,
    pub readings_ok: usize,
    pub readings_failed: usize,
    /// Whether the local record reached the log
    pub logged: bool,
    pub enqueued: EnqueueOutcome,
}

struct ConfigWatch {
    path: PathBuf,
    table: ReaderTable,
    modified: Mutex<Option<SystemTime>>,
}

pub struct Scheduler {
    registry: RwLock<Arc<SensorRegistry>>,
    log: Arc<ResilientLog>,
    queue: Arc<PacedQueue>,
    event_bus: Arc<EventBus>,
    node_num: u32,
    node_name: String,
    node_id: String,
    period: Duration,
    sequence: AtomicU64,
    watch: Option<ConfigWatch>,
}

impl Scheduler {
    pub fn new(
        settings: &Settings,
        registry: SensorRegistry,
        log: Arc<ResilientLog>,
        queue: Arc<PacedQueue>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry: RwLock::new(Arc::new(registry)),
            log,
            queue,
            event_bus,
            node_num: settings.node_num,
            node_name: settings.node_name.clone(),
            node_id: settings.node_id(),
            period: Duration::from_secs(settings.broadcast_interval),
            sequence: AtomicU64::new(0),
            watch: None,
        }
    }

    /// Rebuild the registry whenever the file at `path` changes. Only the
    /// sensor list is picked up; other settings need a restart.
    pub fn with_config_watch(mut self, path: &Path, table: ReaderTable) -> Self {
        let modified = modified_time(path);
        self.watch = Some(ConfigWatch {
            path: path.to_path_buf(),
            table,
            modified: Mutex::new(modified),
        });
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Ticks started so far
    pub fn ticks(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// The active registry
    pub async fn registry(&self) -> Arc<SensorRegistry> {
        Arc::clone(&*self.registry.read().await)
    }

    /// One sampling pass: read, log locally, enqueue for broadcast
    pub async fn tick(&self) -> TickReport {
        self.check_config().await;

        let registry = self.registry().await;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let readings = registry.read_all().await;

        let mut readings_failed = 0;
        for reading in &readings {
            if let Some(e) = reading.error() {
                readings_failed += 1;
                self.event_bus.publish(EventPayload::ReaderFailed {
                    sensor: reading.name.clone(),
                    reason: e.to_string(),
                    unavailable: e.is_unavailable(),
                });
            }
        }
        let readings_ok = readings.len() - readings_failed;

        let message = BroadcastMessage::from_readings(sequence, self.node_num, &self.node_name, &readings);
        let logged = match message.to_payload() {
            Ok(payload) => self.append(LogRecord::local(&self.node_id, payload)).await,
            Err(e) => {
                error!("Could not encode tick #{} for the log: {:#}", sequence, e);
                false
            }
        };

        if message.data.is_empty() {
            debug!("Tick #{} produced no successful readings", sequence);
        }
        let enqueued = self.queue.enqueue(message);

        info!(
            "Tick #{}: {} readings, {} failed, {} queued",
            sequence,
            readings_ok,
            readings_failed,
            self.queue.len()
        );
        self.event_bus.publish(EventPayload::TickCompleted {
            sequence,
            readings_ok,
            readings_failed,
        });

        TickReport {
            sequence,
            readings_ok,
            readings_failed,
            logged,
            enqueued,
        }
    }

    /// Log a message received from another node. Returns whether it was stored.
    pub async fn handle_inbound(&self, message: InboundMessage) -> bool {
        let payload = match serde_json::from_slice::<Value>(&message.payload) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!(
                    "Ignoring message from {}: expected a JSON object, got {}",
                    message.from,
                    json_kind(&other)
                );
                return false;
            }
            Err(e) => {
                warn!("Ignoring malformed message from {}: {}", message.from, e);
                return false;
            }
        };

        let record = LogRecord::remote(&message.from, payload, message.rssi, message.snr);
        if !self.append(record).await {
            return false;
        }

        info!(
            "Logged data from {} (rssi {:?}, snr {:?})",
            message.from, message.rssi, message.snr
        );
        self.event_bus.publish(EventPayload::RemoteLogged { origin: message.from });
        true
    }

    /// Swap in a registry built from `definitions`. On error the current
    /// registry stays active.
    pub async fn reload(&self, definitions: &[SensorDefinition], table: &ReaderTable) -> Result<usize, ConfigError> {
        let registry = SensorRegistry::build(definitions, table)?;
        let count = registry.len();
        *self.registry.write().await = Arc::new(registry);
        Ok(count)
    }

    /// Tick loop. The first tick fires immediately.
    pub async fn run_ticks(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Scheduler started, sampling every {:?}", self.period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Scheduler shutting down after {} ticks", self.ticks());
                    break;
                }
            }
        }
    }

    /// Inbound loop. Ends on shutdown or when every sender is gone.
    pub async fn run_inbound(&self, mut inbound: mpsc::Receiver<InboundMessage>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => {
                        self.handle_inbound(message).await;
                    }
                    None => {
                        debug!("Inbound channel closed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    debug!("Inbound handler shutting down");
                    break;
                }
            }
        }
    }

    async fn append(&self, record: LogRecord) -> bool {
        let log = Arc::clone(&self.log);
        let origin = record.origin.clone();

        let result = tokio::task::spawn_blocking(move || log.append(record))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);

        match result {
            Ok(total) => {
                debug!("Record from {} logged ({} total)", origin, total);
                true
            }
            Err(e) => {
                error!("Error saving sensor data from {}: {:#}", origin, e);
                self.event_bus.publish(EventPayload::LogWriteFailed {
                    origin,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    async fn check_config(&self) {
        let Some(watch) = &self.watch else {
            return;
        };

        let path = watch.path.clone();
        let current = tokio::task::spawn_blocking(move || modified_time(&path))
            .await
            .ok()
            .flatten();
        {
            let mut last = watch.modified.lock();
            if current.is_none() || *last == current {
                return;
            }
            *last = current;
        }

        info!("Configuration {:?} changed, rebuilding sensor registry", watch.path);
        let path = watch.path.clone();
        let loaded = tokio::task::spawn_blocking(move || Config::load(&path))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);
        let outcome = match loaded {
            Ok(config) => self
                .reload(&config.sensors, &watch.table)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(sensors) => {
                info!("Sensor registry reloaded with {} sensors", sensors);
                self.event_bus.publish(EventPayload::ConfigReloaded { sensors });
            }
            Err(e) => {
                error!("Rejected configuration change, keeping previous sensors: {:#}", e);
                self.event_bus.publish(EventPayload::ConfigRejected { error: format!("{:#}", e) });
            }
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordSource;
    use crate::streaming::OverflowPolicy;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn def(name: &str, sensor_type: &str, params: Value) -> SensorDefinition {
        SensorDefinition {
            name: name.to_string(),
            sensor_type: sensor_type.to_string(),
            enabled: true,
            params: match params {
                Value::Object(m) => m,
                _ => serde_json::Map::new(),
            },
        }
    }

    struct Fixture {
        _dir: TempDir,
        scheduler: Scheduler,
        log: Arc<ResilientLog>,
        queue: Arc<PacedQueue>,
        bus: Arc<EventBus>,
    }

    fn fixture(sensors: Vec<SensorDefinition>) -> Fixture {
        let dir = tempdir().unwrap();
        let settings = Settings {
            broadcast_interval: 5,
            node_num: 0x2a,
            node_name: "test-node".to_string(),
            ..Settings::default()
        };
        let bus = Arc::new(EventBus::new(64));
        let log = Arc::new(ResilientLog::open(dir.path().join("log.json"), false));
        let queue = Arc::new(PacedQueue::new(8, OverflowPolicy::DropOldest, Duration::from_secs(5)));
        let registry = SensorRegistry::build(&sensors, &ReaderTable::builtin()).unwrap();
        let scheduler = Scheduler::new(&settings, registry, Arc::clone(&log), Arc::clone(&queue), Arc::clone(&bus));

        Fixture { _dir: dir, scheduler, log, queue, bus }
    }

    #[tokio::test]
    async fn test_tick_logs_and_enqueues() {
        let f = fixture(vec![def("label", "static_value", json!({"value": "X"}))]);

        let report = f.scheduler.tick().await;
        assert_eq!(report.sequence, 1);
        assert_eq!(report.readings_ok, 1);
        assert!(report.logged);
        assert_eq!(report.enqueued, EnqueueOutcome::Queued);

        assert_eq!(f.queue.pending_sequences(), vec![1]);

        let records = f.log.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, RecordSource::Local);
        assert_eq!(records[0].origin, "!0000002a");
        assert_eq!(records[0].payload["data"], json!({"label": "X"}));
        assert_eq!(records[0].payload["source_node_name"], json!("test-node"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_script_leaves_other_readings() {
        let f = fixture(vec![
            def("broken", "custom_script", json!({"script_path": "sh", "args": ["-c", "exit 3"]})),
            def("label", "static_value", json!({"value": "X"})),
        ]);
        let mut rx = f.bus.subscribe();

        let report = f.scheduler.tick().await;
        assert_eq!(report.readings_ok, 1);
        assert_eq!(report.readings_failed, 1);

        let records = f.log.load_all().unwrap();
        assert_eq!(records[0].payload["data"], json!({"label": "X"}));

        let event = rx.recv().await.unwrap();
        match event.payload {
            EventPayload::ReaderFailed { sensor, unavailable, .. } => {
                assert_eq!(sensor, "broken");
                assert!(!unavailable);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inbound_logged_as_remote() {
        let f = fixture(vec![]);
        let mut message = InboundMessage::new("!deadbeef", br#"{"data": {"temp": 19.5}}"#.to_vec());
        message.rssi = Some(-97);
        message.snr = Some(6.25);

        assert!(f.scheduler.handle_inbound(message).await);

        let records = f.log.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, RecordSource::Remote);
        assert_eq!(records[0].origin, "!deadbeef");
        assert_eq!(records[0].rssi, Some(-97));
        assert_eq!(records[0].payload["data"]["temp"], json!(19.5));
    }

    #[tokio::test]
    async fn test_malformed_inbound_skipped() {
        let f = fixture(vec![]);

        assert!(!f.scheduler.handle_inbound(InboundMessage::new("!1", b"not json".to_vec())).await);
        assert!(!f.scheduler.handle_inbound(InboundMessage::new("!1", b"[1, 2]".to_vec())).await);
        assert!(f.log.load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_registry() {
        let f = fixture(vec![def("label", "static_value", json!({"value": "X"}))]);
        let table = ReaderTable::builtin();

        let bad = vec![def("x", "warp_drive", json!({}))];
        assert!(f.scheduler.reload(&bad, &table).await.is_err());
        assert_eq!(f.scheduler.registry().await.len(), 1);

        let good = vec![
            def("a", "static_value", json!({"value": 1})),
            def("b", "random_value", json!({})),
        ];
        assert_eq!(f.scheduler.reload(&good, &table).await.unwrap(), 2);
        assert_eq!(f.scheduler.tick().await.readings_ok, 2);
    }

    #[tokio::test]
    async fn test_config_change_picked_up_on_tick() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sensors.json");
        let mut config = Config::default();
        config.sensors = vec![def("label", "static_value", json!({"value": "X"}))];
        config.save(&path).unwrap();

        let f = fixture(config.sensors.clone());
        let scheduler = Scheduler::new(
            &config.settings,
            SensorRegistry::build(&config.sensors, &ReaderTable::builtin()).unwrap(),
            Arc::clone(&f.log),
            Arc::clone(&f.queue),
            Arc::clone(&f.bus),
        )
        .with_config_watch(&path, ReaderTable::builtin());
        assert_eq!(scheduler.tick().await.readings_ok, 1);

        // Make sure the new mtime differs on coarse-grained filesystems.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        config.sensors.push(def("label2", "static_value", json!({"value": "Y"})));
        config.save(&path).unwrap();

        let mut rx = f.bus.subscribe();
        assert_eq!(scheduler.tick().await.readings_ok, 2);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload, EventPayload::ConfigReloaded { sensors: 2 });
    }
}
