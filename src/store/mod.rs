// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Persistent JSON log of local and remote readings
//!
//! The file always holds one JSON array. Appends rewrite the whole array
//! through a temporary sibling and a rename, so a crash mid-write leaves
//! either the old or the new array on disk. Unparseable content is reset to
//! an empty array (optionally archiving the bad file first) instead of
//! stopping the process.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, error, debug};

use crate::core::{EventBus, EventPayload};

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Local,
    Remote,
}

/// One persisted entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub source: RecordSource,
    /// Local node id, or the sender's identity for remote records
    pub origin: String,
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
}

impl LogRecord {
    pub fn local(origin: &str, payload: Map<String, Value>) -> Self {
        Self {
            source: RecordSource::Local,
            origin: origin.to_string(),
            payload,
            timestamp: Utc::now(),
            rssi: None,
            snr: None,
        }
    }

    pub fn remote(origin: &str, payload: Map<String, Value>, rssi: Option<i32>, snr: Option<f64>) -> Self {
        Self {
            source: RecordSource::Remote,
            origin: origin.to_string(),
            payload,
            timestamp: Utc::now(),
            rssi,
            snr,
        }
    }
}

/// Append-only JSON array store with corruption recovery
pub struct ResilientLog {
    path: PathBuf,
    archive_corrupt: bool,
    lock: Mutex<()>,
    event_bus: Option<Arc<EventBus>>,
}

impl ResilientLog {
    /// The file is created on the first append
    pub fn open(path: impl Into<PathBuf>, archive_corrupt: bool) -> Self {
        let path = path.into();
        info!("Sensor log at {:?}", path);
        Self {
            path,
            archive_corrupt,
            lock: Mutex::new(()),
            event_bus: None,
        }
    }

    /// Report repairs on `bus` as well as in the log
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and return the new record count. Serialized against
    /// every other append and load on this store.
    pub fn append(&self, record: LogRecord) -> Result<usize> {
        let _guard = self.lock.lock();

        let mut records = self.load_locked()?;
        records.push(record);
        self.write_locked(&records)?;

        debug!("Sensor data saved to {:?}. Total records: {}", self.path, records.len());
        Ok(records.len())
    }

    /// Every record, oldest first. Unparseable content is repaired, not
    /// returned as an error; only I/O failures other than a missing file are.
    pub fn load_all(&self) -> Result<Vec<LogRecord>> {
        let _guard = self.lock.lock();
        self.load_locked()
    }

    fn load_locked(&self) -> Result<Vec<LogRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                // Not UTF-8: as unusable as malformed JSON.
                self.recover(&format!("unreadable content: {}", e), false)?;
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading sensor log {:?}", self.path));
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let parsed: Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                self.recover(&format!("malformed JSON: {}", e), false)?;
                return Ok(Vec::new());
            }
        };

        if !parsed.is_array() {
            self.recover("top-level value is not a JSON array", false)?;
            return Ok(Vec::new());
        }

        match serde_json::from_value::<Vec<LogRecord>>(parsed) {
            Ok(records) => Ok(records),
            Err(e) => {
                // The file is still a well-formed array, so keep a copy of it
                // whatever the archive setting.
                self.recover(&format!("array holds entries that are not log records: {}", e), true)?;
                Ok(Vec::new())
            }
        }
    }

    /// Reset the file to `[]`, archiving the bad content first if configured
    /// or `always_archive` is set
    fn recover(&self, reason: &str, always_archive: bool) -> Result<()> {
        error!("Sensor log {:?} is corrupt ({}). Resetting to an empty log.", self.path, reason);

        let archived_to = if self.archive_corrupt || always_archive {
            let archive = self.archive_path();
            match fs::rename(&self.path, &archive) {
                Ok(()) => {
                    warn!("Corrupt sensor log archived to {:?}", archive);
                    Some(archive)
                }
                Err(e) => {
                    warn!("Could not archive corrupt sensor log: {}", e);
                    None
                }
            }
        } else {
            None
        };

        self.write_locked(&[])?;

        if let Some(bus) = &self.event_bus {
            bus.publish(EventPayload::LogRepaired {
                path: self.path.clone(),
                reason: reason.to_string(),
                archived_to,
            });
        }
        Ok(())
    }

    fn archive_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sensor_log.json".into());
        name.push(format!(".corrupt-{}", stamp));
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sensor_log.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write the whole array: temp file, fsync, rename over the target
    fn write_locked(&self, records: &[LogRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(records)?;
        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)
                .with_context(|| format!("creating {:?}", temp))?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)
            .with_context(|| format!("replacing sensor log {:?}", self.path))?;
        Ok(())
    }
}
