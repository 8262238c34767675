// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Sensor registry - maps declared types to readers and reads them

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;
use tracing::{info, warn, error, debug};

use super::environmental::{is_bme280_type, Bme280Reader, DriverInit, DriverState};
use super::script::ScriptReader;
use super::simulated::{RandomIntReader, StaticReader, UniformFloatReader};
use super::traits::{ParamError, Params, ReadError, Reader, Reading, SensorDefinition};
use crate::config::ConfigError;

/// Slack on top of a reader's own deadline before the registry gives up on it
const READ_GRACE: Duration = Duration::from_millis(500);

/// Shared state handed to factories while a registry is built
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub bme280: DriverState,
}

/// Builds a reader from its parameters, validating them
pub type ReaderFactory =
    Arc<dyn Fn(&Params, &BuildContext) -> Result<Box<dyn Reader>, ParamError> + Send + Sync>;

/// Dispatch table from type name to reader factory
#[derive(Clone, Default)]
pub struct ReaderTable {
    factories: HashMap<String, ReaderFactory>,
    bme280_init: Option<DriverInit>,
}

impl ReaderTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in reader type
    pub fn builtin() -> Self {
        let mut table = Self::new();
        table.register("simulated_temperature", |p, _| {
            Ok(Box::new(UniformFloatReader::temperature(p)?))
        });
        table.register("simulated_humidity", |p, _| {
            Ok(Box::new(UniformFloatReader::humidity(p)?))
        });
        table.register("random_value", |p, _| Ok(Box::new(RandomIntReader::new(p)?)));
        table.register("static_value", |p, _| Ok(Box::new(StaticReader::new(p)?)));
        table.register("custom_script", |p, _| Ok(Box::new(ScriptReader::new(p)?)));
        table.register("bme280_temperature", |p, ctx| {
            Ok(Box::new(Bme280Reader::temperature(p, ctx.bme280.clone())?))
        });
        table.register("bme280_humidity", |p, ctx| {
            Ok(Box::new(Bme280Reader::humidity(p, ctx.bme280.clone())?))
        });
        table.register("bme280_pressure", |p, ctx| {
            Ok(Box::new(Bme280Reader::pressure(p, ctx.bme280.clone())?))
        });
        table
    }

    /// Add or replace a reader type
    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(&Params, &BuildContext) -> Result<Box<dyn Reader>, ParamError> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.to_string(), Arc::new(factory));
    }

    /// Install the BME280 driver opener
    pub fn with_bme280_driver(mut self, init: DriverInit) -> Self {
        self.bme280_init = Some(init);
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

struct Entry {
    definition: SensorDefinition,
    reader: Box<dyn Reader>,
}

/// The active set of sensors. Immutable; rebuilt wholesale on reconfiguration.
pub struct SensorRegistry {
    entries: Vec<Entry>,
}

impl SensorRegistry {
    /// Validate every definition and build its reader. Any unknown type,
    /// duplicate name or bad parameter fails the whole build.
    pub fn build(definitions: &[SensorDefinition], table: &ReaderTable) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for def in definitions {
            if def.name.trim().is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !seen.insert(def.name.as_str()) {
                return Err(ConfigError::DuplicateName(def.name.clone()));
            }
            if !table.contains(&def.sensor_type) {
                return Err(ConfigError::UnknownType {
                    name: def.name.clone(),
                    sensor_type: def.sensor_type.clone(),
                });
            }
        }

        let needs_bme280 = definitions
            .iter()
            .any(|d| d.enabled && is_bme280_type(&d.sensor_type));
        let ctx = BuildContext {
            bme280: if needs_bme280 {
                DriverState::initialize(table.bme280_init.as_ref())
            } else {
                DriverState::Unavailable("no enabled BME280 sensor at initialization".to_string())
            },
        };

        let mut entries = Vec::with_capacity(definitions.len());
        for def in definitions {
            let factory = table.factories.get(&def.sensor_type).ok_or_else(|| {
                ConfigError::UnknownType {
                    name: def.name.clone(),
                    sensor_type: def.sensor_type.clone(),
                }
            })?;
            let reader = factory(&def.params, &ctx).map_err(|e| ConfigError::InvalidParams {
                name: def.name.clone(),
                reason: e.0,
            })?;
            entries.push(Entry { definition: def.clone(), reader });
        }

        let registry = Self { entries };
        info!(
            "Sensor registry built: {} sensors, {} enabled",
            registry.len(),
            registry.enabled_count()
        );
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.entries.iter().filter(|e| e.definition.enabled).count()
    }

    /// Definitions in declaration order, disabled ones included
    pub fn definitions(&self) -> impl Iterator<Item = &SensorDefinition> {
        self.entries.iter().map(|e| &e.definition)
    }

    /// Read every enabled sensor. Reads run concurrently, each bounded by
    /// its deadline; results come back in declaration order.
    pub async fn read_all(&self) -> Vec<Reading> {
        let reads = self
            .entries
            .iter()
            .filter(|e| e.definition.enabled)
            .map(Self::read_one);

        join_all(reads).await
    }

    async fn read_one(entry: &Entry) -> Reading {
        let name = &entry.definition.name;
        let deadline = entry.reader.deadline() + READ_GRACE;

        let value = match tokio::time::timeout(deadline, entry.reader.read()).await {
            Ok(v) => v,
            Err(_) => Err(ReadError::Timeout(deadline)),
        };

        match &value {
            Ok(v) => debug!("Read sensor '{}': {}", name, v),
            Err(e) if e.is_unavailable() => {
                warn!("Sensor '{}' ({}) skipped, hardware {}", name, entry.reader.sensor_type(), e)
            }
            Err(e) => error!("Error reading sensor '{}' ({}): {}", name, entry.reader.sensor_type(), e),
        }

        Reading::new(name, value)
    }
}
