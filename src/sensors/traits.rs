// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Sensor traits and common types

use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Reader-specific parameters, as written in the configuration
pub type Params = serde_json::Map<String, Value>;

/// Deadline for readers that do not declare their own
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(5);

/// One configured sensor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub params: Params,
}

/// Why a reader produced no value
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReadError {
    /// The read was attempted and failed
    #[error("{0}")]
    Failed(String),

    /// The read did not finish within its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The backing capability never initialized, no I/O was attempted
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ReadError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ReadError::Unavailable(_))
    }
}

/// Rejected reader parameters, reported at registry build time
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct ParamError(pub String);

/// The result of reading one sensor
#[derive(Debug, Clone)]
pub struct Reading {
    pub name: String,
    pub value: Result<Value, ReadError>,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(name: &str, value: Result<Value, ReadError>) -> Self {
        Self {
            name: name.to_string(),
            value,
            timestamp: Utc::now(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.value.is_ok()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ReadError> {
        self.value.as_ref().err()
    }
}

/// A capability that produces one sensor's value
#[async_trait]
pub trait Reader: Send + Sync {
    /// Registered type name this reader was built for
    fn sensor_type(&self) -> &'static str;

    /// Read one value
    async fn read(&self) -> Result<Value, ReadError>;

    /// Upper bound on a single read
    fn deadline(&self) -> Duration {
        DEFAULT_READ_DEADLINE
    }
}

/// Optional float parameter with a default
pub fn param_f64(params: &Params, key: &str, default: f64) -> Result<f64, ParamError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ParamError(format!("'{}' must be a number, got {}", key, v))),
    }
}

/// Optional integer parameter with a default
pub fn param_i64(params: &Params, key: &str, default: i64) -> Result<i64, ParamError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| ParamError(format!("'{}' must be an integer, got {}", key, v))),
    }
}

/// Optional string parameter
pub fn param_str<'a>(params: &'a Params, key: &str) -> Result<Option<&'a str>, ParamError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(v) => Err(ParamError(format!("'{}' must be a string, got {}", key, v))),
    }
}

/// Round to two decimals, the precision broadcast for analog readings
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
