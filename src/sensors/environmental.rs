// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Environmental sensors - BME280 temperature, humidity, pressure
//!
//! The chip itself sits behind [`EnvironmentalDriver`]. Builds without a
//! driver still accept `bme280_*` sensors, but every read reports
//! [`ReadError::Unavailable`] without touching the bus.

use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;
use anyhow::Result;
use serde_json::Value;
use tracing::{info, warn};

use super::traits::{param_str, round2, ParamError, Params, ReadError, Reader};

/// Blocking access to a BME280-class sensor
pub trait EnvironmentalDriver: Send + Sync {
    /// Degrees Celsius
    fn temperature(&self) -> Result<f64>;
    /// Relative humidity, percent
    fn humidity(&self) -> Result<f64>;
    /// Pressure, hPa
    fn pressure(&self) -> Result<f64>;
}

/// Opens the driver; called at most once per registry build
pub type DriverInit = Arc<dyn Fn() -> Result<Arc<dyn EnvironmentalDriver>> + Send + Sync>;

/// Outcome of driver initialization, shared by every BME280 reader
#[derive(Clone)]
pub enum DriverState {
    Ready(Arc<dyn EnvironmentalDriver>),
    Unavailable(String),
}

impl fmt::Debug for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Ready(_) => f.write_str("Ready"),
            DriverState::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}

impl DriverState {
    /// Run `init` if one is installed; failures are kept, not propagated
    pub fn initialize(init: Option<&DriverInit>) -> Self {
        match init {
            None => {
                warn!("BME280 sensor configured but no BME280 driver is available in this build. Those sensors will report unavailable.");
                DriverState::Unavailable("no BME280 driver available".to_string())
            }
            Some(init) => match init() {
                Ok(driver) => {
                    info!("BME280 sensor initialized successfully");
                    DriverState::Ready(driver)
                }
                Err(e) => {
                    warn!("Failed to initialize BME280 sensor: {:#}. Those sensors will report unavailable.", e);
                    DriverState::Unavailable(format!("BME280 initialization failed: {}", e))
                }
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, DriverState::Ready(_))
    }
}

/// Is this one of the driver-backed types
pub fn is_bme280_type(sensor_type: &str) -> bool {
    sensor_type.starts_with("bme280_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quantity {
    Temperature(TempUnit),
    Humidity,
    Pressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TempUnit {
    Celsius,
    Fahrenheit,
    Kelvin,
}

impl TempUnit {
    fn parse(params: &Params) -> Result<Self, ParamError> {
        match param_str(params, "unit")?.map(|u| u.to_ascii_uppercase()) {
            None => Ok(TempUnit::Celsius),
            Some(u) if u == "C" => Ok(TempUnit::Celsius),
            Some(u) if u == "F" => Ok(TempUnit::Fahrenheit),
            Some(u) if u == "K" => Ok(TempUnit::Kelvin),
            Some(u) => Err(ParamError(format!("unknown temperature unit '{}', expected C, F or K", u))),
        }
    }

    fn convert(self, celsius: f64) -> f64 {
        match self {
            TempUnit::Celsius => celsius,
            TempUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
            TempUnit::Kelvin => celsius + 273.15,
        }
    }
}

/// One BME280 quantity
pub struct Bme280Reader {
    quantity: Quantity,
    driver: DriverState,
}

impl Bme280Reader {
    /// `bme280_temperature`, `unit` C (default), F or K
    pub fn temperature(params: &Params, driver: DriverState) -> Result<Self, ParamError> {
        Ok(Self { quantity: Quantity::Temperature(TempUnit::parse(params)?), driver })
    }

    /// `bme280_humidity`, percent
    pub fn humidity(_params: &Params, driver: DriverState) -> Result<Self, ParamError> {
        Ok(Self { quantity: Quantity::Humidity, driver })
    }

    /// `bme280_pressure`, hPa
    pub fn pressure(_params: &Params, driver: DriverState) -> Result<Self, ParamError> {
        Ok(Self { quantity: Quantity::Pressure, driver })
    }
}

#[async_trait]
impl Reader for Bme280Reader {
    fn sensor_type(&self) -> &'static str {
        match self.quantity {
            Quantity::Temperature(_) => "bme280_temperature",
            Quantity::Humidity => "bme280_humidity",
            Quantity::Pressure => "bme280_pressure",
        }
    }

    async fn read(&self) -> Result<Value, ReadError> {
        let driver = match &self.driver {
            DriverState::Ready(d) => Arc::clone(d),
            DriverState::Unavailable(reason) => return Err(ReadError::Unavailable(reason.clone())),
        };

        let quantity = self.quantity;
        let raw = tokio::task::spawn_blocking(move || match quantity {
            Quantity::Temperature(unit) => driver.temperature().map(|c| unit.convert(c)),
            Quantity::Humidity => driver.humidity(),
            Quantity::Pressure => driver.pressure(),
        })
        .await
        .map_err(|e| ReadError::Failed(format!("driver task failed: {}", e)))?
        .map_err(|e| ReadError::Failed(format!("{:#}", e)))?;

        Ok(Value::from(round2(raw)))
    }
}
