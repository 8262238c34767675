// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Simulated and constant readers for demo/testing

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::prelude::*;
use rand_distr::Uniform;
use serde_json::Value;

use super::traits::{param_f64, param_i64, round2, ParamError, Params, ReadError, Reader};

fn check_bounds<T: PartialOrd + std::fmt::Display>(
    min_key: &str,
    max_key: &str,
    min: T,
    max: T,
) -> Result<(), ParamError> {
    if min > max {
        return Err(ParamError(format!(
            "'{}' ({}) is greater than '{}' ({})",
            min_key, min, max_key, max
        )));
    }
    Ok(())
}

/// Uniform float in `[min, max]`, rounded to two decimals
pub struct UniformFloatReader {
    sensor_type: &'static str,
    dist: Uniform<f64>,
    rng: Mutex<StdRng>,
}

impl UniformFloatReader {
    fn build(
        sensor_type: &'static str,
        params: &Params,
        (min_key, default_min): (&str, f64),
        (max_key, default_max): (&str, f64),
    ) -> Result<Self, ParamError> {
        let min = param_f64(params, min_key, default_min)?;
        let max = param_f64(params, max_key, default_max)?;
        if !min.is_finite() || !max.is_finite() {
            return Err(ParamError(format!("'{}'/'{}' must be finite", min_key, max_key)));
        }
        check_bounds(min_key, max_key, min, max)?;
        if !(max - min).is_finite() {
            return Err(ParamError(format!("'{}'..'{}' range is too wide", min_key, max_key)));
        }

        Ok(Self {
            sensor_type,
            dist: Uniform::new_inclusive(min, max),
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// `simulated_temperature`: `min_temp`/`max_temp`, default 15..30
    pub fn temperature(params: &Params) -> Result<Self, ParamError> {
        Self::build("simulated_temperature", params, ("min_temp", 15.0), ("max_temp", 30.0))
    }

    /// `simulated_humidity`: `min_hum`/`max_hum`, default 30..70
    pub fn humidity(params: &Params) -> Result<Self, ParamError> {
        Self::build("simulated_humidity", params, ("min_hum", 30.0), ("max_hum", 70.0))
    }

    fn sample(&self) -> f64 {
        let raw = self.dist.sample(&mut *self.rng.lock());
        round2(raw)
    }
}

#[async_trait]
impl Reader for UniformFloatReader {
    fn sensor_type(&self) -> &'static str { self.sensor_type }

    async fn read(&self) -> Result<Value, ReadError> {
        Ok(Value::from(self.sample()))
    }
}

/// `random_value`: uniform integer in `[min_val, max_val]`, default 0..=100
pub struct RandomIntReader {
    dist: Uniform<i64>,
    rng: Mutex<StdRng>,
}

impl RandomIntReader {
    pub fn new(params: &Params) -> Result<Self, ParamError> {
        let min = param_i64(params, "min_val", 0)?;
        let max = param_i64(params, "max_val", 100)?;
        check_bounds("min_val", "max_val", min, max)?;

        Ok(Self {
            dist: Uniform::new_inclusive(min, max),
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }
}

#[async_trait]
impl Reader for RandomIntReader {
    fn sensor_type(&self) -> &'static str { "random_value" }

    async fn read(&self) -> Result<Value, ReadError> {
        let v = self.dist.sample(&mut *self.rng.lock());
        Ok(Value::from(v))
    }
}

/// `static_value`: the configured `value`, verbatim
pub struct StaticReader {
    value: Value,
}

impl StaticReader {
    pub fn new(params: &Params) -> Result<Self, ParamError> {
        match params.get("value") {
            None | Some(Value::Null) => Err(ParamError("'value' is required".to_string())),
            Some(v) => Ok(Self { value: v.clone() }),
        }
    }
}

#[async_trait]
impl Reader for StaticReader {
    fn sensor_type(&self) -> &'static str { "static_value" }

    async fn read(&self) -> Result<Value, ReadError> {
        Ok(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Params {
        match v {
            Value::Object(m) => m,
            _ => Params::new(),
        }
    }

    #[tokio::test]
    async fn test_temperature_stays_in_range() {
        let reader = UniformFloatReader::temperature(&params(json!({
            "min_temp": 35, "max_temp": 65
        })))
        .unwrap();

        for _ in 0..10_000 {
            let v = reader.read().await.unwrap().as_f64().unwrap();
            assert!((35.0..=65.0).contains(&v), "out of range: {}", v);
        }
    }

    #[tokio::test]
    async fn test_humidity_defaults() {
        let reader = UniformFloatReader::humidity(&Params::new()).unwrap();
        for _ in 0..1000 {
            let v = reader.read().await.unwrap().as_f64().unwrap();
            assert!((30.0..=70.0).contains(&v));
        }
    }

    #[tokio::test]
    async fn test_random_value_is_integer_and_inclusive() {
        let reader = RandomIntReader::new(&params(json!({"min_val": 3, "max_val": 4}))).unwrap();
        let mut seen = [false; 2];
        for _ in 0..500 {
            let v = reader.read().await.unwrap();
            let n = v.as_i64().expect("integer value");
            assert!(n == 3 || n == 4);
            seen[(n - 3) as usize] = true;
        }
        assert!(seen[0] && seen[1]);
    }

    #[tokio::test]
    async fn test_static_value_is_deterministic() {
        let reader = StaticReader::new(&params(json!({"value": "online"}))).unwrap();
        for _ in 0..100 {
            assert_eq!(reader.read().await.unwrap(), json!("online"));
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(StaticReader::new(&Params::new()).is_err());
        assert!(UniformFloatReader::temperature(&params(json!({"min_temp": 10, "max_temp": 5}))).is_err());
        assert!(UniformFloatReader::temperature(&params(json!({"min_temp": "cold"}))).is_err());
        assert!(UniformFloatReader::humidity(&params(json!({"min_hum": -1e308, "max_hum": 1e308}))).is_err());
        assert!(RandomIntReader::new(&params(json!({"min_val": 1.5}))).is_err());
        assert!(RandomIntReader::new(&params(json!({"min_val": 9, "max_val": 1}))).is_err());
    }
}
