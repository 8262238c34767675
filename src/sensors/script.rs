// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! External command reader
//!
//! `custom_script` runs `script_path` directly with the `args` list as its
//! argv. There is no shell, so pipes, globs and quoting in `script_path` are
//! not interpreted. Whoever can edit the sensor configuration can run any
//! program as this process's user; protect the configuration file
//! accordingly.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::traits::{param_f64, param_str, ParamError, Params, ReadError, Reader};

const DEFAULT_TIMEOUT_SECS: f64 = 5.0;

/// Runs an external program and reports its trimmed stdout
pub struct ScriptReader {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ScriptReader {
    pub fn new(params: &Params) -> Result<Self, ParamError> {
        let program = param_str(params, "script_path")?
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParamError("'script_path' is required".to_string()))?;

        let args = match params.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(ParamError(format!("'args' entries must be strings, got {}", other))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(ParamError(format!("'args' must be a list, got {}", other)));
            }
        };

        let secs = param_f64(params, "timeout", DEFAULT_TIMEOUT_SECS)?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ParamError(format!("'timeout' must be a positive number of seconds, got {}", secs)));
        }
        let timeout = Duration::try_from_secs_f64(secs)
            .map_err(|e| ParamError(format!("'timeout' {} is out of range: {}", secs, e)))?;

        Ok(Self {
            program: PathBuf::from(program),
            args,
            timeout,
        })
    }

    async fn run(&self) -> Result<Value, ReadError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ReadError::Failed(format!("failed to run {:?}: {}", self.program, e)))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            debug!("Script {:?} returned {:?}", self.program, stdout);
            Ok(Value::String(stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(ReadError::Failed(format!(
                "{:?} exited with {}: {}",
                self.program, output.status, stderr
            )))
        }
    }
}

#[async_trait]
impl Reader for ScriptReader {
    fn sensor_type(&self) -> &'static str { "custom_script" }

    async fn read(&self) -> Result<Value, ReadError> {
        // Dropping the future on expiry kills the child.
        match tokio::time::timeout(self.timeout, self.run()).await {
            Ok(result) => result,
            Err(_) => Err(ReadError::Timeout(self.timeout)),
        }
    }

    fn deadline(&self) -> Duration {
        self.timeout
    }
}
