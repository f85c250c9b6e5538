//! Engine configuration.
//!
//! The host supplies this structure (or a TOML document mapping to it); the
//! engine only consumes it. Every field has a default so a minimal config is
//! valid, and `validate()` rejects values that would break the loop's
//! termination or timeout guarantees.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Error;

/// The root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model name passed to the completion capability
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Maximum reasoning-loop model calls per user turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Model invocation retries after the first failure
    #[serde(default = "default_model_retries")]
    pub model_retries: u32,

    /// Base backoff between model retries, milliseconds (linear)
    #[serde(default = "default_model_backoff_ms")]
    pub model_backoff_ms: u64,

    /// Per-model-call timeout, seconds
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Per-tool-call timeout, seconds
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Maximum facts retrieved per user turn
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Name of the status-check tool used to poll pending handles
    #[serde(default = "default_status_tool")]
    pub status_tool: String,

    /// Tool transport connection parameters
    #[serde(default)]
    pub transport: TransportConfig,
}

/// How to reach the external tool process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Executable to spawn
    #[serde(default)]
    pub command: String,

    /// Arguments for the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the child process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Handshake timeout, seconds
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_iterations() -> u32 {
    8
}
fn default_model_retries() -> u32 {
    2
}
fn default_model_backoff_ms() -> u64 {
    500
}
fn default_model_timeout_secs() -> u64 {
    60
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_recall_limit() -> usize {
    20
}
fn default_status_tool() -> String {
    "job_status".into()
}
fn default_handshake_timeout_secs() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config must deserialize via defaults")
    }
}

impl EngineConfig {
    /// Parse a TOML document supplied by the host.
    pub fn from_toml_str(raw: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(raw).map_err(|e| Error::Config {
            message: format!("invalid config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break loop termination or timeouts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_iterations == 0 {
            return Err(Error::Config {
                message: "max_iterations must be at least 1".into(),
            });
        }
        if self.model_timeout_secs == 0 || self.tool_timeout_secs == 0 {
            return Err(Error::Config {
                message: "timeouts must be non-zero".into(),
            });
        }
        if self.status_tool.is_empty() {
            return Err(Error::Config {
                message: "status_tool must be set".into(),
            });
        }
        Ok(())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn model_backoff(&self) -> Duration {
        Duration::from_millis(self.model_backoff_ms)
    }
}
