//! Configuration types and loading.
//!
//! Config files are JSON or YAML (picked by file extension). Field names are
//! camelCase on the wire, matching the admin/dashboard surface.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration handed to the service factory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    /// Upstream servers keyed by server id. May be empty.
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

/// One upstream server registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Base URL requests are issued against (also the liveness-probe target).
    pub base_url: String,
    #[serde(default)]
    pub connection: ConnectionSettings,
    /// Default headers applied to every request. Values are templates.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Declarative tools exposed from this server, keyed by tool name.
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,
}

/// Connection lifecycle knobs, immutable after registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    /// Connect/probe timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Number of connect attempts before the server is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed interval between attempts in milliseconds (no jitter).
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Heartbeat probe interval while connected; absent disables heartbeats.
    #[serde(default)]
    pub heartbeat_interval_ms: Option<u64>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
            heartbeat_interval_ms: None,
        }
    }
}

impl ConnectionSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms.map(Duration::from_millis)
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    1_000
}

/// One declarative HTTP tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    /// HTTP method (case-insensitive).
    pub method: String,
    /// Request path template, e.g. `/users/{{id}}`.
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Per-tool headers. Values are templates.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Optional request-body template. Rendered as-is; JSON bodies are
    /// written as JSON templates.
    #[serde(default)]
    pub body: Option<String>,
    /// Declared call arguments, keyed by argument name.
    #[serde(default)]
    pub params: HashMap<String, ParamConfig>,
}

/// One declared tool argument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamConfig {
    /// Defaults to true when unset.
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub default: Option<Value>,
    /// JSON Schema for the argument; defaults to `{"type": "string"}`.
    #[serde(default)]
    pub schema: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Load a config file, dispatching on extension (`.yaml`/`.yml` vs JSON).
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<CoreConfig> {
    let bytes = std::fs::read(path)?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let config: CoreConfig = if is_yaml {
        serde_yaml::from_slice(&bytes)?
    } else {
        serde_json::from_slice(&bytes)?
    };
    validate(&config)?;
    Ok(config)
}

/// Structural validation beyond what serde enforces.
///
/// # Errors
///
/// Returns an error if a server's base URL does not parse.
pub fn validate(config: &CoreConfig) -> Result<()> {
    for (server_id, server) in &config.servers {
        url::Url::parse(&server.base_url).map_err(|e| {
            CoreError::Config(format!(
                "Invalid baseUrl '{}' for server '{server_id}': {e}",
                server.base_url
            ))
        })?;
    }
    Ok(())
}
