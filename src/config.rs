//! Runtime configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`AppConfig::default()`]
//! 2. If `--config <file>` is given, deep-merge its JSON over the defaults
//! 3. Apply CLI flags and their environment variables (highest priority)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fleetwatch_server::ServerConfig;
use fleetwatch_telemetry::TelemetryConfig;
use fleetwatch_tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Level;

/// Vessel tracking server.
#[derive(Parser, Debug, Default)]
#[command(name = "fleetwatch", about = "Vessel update stream and tracking session server")]
pub struct Cli {
    /// JSON config file, merged over the built-in defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Seed file with the vessel list.
    #[arg(long, env = "FLEETWATCH_DATA")]
    pub data: Option<PathBuf>,

    /// Primary tracking window in milliseconds.
    #[arg(long, env = "FLEETWATCH_PRIMARY_MS")]
    pub primary_ms: Option<u64>,

    /// Grace tracking window in milliseconds.
    #[arg(long, env = "FLEETWATCH_GRACE_MS")]
    pub grace_ms: Option<u64>,

    /// Initial resubscribe delay in milliseconds.
    #[arg(long, env = "FLEETWATCH_RECONNECT_MS")]
    pub reconnect_ms: Option<u64>,

    /// Upstream tracker that receives the final IMO list of each session.
    #[arg(long, env = "FLEETWATCH_CONTINUATION_URL")]
    pub continuation_url: Option<String>,

    /// Follow a remote update stream instead of this server's own updates.
    #[arg(long, env = "FLEETWATCH_STREAM_URL")]
    pub stream_url: Option<String>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[arg(long, env = "FLEETWATCH_LOG")]
    pub log: Option<String>,

    /// Emit JSON log lines.
    #[arg(long, env = "FLEETWATCH_LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub data_path: PathBuf,
    pub broadcast_capacity: usize,
    pub tracker: TrackerSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub max_client_drops: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub primary_window_ms: u64,
    pub grace_window_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub max_reconnect_backoff_ms: u64,
    pub continuation_timeout_ms: u64,
    pub continuation_url: Option<String>,
    pub stream_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            data_path: PathBuf::from("data/vessels.json"),
            broadcast_capacity: fleetwatch_core::broadcast::DEFAULT_CAPACITY,
            tracker: TrackerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            host: server.host,
            port: server.port,
            max_send_queue: server.max_send_queue,
            max_client_drops: server.max_client_drops,
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        let tracker = TrackerConfig::default();
        Self {
            primary_window_ms: millis(tracker.primary_window),
            grace_window_ms: millis(tracker.grace_window),
            reconnect_backoff_ms: millis(tracker.reconnect_backoff),
            max_reconnect_backoff_ms: millis(tracker.max_reconnect_backoff),
            continuation_timeout_ms: millis(tracker.continuation_timeout),
            continuation_url: None,
            stream_url: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl AppConfig {
    /// Resolve the full configuration for this process.
    pub fn load(cli: &Cli) -> Result<Self> {
        let defaults = serde_json::to_value(Self::default())?;
        let merged = match &cli.config {
            Some(path) => deep_merge(defaults, read_config_file(path)?),
            None => defaults,
        };

        let mut config: Self =
            serde_json::from_value(merged).context("invalid configuration file")?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(data) = &cli.data {
            self.data_path = data.clone();
        }
        if let Some(ms) = cli.primary_ms {
            self.tracker.primary_window_ms = ms;
        }
        if let Some(ms) = cli.grace_ms {
            self.tracker.grace_window_ms = ms;
        }
        if let Some(ms) = cli.reconnect_ms {
            self.tracker.reconnect_backoff_ms = ms;
        }
        if let Some(url) = &cli.continuation_url {
            self.tracker.continuation_url = non_empty(url);
        }
        if let Some(url) = &cli.stream_url {
            self.tracker.stream_url = non_empty(url);
        }
        if let Some(level) = &cli.log {
            self.logging.level = level.clone();
        }
        if let Some(json) = cli.log_json {
            self.logging.json = json;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.tracker_config()
            .validate()
            .context("invalid tracker settings")?;
        self.log_level()?;
        if self.broadcast_capacity == 0 {
            bail!("broadcast_capacity must be non-zero");
        }
        if self.server.max_send_queue == 0 {
            bail!("server.max_send_queue must be non-zero");
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        let t = &self.tracker;
        TrackerConfig {
            primary_window: Duration::from_millis(t.primary_window_ms),
            grace_window: Duration::from_millis(t.grace_window_ms),
            reconnect_backoff: Duration::from_millis(t.reconnect_backoff_ms),
            max_reconnect_backoff: Duration::from_millis(
                t.max_reconnect_backoff_ms.max(t.reconnect_backoff_ms),
            ),
            continuation_timeout: Duration::from_millis(t.continuation_timeout_ms),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            max_send_queue: self.server.max_send_queue,
            max_client_drops: self.server.max_client_drops,
            ..ServerConfig::default()
        }
    }

    pub fn telemetry_config(&self) -> Result<TelemetryConfig> {
        Ok(TelemetryConfig {
            log_level: self.log_level()?,
            module_levels: Vec::new(),
            json: self.logging.json,
        })
    }

    fn log_level(&self) -> Result<Level> {
        self.logging
            .level
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown log level: {}", self.logging.level))
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_owned())
}

fn read_config_file(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`. Nulls in
/// `source` keep the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}
