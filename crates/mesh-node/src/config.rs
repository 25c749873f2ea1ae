//! Node configuration.
//!
//! Loaded from TOML. Every section and field has a default, so an empty
//! file (or no file at all) yields a working single node on the default
//! ports. Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mesh_network::LinkConfig;
use mesh_protocol::{
    PeerAddress, DEFAULT_FLOODING_INTERVAL_MS, DEFAULT_HTTP_PORT, DEFAULT_P2P_PORT,
    DEFAULT_TRIES_LIMIT, FLOODING_TIMEOUT_FACTOR, TASK_EMA_ALPHA, TASK_TIMEOUT_MULTIPLIER,
};
use mesh_state::WorkerConfig;

/// Directory under the platform config dir holding `config.toml`.
pub const CONFIG_DIR_NAME: &str = "sudoku-mesh";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub flooding: FloodingSection,
    pub scheduler: SchedulerSection,
    pub network: NetworkSection,
    pub validator: ValidatorSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Host this node binds to and advertises to peers.
    pub host: String,
    pub p2p_port: u16,
    pub http_port: u16,
    /// `host:port` of a mesh member to join on start.
    pub anchor: Option<String>,
    /// Base delay of the throttled validator; `0` disables throttling.
    pub handicap_ms: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            p2p_port: DEFAULT_P2P_PORT,
            http_port: DEFAULT_HTTP_PORT,
            anchor: None,
            handicap_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodingSection {
    pub interval_ms: u64,
    /// Heartbeat window, in flooding intervals.
    pub timeout_factor: u32,
}

impl Default for FloodingSection {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_FLOODING_INTERVAL_MS,
            timeout_factor: FLOODING_TIMEOUT_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub tick_ms: u64,
    pub tries_limit: u32,
    pub timeout_multiplier: f64,
    pub min_task_timeout_ms: u64,
    pub ema_alpha: f64,
    /// Target duration of one task.
    pub task_size_factor_secs: f64,
    pub initial_task_size: u64,
    pub max_growth: f64,
    /// Search slices of the active job locally while idle.
    pub self_assign: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_ms: 20,
            tries_limit: DEFAULT_TRIES_LIMIT,
            timeout_multiplier: TASK_TIMEOUT_MULTIPLIER,
            min_task_timeout_ms: 1000,
            ema_alpha: TASK_EMA_ALPHA,
            task_size_factor_secs: 1.0,
            initial_task_size: 100,
            max_growth: 2.0,
            self_assign: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 500,
            send_timeout_ms: 1000,
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorSection {
    /// Window over which validator calls are counted.
    pub interval_secs: u64,
    /// Calls allowed in the window before the handicap kicks in.
    pub threshold: usize,
}

impl Default for ValidatorSection {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `explicit` if given, else the per-user config file if present, else
    /// defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flooding.interval_ms == 0 {
            return Err(ConfigError::Invalid("flooding.interval_ms must be > 0".into()));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.tick_ms must be > 0".into()));
        }
        if !(self.scheduler.ema_alpha > 0.0 && self.scheduler.ema_alpha <= 1.0) {
            return Err(ConfigError::Invalid("scheduler.ema_alpha must be in (0, 1]".into()));
        }
        if self.scheduler.task_size_factor_secs <= 0.0 {
            return Err(ConfigError::Invalid(
                "scheduler.task_size_factor_secs must be > 0".into(),
            ));
        }
        if self.scheduler.max_growth < 1.0 {
            return Err(ConfigError::Invalid("scheduler.max_growth must be >= 1".into()));
        }
        if let Some(anchor) = &self.node.anchor {
            if !anchor.contains(':') {
                return Err(ConfigError::Invalid(format!(
                    "anchor `{anchor}` is not host:port"
                )));
            }
        }
        Ok(())
    }

    pub fn p2p_bind_addr(&self) -> String {
        format!("{}:{}", self.node.host, self.node.p2p_port)
    }

    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.node.host, self.node.http_port)
    }

    pub fn anchor(&self) -> Option<PeerAddress> {
        self.node.anchor.as_deref().map(PeerAddress::from)
    }

    pub fn flooding_interval(&self) -> Duration {
        Duration::from_millis(self.flooding.interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.flooding_interval() * self.flooding.timeout_factor
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            ema_alpha: self.scheduler.ema_alpha,
            task_size_factor: self.scheduler.task_size_factor_secs,
            initial_task_size: self.scheduler.initial_task_size,
            max_growth: self.scheduler.max_growth,
            task_timeout_multiplier: self.scheduler.timeout_multiplier,
            min_task_timeout: Duration::from_millis(self.scheduler.min_task_timeout_ms),
            heartbeat_timeout: self.heartbeat_timeout(),
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms),
            send_timeout: Duration::from_millis(self.network.send_timeout_ms),
            channel_capacity: self.network.channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_launcher() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.node.p2p_port, 7000);
        assert_eq!(cfg.node.http_port, 8000);
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(6));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let cfg: NodeConfig = toml::from_str(
            r#"
            [node]
            p2p_port = 7100
            anchor = "10.0.0.1:7000"

            [scheduler]
            tries_limit = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.node.p2p_port, 7100);
        assert_eq!(cfg.node.http_port, 8000);
        assert_eq!(cfg.scheduler.tries_limit, 5);
        assert_eq!(cfg.scheduler.initial_task_size, 100);
        assert_eq!(cfg.anchor(), Some(PeerAddress::from("10.0.0.1:7000")));
    }

    #[test]
    fn test_rejects_bad_anchor() {
        let mut cfg = NodeConfig::default();
        cfg.node.anchor = Some("nowhere".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
