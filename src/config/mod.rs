//! Configuration management for renderstream-signaling

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which signaling transport to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Websocket,
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Websocket => "websocket",
            TransportKind::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Signaling server configuration
    pub server: ServerConfig,

    /// Polling transport tuning
    #[serde(default)]
    pub polling: PollingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the signaling server (http(s):// for polling,
    /// ws(s):// for push)
    pub url: String,

    /// Transport selection
    #[serde(default)]
    pub transport: TransportKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between polling cycles
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,

    /// How far behind the wall clock the first polling window starts,
    /// in milliseconds
    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_safety_margin_ms() -> u64 {
    30_000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            safety_margin_ms: default_safety_margin_ms(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                url: "ws://127.0.0.1:80".to_string(),
                transport: TransportKind::default(),
            },
            polling: PollingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SignalingConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: SignalingConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.url.is_empty() {
            return Err("Server url must not be empty".into());
        }
        if self.polling.interval_secs == 0 {
            return Err("Polling interval_secs must be at least 1".into());
        }
        match self.server.transport {
            TransportKind::Websocket => {
                if !self.server.url.starts_with("ws://") && !self.server.url.starts_with("wss://") {
                    return Err("Websocket transport requires a ws:// or wss:// url".into());
                }
            }
            TransportKind::Http => {
                if !self.server.url.starts_with("http://")
                    && !self.server.url.starts_with("https://")
                {
                    return Err("Http transport requires an http:// or https:// url".into());
                }
            }
        }
        Ok(())
    }
}
