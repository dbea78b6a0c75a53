use clap::Parser;
use std::path::PathBuf;

use renderstream_signaling::config::{SignalingConfig, TransportKind};

#[derive(Parser, Debug)]
#[command(name = "renderstream-signaling")]
#[command(author = "Renderstream Team")]
#[command(version = "0.2.0")]
#[command(about = "Signaling core for WebRTC render streaming", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/renderstream-signaling.toml")]
    pub config: PathBuf,

    /// Signaling server URL (overrides config)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Transport to use: websocket or http (overrides config)
    #[arg(short, long)]
    pub transport: Option<String>,

    /// Polling interval in seconds (http transport only)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<SignalingConfig, Box<dyn std::error::Error>> {
        let config = SignalingConfig::load(&self.config)?;
        Ok(config)
    }

    /// Apply command line overrides on top of the loaded config
    pub fn apply_overrides(
        &self,
        config: &mut SignalingConfig,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(ref url) = self.url {
            config.server.url = url.clone();
        }
        if let Some(ref transport) = self.transport {
            config.server.transport = match transport.as_str() {
                "websocket" | "ws" => TransportKind::Websocket,
                "http" => TransportKind::Http,
                other => return Err(format!("Unknown transport: {}", other).into()),
            };
        }
        if let Some(interval) = self.interval {
            config.polling.interval_secs = interval;
        }
        config.validate()
    }
}
