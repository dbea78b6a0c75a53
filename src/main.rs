//! renderstream-signaling - demo runner
//!
//! Connects the selected transport to a signaling server and logs the
//! offer/candidate events it delivers, until interrupted.

mod args;

use args::Args;
use clap::Parser;
use log::{info, warn};
use renderstream_signaling::config::TransportKind;
use renderstream_signaling::{HttpSignaling, Signaling, SignalingConfig, WebSocketSignaling};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("RENDERSTREAM_LOG").unwrap_or_else(|_| log_level.to_string()))
        .init();

    info!("renderstream-signaling v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match args.load_config() {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            SignalingConfig::default()
        }
    };
    args.apply_overrides(&mut config)?;

    info!(
        "Signaling server: {} ({} transport)",
        config.server.url,
        config.server.transport.as_str()
    );

    let signaling: Arc<dyn Signaling> = match config.server.transport {
        TransportKind::Http => Arc::new(HttpSignaling::with_timing(
            &config.server.url,
            config.polling.interval(),
            config.polling.safety_margin(),
        )),
        TransportKind::Websocket => Arc::new(WebSocketSignaling::new(&config.server.url)),
    };

    signaling.on_offer(Arc::new(|offer| {
        info!(
            "Offer from connection {} ({} bytes of SDP)",
            offer.connection_id,
            offer.sdp.len()
        );
    }));
    signaling.on_ice_candidate(Arc::new(|candidate| {
        info!(
            "Candidate from connection {}: {}",
            candidate.connection_id, candidate.candidate
        );
    }));

    signaling.start();
    info!("Signaling started, press Ctrl+C to stop");

    signal::ctrl_c().await?;
    info!("Shutting down...");
    signaling.stop();

    Ok(())
}
