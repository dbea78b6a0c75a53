//! renderstream-signaling - signaling core for WebRTC render streaming
//!
//! Exchanges session descriptions and ICE candidates with remote peers via
//! an intermediary signaling server, over either stateless HTTP
//! long-polling or a persistent WebSocket connection. Media negotiation is
//! delegated to the host's peer-connection collaborator.

pub mod config;
pub mod peer;
pub mod signaling;

// Re-exports
pub use config::{SignalingConfig, TransportKind};
pub use peer::PeerConnection;
pub use signaling::{
    HttpSignaling, IceCandidateDesc, IceCandidateInit, OfferDesc, Signaling, SignalingError,
    WebSocketSignaling,
};
