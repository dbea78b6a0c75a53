//! Signaling facade
//!
//! The one abstraction the host depends on: start/stop lifecycle, outbound
//! candidate/answer delivery, and a subscribable stream of offer and
//! candidate events. Two transports implement it:
//! - [`HttpSignaling`]: stateless HTTP long-polling with time cursors
//! - [`WebSocketSignaling`]: one persistent push connection

pub mod http;
pub mod message;
pub mod websocket;

pub use http::HttpSignaling;
pub use message::{IceCandidateDesc, IceCandidateInit, OfferDesc};
pub use websocket::WebSocketSignaling;

use crate::peer::PeerConnection;
use parking_lot::Mutex;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Signaling-related errors
#[derive(Debug)]
pub enum SignalingError {
    /// Network-level failure (connection refused, timeout, non-2xx)
    Transport(String),
    /// Malformed payload or missing required field
    Protocol(String),
    /// Local answer creation or description application failed
    Negotiation(String),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SignalingError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SignalingError::Negotiation(msg) => write!(f, "Negotiation error: {}", msg),
        }
    }
}

impl Error for SignalingError {}

impl From<reqwest::Error> for SignalingError {
    fn from(e: reqwest::Error) -> Self {
        SignalingError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for SignalingError {
    fn from(e: serde_json::Error) -> Self {
        SignalingError::Protocol(e.to_string())
    }
}

/// Offer event callback
pub type OfferHandler = Arc<dyn Fn(&OfferDesc) + Send + Sync>;

/// Candidate event callback
pub type CandidateHandler = Arc<dyn Fn(&IceCandidateDesc) + Send + Sync>;

/// Opaque subscription handle, unique per [`EventHub`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Observer registry for signaling events.
///
/// Handlers are invoked synchronously in registration order on emission;
/// emitting with zero subscribers is a no-op. Shared by both transports.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    offer_handlers: Mutex<Vec<(HandlerId, OfferHandler)>>,
    candidate_handlers: Mutex<Vec<(HandlerId, CandidateHandler)>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_offer(&self, handler: OfferHandler) -> HandlerId {
        let id = self.allocate_id();
        self.offer_handlers.lock().push((id, handler));
        id
    }

    pub fn on_ice_candidate(&self, handler: CandidateHandler) -> HandlerId {
        let id = self.allocate_id();
        self.candidate_handlers.lock().push((id, handler));
        id
    }

    pub fn unsubscribe(&self, id: HandlerId) {
        self.offer_handlers.lock().retain(|(h, _)| *h != id);
        self.candidate_handlers.lock().retain(|(h, _)| *h != id);
    }

    pub fn emit_offer(&self, offer: &OfferDesc) {
        // Snapshot under the lock so a handler may unsubscribe re-entrantly
        let handlers: Vec<OfferHandler> = self
            .offer_handlers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(offer);
        }
    }

    pub fn emit_ice_candidate(&self, candidate: &IceCandidateDesc) {
        let handlers: Vec<CandidateHandler> = self
            .candidate_handlers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(candidate);
        }
    }
}

/// Capability set both transports implement.
///
/// Every method is non-blocking: the transports own their concurrency and
/// spawn their work onto the tokio runtime. After [`Signaling::stop`]
/// returns, no further events are emitted and sends become logged no-ops;
/// nothing across this boundary panics.
pub trait Signaling: Send + Sync {
    /// Begin signaling. Non-blocking; idempotent while running.
    fn start(&self);

    /// Stop signaling cooperatively. In-flight work finishes and its
    /// results are discarded.
    fn stop(&self);

    /// Deliver a locally discovered ICE candidate to the remote peer
    fn send_candidate(&self, connection_id: &str, candidate: IceCandidateInit);

    /// Create and locally apply an answer via the peer-connection
    /// collaborator, then deliver it to the remote peer
    fn send_answer(&self, connection_id: &str, peer: Arc<dyn PeerConnection>);

    /// Subscribe to offers arriving from remote peers
    fn on_offer(&self, handler: OfferHandler) -> HandlerId;

    /// Subscribe to candidates arriving from remote peers
    fn on_ice_candidate(&self, handler: CandidateHandler) -> HandlerId;

    /// Remove a previously registered handler
    fn unsubscribe(&self, id: HandlerId);
}
