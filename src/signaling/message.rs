//! Signaling wire format
//!
//! Canonical in-memory shapes for offer/answer/candidate records, the
//! polling response bodies, and the routed envelope used by the push
//! transport, with JSON round-trip helpers.

use super::SignalingError;
use serde::{Deserialize, Serialize};

/// SDP offer from a remote peer, scoped to one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDesc {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    pub sdp: String,
}

/// SDP answer produced locally in response to an offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerDesc {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    pub sdp: String,
}

/// ICE candidate stamped with its connection id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateDesc {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: i32,
}

/// Locally discovered ICE candidate, before a connection id is attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: i32,
}

impl IceCandidateInit {
    /// Stamp this candidate with the connection it belongs to
    pub fn with_connection_id(self, connection_id: impl Into<String>) -> IceCandidateDesc {
        IceCandidateDesc {
            connection_id: connection_id.into(),
            candidate: self.candidate,
            sdp_mid: self.sdp_mid,
            sdp_mline_index: self.sdp_mline_index,
        }
    }
}

/// Response body of the create-session call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRes {
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// Response body of the get-offers call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferList {
    #[serde(default)]
    pub offers: Vec<OfferDesc>,
}

/// One connection's worth of candidates in a get-candidates response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateContainer {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    #[serde(default)]
    pub candidates: Vec<IceCandidateInit>,
}

/// Response body of the get-candidates call (one container per connection)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateContainerList {
    #[serde(default)]
    pub candidates: Vec<CandidateContainer>,
}

impl CandidateContainerList {
    /// Flatten containers into per-candidate records, stamping each
    /// candidate with its container's connection id. N containers of M
    /// candidates each yield exactly N*M records.
    pub fn flatten(self) -> Vec<IceCandidateDesc> {
        self.candidates
            .into_iter()
            .flat_map(|container| {
                let connection_id = container.connection_id;
                container
                    .candidates
                    .into_iter()
                    .map(move |c| c.with_connection_id(connection_id.clone()))
            })
            .collect()
    }
}

/// Envelope routing a signaling message over the shared push connection.
///
/// `from` identifies the sender on inbound messages, `to` addresses an
/// outbound message to a specific peer. Inbound payloads may also arrive
/// bare (no envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedMessage<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<T>,
}

impl<T: Serialize> RoutedMessage<T> {
    /// Wrap an outbound message addressed to one peer
    pub fn to_peer(to: impl Into<String>, message: T) -> Self {
        Self {
            from: None,
            to: Some(to.into()),
            message: Some(message),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self)
            .map_err(|e| SignalingError::Protocol(format!("Failed to serialize message: {}", e)))
    }
}

/// Bare push message shape: every field optional, classification decides
/// what the message means
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPush {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(default)]
    pub candidate: Option<String>,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<i32>,
}

/// Classified inbound push message, paired with the envelope sender (if any)
#[derive(Debug, Clone, PartialEq)]
pub struct InboundPush {
    pub from: Option<String>,
    pub body: PushBody,
}

/// Closed set of push message kinds, matched in fixed priority order
#[derive(Debug, Clone, PartialEq)]
pub enum PushBody {
    SignIn {
        status: Option<String>,
        message: Option<String>,
    },
    Reconnect {
        status: Option<String>,
        message: Option<String>,
    },
    Offer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: i32,
    },
    Unrecognized,
}

/// Decode one inbound push payload.
///
/// Accepts either the routed-envelope shape (`{from, to, message}`) or a
/// bare message. A structurally invalid payload is an explicit error; the
/// caller logs and drops it.
pub fn decode_push(text: &str) -> Result<InboundPush, SignalingError> {
    let routed = serde_json::from_str::<RoutedMessage<RawPush>>(text).ok();

    let (from, raw) = match routed {
        Some(RoutedMessage {
            from: Some(sender),
            message: Some(message),
            ..
        }) if !sender.is_empty() => (Some(sender), message),
        _ => {
            let bare = serde_json::from_str::<RawPush>(text)
                .map_err(|e| SignalingError::Protocol(format!("Failed to parse message: {}", e)))?;
            (None, bare)
        }
    };

    Ok(InboundPush {
        from,
        body: classify(raw),
    })
}

/// Classify a bare push message: typed kinds first, then the untyped
/// candidate shape, else unrecognized.
fn classify(raw: RawPush) -> PushBody {
    match raw.kind.as_deref() {
        Some("signIn") => PushBody::SignIn {
            status: raw.status,
            message: raw.message,
        },
        Some("reconnect") => PushBody::Reconnect {
            status: raw.status,
            message: raw.message,
        },
        Some("offer") => PushBody::Offer {
            sdp: raw.sdp.unwrap_or_default(),
        },
        Some(_) => PushBody::Unrecognized,
        None => match raw.candidate {
            Some(candidate) if !candidate.is_empty() => PushBody::Candidate {
                candidate,
                sdp_mid: raw.sdp_mid,
                sdp_mline_index: raw.sdp_mline_index.unwrap_or(0),
            },
            _ => PushBody::Unrecognized,
        },
    }
}
