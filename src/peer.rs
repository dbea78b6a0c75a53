//! Peer-connection collaborator interface
//!
//! Media negotiation itself (codecs, tracks, encoders) lives outside this
//! crate. The host implements [`PeerConnection`] per connection id and the
//! transports drive it through the two-step local answer negotiation.

use crate::signaling::SignalingError;
use async_trait::async_trait;

/// The narrow seam to the external peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create an SDP answer for the previously applied remote offer
    async fn create_answer(&self) -> Result<String, SignalingError>;

    /// Apply the answer as the local description
    async fn set_local_description(&self, sdp: &str) -> Result<(), SignalingError>;
}

/// Two-step local negotiation: create the answer, then apply it locally.
/// Either step failing aborts the whole negotiation; nothing is transmitted
/// in that case.
pub(crate) async fn negotiate_local_answer(
    peer: &dyn PeerConnection,
) -> Result<String, SignalingError> {
    let sdp = peer.create_answer().await?;
    peer.set_local_description(&sdp).await?;
    Ok(sdp)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable collaborator for transport tests
    #[derive(Default)]
    pub struct FakePeerConnection {
        pub fail_create: bool,
        pub fail_set: bool,
        pub set_calls: AtomicUsize,
    }

    #[async_trait]
    impl PeerConnection for FakePeerConnection {
        async fn create_answer(&self) -> Result<String, SignalingError> {
            if self.fail_create {
                Err(SignalingError::Negotiation("create answer failed".into()))
            } else {
                Ok("v=0\r\nanswer".to_string())
            }
        }

        async fn set_local_description(&self, _sdp: &str) -> Result<(), SignalingError> {
            self.set_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_set {
                Err(SignalingError::Negotiation("set local description failed".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_negotiation_aborts_after_failed_create() {
        let peer = FakePeerConnection {
            fail_create: true,
            ..Default::default()
        };
        assert!(negotiate_local_answer(&peer).await.is_err());
        assert_eq!(peer.set_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_negotiation_applies_then_returns_answer() {
        let peer = FakePeerConnection::default();
        let sdp = negotiate_local_answer(&peer).await.unwrap();
        assert!(sdp.starts_with("v=0"));
        assert_eq!(peer.set_calls.load(Ordering::SeqCst), 1);
    }
}
