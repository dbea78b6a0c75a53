//! WebSocket push signaling transport
//!
//! One persistent duplex connection: inbound frames are demultiplexed by
//! message kind (sign-in, reconnect, offer, bare candidate) into the same
//! event stream the polling transport feeds; outbound messages are wrapped
//! in a routed envelope addressed to the target connection and funneled
//! through a single writer task so writes never interleave.

use super::message::{decode_push, AnswerDesc, IceCandidateDesc, OfferDesc, PushBody, RoutedMessage};
use super::{CandidateHandler, EventHub, HandlerId, IceCandidateInit, OfferHandler, Signaling};
use crate::peer::{negotiate_local_answer, PeerConnection};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Signaling over one persistent WebSocket connection
pub struct WebSocketSignaling {
    inner: Arc<WsInner>,
}

struct WsInner {
    url: String,
    running: AtomicBool,
    /// Present while the connection is open; the single writer task is the
    /// only consumer, which serializes all outbound writes
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connect_task: Mutex<Option<JoinHandle<()>>>,
    events: EventHub,
}

impl WsInner {
    fn new(url: String) -> Self {
        Self {
            url,
            running: AtomicBool::new(false),
            outbound: Mutex::new(None),
            connect_task: Mutex::new(None),
            events: EventHub::new(),
        }
    }

    /// Hand a serialized frame to the writer task, or log and drop when the
    /// connection is not open (no queuing, no retry)
    fn send_text(&self, json: String) {
        let guard = self.outbound.lock();
        match guard.as_ref() {
            Some(tx) => {
                debug!("Signaling: sending WS data: {}", json);
                if tx.send(Message::Text(json)).is_err() {
                    error!("Signaling: WS writer is gone, message dropped");
                }
            }
            None => error!("Signaling: WS is not connected, unable to send message"),
        }
    }
}

impl WebSocketSignaling {
    /// Create a transport for the given ws:// or wss:// URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(WsInner::new(url.into())),
        }
    }
}

impl Signaling for WebSocketSignaling {
    fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);

        if self.inner.outbound.lock().is_some() {
            debug!("Signaling: WS already connected");
            return;
        }
        let mut task = self.inner.connect_task.lock();
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            debug!("Signaling: WS connect already in progress");
            return;
        }
        *task = Some(tokio::spawn(run_connection(self.inner.clone())));
    }

    fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.inner.outbound.lock().take() {
            let _ = tx.send(Message::Close(None));
        }
        self.inner.connect_task.lock().take();
        info!("Signaling: push transport stopped");
    }

    fn send_candidate(&self, connection_id: &str, candidate: IceCandidateInit) {
        if !self.inner.running.load(Ordering::SeqCst) {
            warn!("Signaling: not running, dropping outbound candidate");
            return;
        }
        let desc = candidate.with_connection_id(connection_id);
        match RoutedMessage::to_peer(connection_id, desc).to_json() {
            Ok(json) => self.inner.send_text(json),
            Err(e) => error!("Signaling: {}", e),
        }
    }

    fn send_answer(&self, connection_id: &str, peer: Arc<dyn PeerConnection>) {
        if !self.inner.running.load(Ordering::SeqCst) {
            warn!("Signaling: not running, dropping outbound answer");
            return;
        }
        let inner = self.inner.clone();
        let connection_id = connection_id.to_string();
        // Negotiation suspends, so it runs off the caller's context
        tokio::spawn(async move {
            let sdp = match negotiate_local_answer(peer.as_ref()).await {
                Ok(sdp) => sdp,
                Err(e) => {
                    error!("Signaling: local negotiation failed: {}", e);
                    return;
                }
            };
            if !inner.running.load(Ordering::SeqCst) {
                return;
            }
            let answer = AnswerDesc {
                connection_id: connection_id.clone(),
                sdp,
            };
            match RoutedMessage::to_peer(connection_id, answer).to_json() {
                Ok(json) => inner.send_text(json),
                Err(e) => error!("Signaling: {}", e),
            }
        });
    }

    fn on_offer(&self, handler: OfferHandler) -> HandlerId {
        self.inner.events.on_offer(handler)
    }

    fn on_ice_candidate(&self, handler: CandidateHandler) -> HandlerId {
        self.inner.events.on_ice_candidate(handler)
    }

    fn unsubscribe(&self, id: HandlerId) {
        self.inner.events.unsubscribe(id)
    }
}

/// Connect, then pump the connection: a spawned writer drains the outbound
/// channel while this task dispatches inbound frames in arrival order.
async fn run_connection(inner: Arc<WsInner>) {
    info!("Signaling: connecting to {}", inner.url);
    let (ws, _) = match connect_async(inner.url.as_str()).await {
        Ok(ok) => ok,
        Err(e) => {
            error!("Signaling: WS connection error: {}", e);
            return;
        }
    };
    if !inner.running.load(Ordering::SeqCst) {
        debug!("Signaling: stopped before WS connect completed");
        return;
    }
    info!("Signaling: WS connected");

    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *inner.outbound.lock() = Some(tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if write.send(msg).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_frame(&inner, &text),
            Ok(Message::Close(frame)) => {
                error!(
                    "Signaling: WS connection closed, code: {:?}",
                    frame.map(|f| f.code)
                );
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Signaling: WS connection error: {}", e);
                break;
            }
        }
    }

    release_outbound(&inner, &tx);
    drop(tx);
    let _ = writer.await;
    debug!("Signaling: WS receive loop exited");
}

/// Clear the outbound slot only if it still holds this connection's sender;
/// after a stop-then-start a newer connection may have installed its own.
fn release_outbound(inner: &WsInner, tx: &mpsc::UnboundedSender<Message>) {
    let mut guard = inner.outbound.lock();
    if guard.as_ref().map_or(false, |current| current.same_channel(tx)) {
        *guard = None;
    }
}

/// Dispatch one inbound frame. Decode failures and messages without an
/// identifiable sender are logged and dropped; nothing here terminates the
/// connection.
fn handle_frame(inner: &WsInner, text: &str) {
    if !inner.running.load(Ordering::SeqCst) {
        return;
    }
    debug!("Signaling: receiving message: {}", text);

    let push = match decode_push(text) {
        Ok(push) => push,
        Err(e) => {
            error!("Signaling: failed to parse message: {}", e);
            return;
        }
    };

    match push.body {
        PushBody::SignIn { status, message } => {
            if status.as_deref() == Some("SUCCESS") {
                // Slot bookkeeping only; no event in the minimal contract
                debug!("Signaling: slot signed in");
            } else {
                error!(
                    "Signaling: sign-in error: {}",
                    message.unwrap_or_default()
                );
            }
        }
        PushBody::Reconnect { status, message } => {
            if status.as_deref() == Some("SUCCESS") {
                info!("Signaling: slot reconnected");
            } else {
                error!(
                    "Signaling: reconnect error: {}",
                    message.unwrap_or_default()
                );
            }
        }
        PushBody::Offer { sdp } => match push.from {
            Some(from) => {
                let offer = OfferDesc {
                    connection_id: from,
                    sdp,
                };
                inner.events.emit_offer(&offer);
            }
            None => error!("Signaling: received offer from unknown peer"),
        },
        PushBody::Candidate {
            candidate,
            sdp_mid,
            sdp_mline_index,
        } => match push.from {
            Some(from) => {
                let candidate = IceCandidateDesc {
                    connection_id: from,
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                };
                inner.events.emit_ice_candidate(&candidate);
            }
            None => error!("Signaling: received candidate from unknown peer"),
        },
        PushBody::Unrecognized => debug!("Signaling: unrecognized message ignored"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    struct Collected {
        offers: Mutex<Vec<OfferDesc>>,
        candidates: Mutex<Vec<IceCandidateDesc>>,
    }

    fn collecting_inner() -> (Arc<WsInner>, Arc<Collected>) {
        let inner = Arc::new(WsInner::new("ws://unused".to_string()));
        inner.running.store(true, Ordering::SeqCst);
        let collected = Arc::new(Collected {
            offers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
        });
        {
            let c = collected.clone();
            inner
                .events
                .on_offer(Arc::new(move |o| c.offers.lock().push(o.clone())));
            let c = collected.clone();
            inner
                .events
                .on_ice_candidate(Arc::new(move |c2| c.candidates.lock().push(c2.clone())));
        }
        (inner, collected)
    }

    #[test]
    fn test_offer_without_sender_is_dropped() {
        let (inner, collected) = collecting_inner();
        handle_frame(&inner, r#"{"type":"offer","sdp":"v=0..."}"#);
        assert!(collected.offers.lock().is_empty());
        assert!(collected.candidates.lock().is_empty());
    }

    #[test]
    fn test_routed_offer_emits_event() {
        let (inner, collected) = collecting_inner();
        handle_frame(
            &inner,
            r#"{"from":"conn-3","message":{"type":"offer","sdp":"v=0\r\noffer"}}"#,
        );
        let offers = collected.offers.lock();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].connection_id, "conn-3");
        assert_eq!(offers[0].sdp, "v=0\r\noffer");
    }

    #[test]
    fn test_routed_candidate_emits_one_event() {
        let (inner, collected) = collecting_inner();
        handle_frame(
            &inner,
            r#"{"from":"peer1","message":{"candidate":"candidate:1 1 UDP 2122260223 192.168.0.2 50000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#,
        );
        let candidates = collected.candidates.lock();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].connection_id, "peer1");
        assert_eq!(candidates[0].sdp_mid.as_deref(), Some("0"));
    }

    #[test]
    fn test_malformed_frame_does_not_panic() {
        let (inner, collected) = collecting_inner();
        handle_frame(&inner, "not json at all");
        handle_frame(&inner, "[1,2,3]");
        assert!(collected.offers.lock().is_empty());
    }

    #[test]
    fn test_control_messages_emit_nothing() {
        let (inner, collected) = collecting_inner();
        handle_frame(&inner, r#"{"type":"signIn","status":"SUCCESS"}"#);
        handle_frame(&inner, r#"{"type":"signIn","status":"FAILURE","message":"full"}"#);
        handle_frame(&inner, r#"{"type":"reconnect","status":"SUCCESS"}"#);
        assert!(collected.offers.lock().is_empty());
        assert!(collected.candidates.lock().is_empty());
    }

    #[test]
    fn test_frames_after_stop_are_ignored() {
        let (inner, collected) = collecting_inner();
        inner.running.store(false, Ordering::SeqCst);
        handle_frame(
            &inner,
            r#"{"from":"conn-3","message":{"type":"offer","sdp":"v=0..."}}"#,
        );
        assert!(collected.offers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_connection_is_dropped() {
        let signaling = WebSocketSignaling::new("ws://127.0.0.1:1");
        signaling.inner.running.store(true, Ordering::SeqCst);
        // No connection was ever opened; this must log and return
        signaling.send_candidate(
            "c1",
            IceCandidateInit {
                candidate: "candidate:1".to_string(),
                sdp_mid: None,
                sdp_mline_index: 0,
            },
        );
    }

    #[test]
    fn test_stale_connection_cleanup_spares_newer_sender() {
        let inner = WsInner::new("ws://unused".to_string());
        let (old_tx, _old_rx) = mpsc::unbounded_channel::<Message>();
        let (new_tx, _new_rx) = mpsc::unbounded_channel::<Message>();

        // A newer connection has already installed its sender; the old
        // connection's cleanup must not clobber it
        *inner.outbound.lock() = Some(new_tx.clone());
        release_outbound(&inner, &old_tx);
        assert!(inner.outbound.lock().is_some());

        release_outbound(&inner, &new_tx);
        assert!(inner.outbound.lock().is_none());
    }

    #[tokio::test]
    async fn test_restart_keeps_new_connection_sendable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Stub peer accepting any number of sequential connections,
        // forwarding every text frame it sees
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let frames_tx = frames_tx.clone();
                tokio::spawn(async move {
                    let mut ws = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(_) => return,
                    };
                    while let Some(Ok(frame)) = ws.next().await {
                        match frame {
                            Message::Text(text) => {
                                let _ = frames_tx.send(text);
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                });
            }
        });

        let signaling = WebSocketSignaling::new(format!("ws://{}", addr));
        let wait_connected = |signaling: &WebSocketSignaling| {
            let inner = signaling.inner.clone();
            async move {
                timeout(Duration::from_secs(2), async {
                    while inner.outbound.lock().is_none() {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                })
                .await
                .expect("connection never opened");
            }
        };

        signaling.start();
        wait_connected(&signaling).await;

        signaling.stop();
        signaling.start();
        wait_connected(&signaling).await;

        // Let the first connection's task finish draining; it must not
        // clear the second connection's sender
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(
            signaling.inner.outbound.lock().is_some(),
            "restart lost the live connection sender"
        );

        signaling.send_candidate(
            "c1",
            IceCandidateInit {
                candidate: "candidate:9 1 UDP 2122260223 192.168.0.2 50000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: 0,
            },
        );
        let frame = timeout(Duration::from_secs(2), frames_rx.recv())
            .await
            .expect("no frame after restart")
            .unwrap();
        assert!(frame.contains("candidate:9"));

        signaling.stop();
    }

    #[tokio::test]
    async fn test_push_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Stub peer: push one routed offer, then wait for the client's
        // enveloped candidate
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                r#"{"from":"conn-9","message":{"type":"offer","sdp":"v=0\r\nremote"}}"#.to_string(),
            ))
            .await
            .unwrap();
            while let Some(frame) = ws.next().await {
                if let Ok(Message::Text(text)) = frame {
                    return text;
                }
            }
            panic!("client sent nothing");
        });

        let signaling = WebSocketSignaling::new(format!("ws://{}", addr));
        let offers: Arc<Mutex<Vec<OfferDesc>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let offers = offers.clone();
            signaling.on_offer(Arc::new(move |o| offers.lock().push(o.clone())));
        }

        signaling.start();
        timeout(Duration::from_secs(2), async {
            while offers.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no offer event arrived");
        assert_eq!(offers.lock()[0].connection_id, "conn-9");

        signaling.send_candidate(
            "conn-9",
            IceCandidateInit {
                candidate: "candidate:1 1 UDP 2122260223 192.168.0.2 50000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: 0,
            },
        );

        let sent = timeout(Duration::from_secs(2), server)
            .await
            .expect("server saw no frame")
            .unwrap();
        assert!(sent.contains(r#""to":"conn-9""#));
        assert!(sent.contains(r#""candidate":"candidate:1"#));

        signaling.stop();
    }
}
