//! HTTP long-polling signaling transport
//!
//! Derives a consistent view of new offers and candidates from a stateless
//! request/response server: one serial polling loop, two per-kind time
//! cursors advanced only from the server's own clock (the response Date
//! header), never the local clock. A failed or unparseable poll leaves its
//! cursor untouched so the next cycle re-requests the same window; the
//! fixed poll interval is the only retry mechanism.

use super::message::{AnswerDesc, CandidateContainerList, IceCandidateDesc, OfferList, SessionRes};
use super::{
    CandidateHandler, EventHub, HandlerId, IceCandidateInit, OfferHandler, Signaling,
    SignalingError,
};
use crate::peer::{negotiate_local_answer, PeerConnection};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default wait between polling cycles
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default cursor initialization margin, tolerating clock skew and a
/// missed first window
const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Signaling over stateless HTTP long-polling
pub struct HttpSignaling {
    inner: Arc<HttpInner>,
}

struct HttpInner {
    url: String,
    client: reqwest::Client,
    poll_interval: Duration,
    safety_margin: Duration,
    running: AtomicBool,
    session_id: Mutex<Option<String>>,
    /// Last successfully processed server time for offers, epoch ms
    offer_cursor: AtomicI64,
    /// Last successfully processed server time for candidates, epoch ms
    candidate_cursor: AtomicI64,
    events: EventHub,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    /// Liveness flag owned by the currently spawned loop. Each start
    /// installs a fresh flag; a loop abandoned by stop stays dead even if
    /// start runs again before it wakes from its interval sleep.
    poll_flag: Mutex<Arc<AtomicBool>>,
}

impl HttpSignaling {
    /// Create a transport for the given signaling server base URL
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timing(url, DEFAULT_POLL_INTERVAL, DEFAULT_SAFETY_MARGIN)
    }

    /// Create a transport with explicit poll interval and cursor safety
    /// margin
    pub fn with_timing(
        url: impl Into<String>,
        poll_interval: Duration,
        safety_margin: Duration,
    ) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        Self {
            inner: Arc::new(HttpInner {
                url,
                client: reqwest::Client::new(),
                poll_interval,
                safety_margin,
                running: AtomicBool::new(false),
                session_id: Mutex::new(None),
                offer_cursor: AtomicI64::new(0),
                candidate_cursor: AtomicI64::new(0),
                events: EventHub::new(),
                poll_task: Mutex::new(None),
                poll_flag: Mutex::new(Arc::new(AtomicBool::new(false))),
            }),
        }
    }

    #[cfg(test)]
    fn offer_cursor_ms(&self) -> i64 {
        self.inner.offer_cursor.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn candidate_cursor_ms(&self) -> i64 {
        self.inner.candidate_cursor.load(Ordering::SeqCst)
    }
}

impl Signaling for HttpSignaling {
    fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Signaling: already running");
            return;
        }

        // Start the window behind the wall clock so offers posted just
        // before the session existed are still picked up
        let since = Utc::now().timestamp_millis() - self.inner.safety_margin.as_millis() as i64;
        self.inner.offer_cursor.store(since, Ordering::SeqCst);
        self.inner.candidate_cursor.store(since, Ordering::SeqCst);

        let alive = Arc::new(AtomicBool::new(true));
        *self.inner.poll_flag.lock() = alive.clone();
        let inner = self.inner.clone();
        let handle = tokio::spawn(long_polling(inner, alive));
        *self.inner.poll_task.lock() = Some(handle);
    }

    fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        // The loop observes its flag at the top of its next iteration; an
        // in-flight request completes and its result is discarded
        self.inner.poll_flag.lock().store(false, Ordering::SeqCst);
        self.inner.poll_task.lock().take();
        info!("Signaling: polling transport stopped");
    }

    fn send_candidate(&self, connection_id: &str, candidate: IceCandidateInit) {
        if !self.inner.running.load(Ordering::SeqCst) {
            warn!("Signaling: not running, dropping outbound candidate");
            return;
        }
        let inner = self.inner.clone();
        let desc = candidate.with_connection_id(connection_id);
        tokio::spawn(async move {
            if let Err(e) = post_candidate(&inner, &desc).await {
                error!("Signaling: candidate post failed: {}", e);
            }
        });
    }

    fn send_answer(&self, connection_id: &str, peer: Arc<dyn PeerConnection>) {
        if !self.inner.running.load(Ordering::SeqCst) {
            warn!("Signaling: not running, dropping outbound answer");
            return;
        }
        let inner = self.inner.clone();
        let connection_id = connection_id.to_string();
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
            let answer = AnswerDesc { connection_id, sdp };
            if let Err(e) = post_answer(&inner, &answer).await {
                error!("Signaling: answer post failed: {}", e);
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

/// The repeating fetch loop: create a session, then alternate offer and
/// candidate fetches until stopped. Strictly serial; the interval wait is
/// the only pacing.
async fn long_polling(inner: Arc<HttpInner>, alive: Arc<AtomicBool>) {
    if let Err(e) = create_session(&inner).await {
        error!("Signaling: session create failed: {}", e);
        return;
    }
    if inner.session_id.lock().is_none() {
        warn!("Signaling: no session id assigned, polling not started");
        return;
    }

    while alive.load(Ordering::SeqCst) {
        if let Err(e) = get_offers(&inner, &alive).await {
            error!("Signaling: offer fetch failed: {}", e);
        }
        if let Err(e) = get_candidates(&inner, &alive).await {
            error!("Signaling: candidate fetch failed: {}", e);
        }
        tokio::time::sleep(inner.poll_interval).await;
    }
    debug!("Signaling: polling loop exited");
}

async fn create_session(inner: &HttpInner) -> Result<(), SignalingError> {
    let resp = inner
        .client
        .put(format!("{}/signaling", inner.url))
        .send()
        .await?;
    let resp = check_status(resp)?;
    let body: SessionRes = resp
        .json()
        .await
        .map_err(|e| SignalingError::Protocol(format!("Invalid session response: {}", e)))?;
    match body.session_id {
        Some(id) if !id.is_empty() => {
            info!("Signaling: session created: {}", id);
            *inner.session_id.lock() = Some(id);
        }
        _ => warn!("Signaling: server returned no session id"),
    }
    Ok(())
}

async fn get_offers(inner: &HttpInner, alive: &AtomicBool) -> Result<(), SignalingError> {
    let session = current_session(inner)?;
    let fromtime = inner.offer_cursor.load(Ordering::SeqCst);
    let resp = inner
        .client
        .get(format!("{}/signaling/offer", inner.url))
        .query(&[("fromtime", fromtime)])
        .header("Session-Id", &session)
        .send()
        .await?;
    let resp = check_status(resp)?;
    let server_time = parse_date_header(&resp)?;
    let body: OfferList = resp
        .json()
        .await
        .map_err(|e| SignalingError::Protocol(format!("Invalid offer response: {}", e)))?;

    if !alive.load(Ordering::SeqCst) {
        return Ok(());
    }
    inner.offer_cursor.store(server_time, Ordering::SeqCst);

    for offer in body.offers {
        if offer.connection_id.is_empty() {
            warn!("Signaling: dropping offer without connection id");
            continue;
        }
        debug!("Signaling: offer received for {}", offer.connection_id);
        inner.events.emit_offer(&offer);
    }
    Ok(())
}

async fn get_candidates(inner: &HttpInner, alive: &AtomicBool) -> Result<(), SignalingError> {
    let session = current_session(inner)?;
    let fromtime = inner.candidate_cursor.load(Ordering::SeqCst);
    let resp = inner
        .client
        .get(format!("{}/signaling/candidate", inner.url))
        .query(&[("fromtime", fromtime)])
        .header("Session-Id", &session)
        .send()
        .await?;
    let resp = check_status(resp)?;
    let server_time = parse_date_header(&resp)?;
    let body: CandidateContainerList = resp
        .json()
        .await
        .map_err(|e| SignalingError::Protocol(format!("Invalid candidate response: {}", e)))?;

    if !alive.load(Ordering::SeqCst) {
        return Ok(());
    }
    inner.candidate_cursor.store(server_time, Ordering::SeqCst);

    for candidate in body.flatten() {
        if candidate.connection_id.is_empty() {
            warn!("Signaling: dropping candidate without connection id");
            continue;
        }
        inner.events.emit_ice_candidate(&candidate);
    }
    Ok(())
}

async fn post_candidate(inner: &HttpInner, desc: &IceCandidateDesc) -> Result<(), SignalingError> {
    let session = current_session(inner)?;
    let resp = inner
        .client
        .post(format!("{}/signaling/candidate", inner.url))
        .header("Session-Id", &session)
        .json(desc)
        .send()
        .await?;
    check_status(resp)?;
    Ok(())
}

async fn post_answer(inner: &HttpInner, answer: &AnswerDesc) -> Result<(), SignalingError> {
    let session = current_session(inner)?;
    let resp = inner
        .client
        .post(format!("{}/signaling/answer", inner.url))
        .header("Session-Id", &session)
        .json(answer)
        .send()
        .await?;
    check_status(resp)?;
    Ok(())
}

fn current_session(inner: &HttpInner) -> Result<String, SignalingError> {
    inner
        .session_id
        .lock()
        .clone()
        .ok_or_else(|| SignalingError::Transport("no active session".to_string()))
}

fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SignalingError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(SignalingError::Transport(format!(
            "HTTP {} from {}",
            resp.status(),
            resp.url()
        )))
    }
}

/// Server clock from the response Date header, as epoch milliseconds
fn parse_date_header(resp: &reqwest::Response) -> Result<i64, SignalingError> {
    let value = resp
        .headers()
        .get(reqwest::header::DATE)
        .ok_or_else(|| SignalingError::Protocol("missing Date header".to_string()))?;
    let text = value
        .to_str()
        .map_err(|e| SignalingError::Protocol(format!("Invalid Date header: {}", e)))?;
    let parsed = DateTime::parse_from_rfc2822(text)
        .map_err(|e| SignalingError::Protocol(format!("Invalid Date header: {}", e)))?;
    Ok(parsed.timestamp_millis())
}
