//! # Radio Transport Client
//!
//! Owns the single physical link to a mesh radio and exposes the
//! connect/send/receive primitives the rest of the crate builds on.
//!
//! ## Responsibilities
//!
//! - **Connection state machine**: Disconnected → Discovering → Connecting →
//!   ServiceBound → Connected, with an Error state that only a fresh
//!   [`RadioClient::connect`] leaves.
//! - **Framing**: encodes outgoing [`Frame`]s (12-byte header + payload) and
//!   splits them into ≤512-byte chunks written in order.
//! - **Inbound decode**: turns notification payloads into typed frames;
//!   unrecognized kind tags are logged and dropped, never panicking the
//!   handler chain.
//! - **Observers**: frame and status handlers with deterministic
//!   unregistration, run synchronously in arrival order.
//!
//! The client performs **no automatic retry**; retry policy lives entirely
//! in the delivery queue. Durable storage is also the queue's job — the
//! peer table and recent-frame list kept here are bounded convenience
//! caches only.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod frame;
pub mod link;
#[cfg(feature = "serial")]
pub mod serial;

pub use frame::{Frame, FrameKind, FramePayload, BROADCAST_ID, HEADER_LEN, MAX_CHUNK_SIZE};
pub use link::{RadioDevice, RadioLink, ServiceProfile, CURRENT_PROFILE, LEGACY_PROFILE};

use crate::logutil::{escape_log, hex_snippet};

/// Cap on the in-memory recent-frame list. Oldest entries are evicted
/// first; durable history lives in the delivery queue.
pub const RECENT_HISTORY_LIMIT: usize = 1000;

/// Transport-level failures, surfaced to the immediate caller and via
/// status events. Never retried at this layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable")]
    Unavailable,
    #[error("not connected")]
    NotConnected,
    #[error("device selection failed: {0}")]
    DeviceSelection(String),
    #[error("service resolution failed: {0}")]
    ServiceResolution(String),
    #[error("notification subscribe failed: {0}")]
    Subscribe(String),
    #[error("radio write failed: {0}")]
    Write(String),
}

/// Connection state machine. `Error` is only left by a fresh `connect()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Discovering,
    Connecting,
    ServiceBound,
    Connected,
    Error(String),
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// Ordered status events emitted while connecting and on failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// User-mediated device selection is in progress.
    Requesting,
    Connecting,
    ServiceBound,
    Connected,
    Disconnected,
    Failed { reason: String },
}

/// Handle returned by `on_frame`/`on_status`; pass it back to the matching
/// `unsubscribe_*` call to deterministically remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct SubscriberSet<T> {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Box<dyn FnMut(&T) + Send>)>,
}

impl<T> SubscriberSet<T> {
    fn new() -> Self {
        Self {
            next_id: 1,
            handlers: Vec::new(),
        }
    }

    fn subscribe(&mut self, handler: Box<dyn FnMut(&T) + Send>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, handler));
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(sid, _)| *sid != id);
        self.handlers.len() != before
    }

    /// Run every handler synchronously, in registration order.
    fn emit(&mut self, value: &T) {
        for (_, handler) in self.handlers.iter_mut() {
            handler(value);
        }
    }
}

/// Peer data gleaned from position and peer-info frames. Convenience cache
/// only; the durable peer store is in the delivery queue.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub node_id: u32,
    pub name: Option<String>,
    pub lat: Option<f32>,
    pub lon: Option<f32>,
    pub altitude: Option<f32>,
    pub last_seen: DateTime<Utc>,
}

/// Recently received frame with arrival timestamp.
#[derive(Debug, Clone)]
pub struct RecentFrame {
    pub frame: Frame,
    pub received_at: DateTime<Utc>,
}

/// Client for one mesh radio. Exactly one active connection per instance;
/// never two concurrent connect attempts.
pub struct RadioClient {
    link: Box<dyn RadioLink>,
    state: LinkState,
    device: Option<RadioDevice>,
    source_id: u32,
    inbound: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    frame_subs: SubscriberSet<Frame>,
    status_subs: SubscriberSet<LinkStatus>,
    peers: HashMap<u32, PeerSnapshot>,
    recent: VecDeque<RecentFrame>,
}

impl RadioClient {
    /// Create a client over the given link. `source_id` is stamped into the
    /// header of every outgoing frame.
    pub fn new(link: Box<dyn RadioLink>, source_id: u32) -> Self {
        Self {
            link,
            state: LinkState::Disconnected,
            device: None,
            source_id,
            inbound: None,
            frame_subs: SubscriberSet::new(),
            status_subs: SubscriberSet::new(),
            peers: HashMap::new(),
            recent: VecDeque::new(),
        }
    }

    /// Capability probe. When false, `connect`/`send` fail fast with
    /// [`TransportError::Unavailable`].
    pub fn is_supported(&self) -> bool {
        self.link.is_available()
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn device(&self) -> Option<&RadioDevice> {
        self.device.as_ref()
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    /// Register a frame handler. Handlers run synchronously in frame
    /// arrival order.
    pub fn on_frame<F: FnMut(&Frame) + Send + 'static>(&mut self, handler: F) -> SubscriptionId {
        self.frame_subs.subscribe(Box::new(handler))
    }

    pub fn unsubscribe_frame(&mut self, id: SubscriptionId) -> bool {
        self.frame_subs.unsubscribe(id)
    }

    /// Register a status handler.
    pub fn on_status<F: FnMut(&LinkStatus) + Send + 'static>(
        &mut self,
        handler: F,
    ) -> SubscriptionId {
        self.status_subs.subscribe(Box::new(handler))
    }

    pub fn unsubscribe_status(&mut self, id: SubscriptionId) -> bool {
        self.status_subs.unsubscribe(id)
    }

    fn set_state(&mut self, state: LinkState) {
        let status = match &state {
            LinkState::Disconnected => Some(LinkStatus::Disconnected),
            LinkState::Discovering => Some(LinkStatus::Requesting),
            LinkState::Connecting => Some(LinkStatus::Connecting),
            LinkState::ServiceBound => Some(LinkStatus::ServiceBound),
            LinkState::Connected => Some(LinkStatus::Connected),
            LinkState::Error(reason) => Some(LinkStatus::Failed {
                reason: reason.clone(),
            }),
        };
        self.state = state;
        if let Some(status) = status {
            self.status_subs.emit(&status);
        }
    }

    fn fail_connect(&mut self, err: TransportError) -> TransportError {
        self.set_state(LinkState::Error(err.to_string()));
        err
    }

    /// Establish the link: device selection, service binding (current
    /// profile first, legacy fallback), notification subscription.
    ///
    /// Calling this while a connect is already in flight or the link is up
    /// is a no-op that returns the current state.
    pub async fn connect(&mut self) -> Result<LinkState, TransportError> {
        match self.state {
            LinkState::Discovering
            | LinkState::Connecting
            | LinkState::ServiceBound
            | LinkState::Connected => {
                debug!("connect() ignored, state is {:?}", self.state);
                return Ok(self.state.clone());
            }
            LinkState::Disconnected | LinkState::Error(_) => {}
        }

        if !self.link.is_available() {
            return Err(self.fail_connect(TransportError::Unavailable));
        }

        self.set_state(LinkState::Discovering);
        let device = match self.link.request_device().await {
            Ok(device) => device,
            Err(e) => return Err(self.fail_connect(e)),
        };
        info!("radio selected: {} ({})", escape_log(&device.name), device.id);
        self.device = Some(device);

        self.set_state(LinkState::Connecting);
        if let Err(first) = self.link.bind(&CURRENT_PROFILE).await {
            debug!("current service profile not resolved ({first}), trying legacy profile");
            if let Err(e) = self.link.bind(&LEGACY_PROFILE).await {
                debug!("legacy service profile not resolved ({e})");
                return Err(self.fail_connect(e));
            }
        }
        self.set_state(LinkState::ServiceBound);

        match self.link.subscribe().await {
            Ok(rx) => self.inbound = Some(rx),
            Err(e) => return Err(self.fail_connect(e)),
        }

        self.set_state(LinkState::Connected);
        Ok(self.state.clone())
    }

    /// Idempotent teardown. Reachable from any non-terminal state; an
    /// `Error` state is kept until the next `connect()`.
    pub async fn disconnect(&mut self) {
        self.inbound = None;
        self.link.close().await;
        self.device = None;
        match self.state {
            LinkState::Disconnected | LinkState::Error(_) => {}
            _ => self.set_state(LinkState::Disconnected),
        }
    }

    /// Send one frame: encode, chunk to ≤[`MAX_CHUNK_SIZE`] bytes, write
    /// sequentially. Fails atomically as a single logical operation — a
    /// chunk error fails the whole send, and retry (of the whole frame) is
    /// the delivery queue's decision.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        if !self.link.is_available() {
            return Err(TransportError::Unavailable);
        }
        if !self.state.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let encoded = frame.encode();
        let total = encoded.len().div_ceil(MAX_CHUNK_SIZE);
        for (i, chunk) in Frame::chunks(&encoded).enumerate() {
            if let Err(e) = self.link.write_chunk(chunk).await {
                warn!(
                    "write failed on chunk {}/{} of {:?} frame: {}",
                    i + 1,
                    total,
                    frame.kind(),
                    e
                );
                self.status_subs.emit(&LinkStatus::Failed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        }
        debug!(
            "sent {:?} frame to {:#010x} in {} chunk(s)",
            frame.kind(),
            frame.destination,
            total
        );
        Ok(())
    }

    /// Take ownership of the inbound notification stream. The service loop
    /// awaits this receiver and feeds each buffer back through
    /// [`RadioClient::handle_notification`].
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.inbound.take()
    }

    /// Decode one notification payload and dispatch it. Malformed input is
    /// logged and dropped; the handler chain never sees it and the receive
    /// loop never dies. Returns the decoded frame for callers that route
    /// inbound traffic further.
    pub fn handle_notification(&mut self, bytes: &[u8]) -> Option<Frame> {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    "dropping inbound notification ({} bytes, {}…): {}",
                    bytes.len(),
                    hex_snippet(bytes, 16),
                    e
                );
                return None;
            }
        };
        self.note_peer(&frame);
        self.recent.push_back(RecentFrame {
            frame: frame.clone(),
            received_at: Utc::now(),
        });
        while self.recent.len() > RECENT_HISTORY_LIMIT {
            self.recent.pop_front();
        }
        self.frame_subs.emit(&frame);
        Some(frame)
    }

    fn note_peer(&mut self, frame: &Frame) {
        let now = Utc::now();
        let entry = self
            .peers
            .entry(frame.source)
            .or_insert_with(|| PeerSnapshot {
                node_id: frame.source,
                name: None,
                lat: None,
                lon: None,
                altitude: None,
                last_seen: now,
            });
        entry.last_seen = now;
        match &frame.payload {
            FramePayload::PeerInfo { name } => entry.name = Some(name.clone()),
            FramePayload::Position { lat, lon, altitude } => {
                entry.lat = Some(*lat);
                entry.lon = Some(*lon);
                entry.altitude = Some(*altitude);
            }
            FramePayload::Text(_) => {}
        }
    }

    /// Peers seen on the link since connect, keyed by node id.
    pub fn peers(&self) -> &HashMap<u32, PeerSnapshot> {
        &self.peers
    }

    /// Recent inbound frames, oldest first, capped at
    /// [`RECENT_HISTORY_LIMIT`].
    pub fn recent(&self) -> &VecDeque<RecentFrame> {
        &self.recent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted link: records written chunks, can refuse binds or writes.
    struct ScriptedLink {
        available: bool,
        reject_current_profile: bool,
        fail_writes: Arc<AtomicBool>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        bound: Arc<Mutex<Vec<ServiceProfile>>>,
        notify_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    }

    impl ScriptedLink {
        fn new() -> Self {
            Self {
                available: true,
                reject_current_profile: false,
                fail_writes: Arc::new(AtomicBool::new(false)),
                written: Arc::new(Mutex::new(Vec::new())),
                bound: Arc::new(Mutex::new(Vec::new())),
                notify_tx: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl RadioLink for ScriptedLink {
        fn is_available(&self) -> bool {
            self.available
        }

        async fn request_device(&mut self) -> Result<RadioDevice, TransportError> {
            Ok(RadioDevice {
                id: "mock-0".into(),
                name: "Scripted Radio".into(),
            })
        }

        async fn bind(&mut self, profile: &ServiceProfile) -> Result<(), TransportError> {
            if self.reject_current_profile && *profile == CURRENT_PROFILE {
                return Err(TransportError::ServiceResolution(
                    "current profile absent".into(),
                ));
            }
            self.bound.lock().unwrap().push(*profile);
            Ok(())
        }

        async fn subscribe(
            &mut self,
        ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, TransportError> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.notify_tx = Some(tx);
            Ok(rx)
        }

        async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(TransportError::Write("radio buffer full".into()));
            }
            self.written.lock().unwrap().push(chunk.to_vec());
            Ok(())
        }

        async fn close(&mut self) {
            self.notify_tx = None;
        }
    }

    #[tokio::test]
    async fn connect_walks_ordered_states() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut client = RadioClient::new(Box::new(ScriptedLink::new()), 42);
        client.on_status(move |s| seen2.lock().unwrap().push(s.clone()));
        let state = client.connect().await.unwrap();
        assert_eq!(state, LinkState::Connected);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                LinkStatus::Requesting,
                LinkStatus::Connecting,
                LinkStatus::ServiceBound,
                LinkStatus::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn connect_twice_is_a_noop() {
        let mut client = RadioClient::new(Box::new(ScriptedLink::new()), 42);
        client.connect().await.unwrap();
        let again = client.connect().await.unwrap();
        assert_eq!(again, LinkState::Connected);
    }

    #[tokio::test]
    async fn legacy_profile_fallback() {
        let mut link = ScriptedLink::new();
        link.reject_current_profile = true;
        let bound = link.bound.clone();
        let mut client = RadioClient::new(Box::new(link), 42);
        client.connect().await.unwrap();
        assert_eq!(*bound.lock().unwrap(), vec![LEGACY_PROFILE]);
    }

    #[tokio::test]
    async fn unavailable_link_fails_fast() {
        let mut link = ScriptedLink::new();
        link.available = false;
        let mut client = RadioClient::new(Box::new(link), 42);
        match client.connect().await {
            Err(TransportError::Unavailable) => {}
            other => panic!("expected Unavailable, got {:?}", other),
        }
        assert!(matches!(client.state(), LinkState::Error(_)));
    }

    #[tokio::test]
    async fn thousand_byte_payload_makes_two_writes() {
        let link = ScriptedLink::new();
        let written = link.written.clone();
        let mut client = RadioClient::new(Box::new(link), 42);
        client.connect().await.unwrap();
        let frame = Frame::text(42, "x".repeat(1000));
        client.send(&frame).await.unwrap();
        let chunks = written.lock().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), MAX_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected() {
        let mut client = RadioClient::new(Box::new(ScriptedLink::new()), 42);
        let frame = Frame::text(42, "hi");
        assert!(matches!(
            client.send(&frame).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn write_failure_fails_whole_send_and_emits_status() {
        let link = ScriptedLink::new();
        let fail = link.fail_writes.clone();
        let failures = Arc::new(AtomicUsize::new(0));
        let failures2 = failures.clone();
        let mut client = RadioClient::new(Box::new(link), 42);
        client.on_status(move |s| {
            if matches!(s, LinkStatus::Failed { .. }) {
                failures2.fetch_add(1, Ordering::SeqCst);
            }
        });
        client.connect().await.unwrap();
        fail.store(true, Ordering::SeqCst);
        assert!(client.send(&Frame::text(42, "hi")).await.is_err());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_notification_is_dropped_not_fatal() {
        let counted = Arc::new(AtomicUsize::new(0));
        let counted2 = counted.clone();
        let mut client = RadioClient::new(Box::new(ScriptedLink::new()), 42);
        client.on_frame(move |_| {
            counted2.fetch_add(1, Ordering::SeqCst);
        });
        client.connect().await.unwrap();
        assert!(client.handle_notification(&[0u8; 3]).is_none());
        let good = Frame::text(7, "ok").encode();
        assert!(client.handle_notification(&good).is_some());
        assert_eq!(counted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribed_handler_stops_firing() {
        let counted = Arc::new(AtomicUsize::new(0));
        let counted2 = counted.clone();
        let mut client = RadioClient::new(Box::new(ScriptedLink::new()), 42);
        let sub = client.on_frame(move |_| {
            counted2.fetch_add(1, Ordering::SeqCst);
        });
        client.connect().await.unwrap();
        client.handle_notification(&Frame::text(7, "a").encode());
        assert!(client.unsubscribe_frame(sub));
        client.handle_notification(&Frame::text(7, "b").encode());
        assert_eq!(counted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn peer_cache_tracks_position_and_name() {
        let mut client = RadioClient::new(Box::new(ScriptedLink::new()), 42);
        client.connect().await.unwrap();
        client.handle_notification(&Frame::peer_info(7, "Bravo-2").encode());
        client.handle_notification(&Frame::position(7, 47.0, 8.0, 420.0).encode());
        let peer = client.peers().get(&7).expect("peer cached");
        assert_eq!(peer.name.as_deref(), Some("Bravo-2"));
        assert_eq!(peer.lat, Some(47.0));
    }

    #[tokio::test]
    async fn recent_history_is_bounded() {
        let mut client = RadioClient::new(Box::new(ScriptedLink::new()), 42);
        client.connect().await.unwrap();
        for i in 0..(RECENT_HISTORY_LIMIT + 10) {
            client.handle_notification(&Frame::text(7, format!("m{i}")).encode());
        }
        assert_eq!(client.recent().len(), RECENT_HISTORY_LIMIT);
        match &client.recent().front().unwrap().frame.payload {
            FramePayload::Text(t) => assert_eq!(t, "m10"),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
