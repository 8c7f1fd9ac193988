//! # Mesh Service - Composition Layer
//!
//! Owns one [`RadioClient`] and one [`DeliveryQueue`] and wires the data
//! flow between them:
//!
//! - Outbound: UI/CLI → [`MeshService::enqueue_event`] (CoT encode) or
//!   [`MeshService::enqueue_text`] → durable queue → periodic drain →
//!   radio, only while the link reports connected.
//! - Inbound: radio notification → frame decode → idempotent ingest (with
//!   tactical-event sniffing on text payloads) → peer store upsert for
//!   position and peer-info frames.
//!
//! Everything runs on one cooperative scheduler; the loop multiplexes the
//! drain interval, the notification stream, a slow purge tick and the
//! shutdown signal with `select!`. A lost notification stream is treated
//! as link loss: the client is torn down and draining stops until the
//! caller reconnects.

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::cot::{self, CotEvent};
use crate::logutil::escape_log;
use crate::queue::{
    DeliveryQueue, MessageKind, PeerRecord, PendingMessage, ReceivedMessage, SendAttempt,
};
use crate::transport::{Frame, FramePayload, LinkState, LinkStatus, RadioClient, TransportError};

/// Seconds between retention purges.
const PURGE_INTERVAL_SECS: u64 = 3600;

/// Adapter giving the queue's drain pass send access to the radio client.
struct RadioSender<'a> {
    client: &'a mut RadioClient,
}

#[async_trait::async_trait]
impl SendAttempt for RadioSender<'_> {
    async fn attempt(&mut self, msg: &PendingMessage) -> Result<()> {
        let frame = frame_for_pending(self.client.source_id(), msg)?;
        self.client.send(&frame).await?;
        Ok(())
    }
}

/// Rebuild a wire frame from a queued message.
fn frame_for_pending(source: u32, msg: &PendingMessage) -> Result<Frame> {
    match msg.kind {
        MessageKind::Text => {
            let text = String::from_utf8(msg.payload.clone())
                .map_err(|e| anyhow!("queued text message {} is not UTF-8: {}", msg.id, e))?;
            Ok(Frame::text(source, text))
        }
        MessageKind::Position => {
            let p = &msg.payload;
            if p.len() != 12 {
                return Err(anyhow!(
                    "queued position message {} has {} payload bytes, expected 12",
                    msg.id,
                    p.len()
                ));
            }
            Ok(Frame::position(
                source,
                f32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                f32::from_le_bytes([p[4], p[5], p[6], p[7]]),
                f32::from_le_bytes([p[8], p[9], p[10], p[11]]),
            ))
        }
        MessageKind::PeerInfo => {
            let name = String::from_utf8(msg.payload.clone())
                .map_err(|e| anyhow!("queued peer info {} is not UTF-8: {}", msg.id, e))?;
            Ok(Frame::peer_info(source, name))
        }
    }
}

/// Stable inbound message id: a digest of the whole frame, so the same
/// frame delivered twice dedups in the received store.
fn inbound_message_id(frame: &Frame) -> String {
    let digest = Sha256::digest(frame.encode());
    let hex: String = digest
        .iter()
        .take(6)
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("msg-{hex}")
}

/// Position sanity check before importing into the peer store: in range
/// and not the (0, 0) "no fix yet" report.
fn plausible_position(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) && !(lat == 0.0 && lon == 0.0)
}

fn kind_for_payload(payload: &FramePayload) -> MessageKind {
    match payload {
        FramePayload::Text(_) => MessageKind::Text,
        FramePayload::Position { .. } => MessageKind::Position,
        FramePayload::PeerInfo { .. } => MessageKind::PeerInfo,
    }
}

/// The off-grid messaging service: radio client + delivery queue + codec
/// routing, driven by one cooperative loop.
pub struct MeshService {
    client: RadioClient,
    queue: DeliveryQueue,
    drain_interval: std::time::Duration,
    retention: chrono::Duration,
}

impl MeshService {
    /// Wire a client and a queue together under the given configuration.
    pub fn new(mut client: RadioClient, queue: DeliveryQueue, config: &Config) -> Self {
        client.on_status(|status| match status {
            LinkStatus::Failed { reason } => warn!("link status: failed ({reason})"),
            other => info!("link status: {other:?}"),
        });
        Self {
            client,
            queue,
            drain_interval: std::time::Duration::from_secs(config.queue.drain_interval_secs),
            retention: chrono::Duration::days(config.queue.retention_days),
        }
    }

    pub fn client(&self) -> &RadioClient {
        &self.client
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Bring the radio link up. Safe to call again after link loss.
    pub async fn connect(&mut self) -> Result<LinkState, TransportError> {
        self.client.connect().await
    }

    pub async fn disconnect(&mut self) {
        self.client.disconnect().await;
    }

    /// Queue a chat line for delivery. Works offline; the drain loop picks
    /// it up once connected.
    pub fn enqueue_text(&self, text: &str) -> Result<String> {
        Ok(self
            .queue
            .enqueue(text.as_bytes().to_vec(), MessageKind::Text)?)
    }

    /// Encode a tactical event and queue its XML for delivery.
    pub fn enqueue_event(&self, event: &CotEvent) -> Result<String> {
        let xml = event.to_xml();
        debug!("queueing tactical event {}", escape_log(&event.uid));
        Ok(self.queue.enqueue(xml.into_bytes(), MessageKind::Text)?)
    }

    /// Queue our own position report.
    pub fn enqueue_position(&self, lat: f32, lon: f32, altitude: f32) -> Result<String> {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&lat.to_le_bytes());
        payload.extend_from_slice(&lon.to_le_bytes());
        payload.extend_from_slice(&altitude.to_le_bytes());
        Ok(self.queue.enqueue(payload, MessageKind::Position)?)
    }

    /// One drain pass, if connected. Exposed for tests and for callers
    /// that want an immediate flush besides the periodic one.
    pub async fn drain(&mut self) -> Result<crate::queue::DrainReport> {
        if !self.client.state().is_connected() {
            debug!("drain skipped, link not connected");
            return Ok(crate::queue::DrainReport::default());
        }
        let mut sender = RadioSender {
            client: &mut self.client,
        };
        Ok(self.queue.drain_once(&mut sender).await?)
    }

    /// Route one decoded inbound frame into the durable stores: idempotent
    /// ingest, tactical sniffing on text, peer upsert from position and
    /// peer-info payloads.
    pub fn ingest_frame(&self, frame: &Frame) {
        let peer_id = PeerRecord::id_for_node(frame.source);
        let msg = ReceivedMessage {
            id: inbound_message_id(frame),
            from_peer: peer_id.clone(),
            payload: match &frame.payload {
                FramePayload::Text(text) => text.as_bytes().to_vec(),
                FramePayload::Position { lat, lon, altitude } => {
                    let mut p = Vec::with_capacity(12);
                    p.extend_from_slice(&lat.to_le_bytes());
                    p.extend_from_slice(&lon.to_le_bytes());
                    p.extend_from_slice(&altitude.to_le_bytes());
                    p
                }
                FramePayload::PeerInfo { name } => name.as_bytes().to_vec(),
            },
            kind: kind_for_payload(&frame.payload),
            received_at: Utc::now(),
            read: false,
            is_tactical_event: match &frame.payload {
                FramePayload::Text(text) => cot::looks_like_tactical_message(text),
                _ => false,
            },
        };
        let is_tactical = msg.is_tactical_event;

        let fresh = match self.queue.ingest(msg) {
            Ok(fresh) => fresh,
            Err(e) => {
                error!("failed to store inbound message: {e}");
                return;
            }
        };
        if !fresh {
            return;
        }

        match &frame.payload {
            FramePayload::Text(text) => {
                if is_tactical {
                    match CotEvent::from_xml(text) {
                        Some(event) => info!(
                            "tactical event {} ({}) from {}",
                            escape_log(&event.uid),
                            escape_log(&event.cot_type),
                            peer_id
                        ),
                        None => debug!("tactical-looking payload from {} did not decode", peer_id),
                    }
                } else {
                    info!("message from {}: {}", peer_id, escape_log(text));
                }
            }
            FramePayload::Position { lat, lon, altitude } => {
                let (lat, lon, alt) = (*lat as f64, *lon as f64, *altitude as f64);
                if plausible_position(lat, lon) {
                    if let Err(e) = self.queue.upsert_peer(PeerRecord {
                        id: peer_id.clone(),
                        name: String::new(),
                        role: None,
                        lat: Some(lat),
                        lon: Some(lon),
                        alt: Some(alt),
                        updated_at: Utc::now(),
                    }) {
                        error!("failed to update peer {}: {}", peer_id, e);
                    } else {
                        info!("peer {} @ {:.5}, {:.5}", peer_id, lat, lon);
                    }
                } else {
                    debug!("implausible position from {} dropped", peer_id);
                }
            }
            FramePayload::PeerInfo { name } => {
                if let Err(e) = self.queue.upsert_peer(PeerRecord {
                    id: peer_id.clone(),
                    name: name.clone(),
                    role: None,
                    lat: None,
                    lon: None,
                    alt: None,
                    updated_at: Utc::now(),
                }) {
                    error!("failed to update peer {}: {}", peer_id, e);
                }
            }
        }
    }

    /// Run until interrupted: periodic drain while connected, inbound
    /// routing, hourly retention purge.
    pub async fn run(&mut self) -> Result<()> {
        if let Ok(removed) = self.queue.purge_older_than(self.retention) {
            if removed > 0 {
                info!("startup purge removed {removed} stale records");
            }
        }

        let mut inbound = self.client.take_inbound();
        let mut drain_tick = tokio::time::interval(self.drain_interval);
        drain_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut purge_tick =
            tokio::time::interval(std::time::Duration::from_secs(PURGE_INTERVAL_SECS));
        purge_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick fires immediately; consume it so the
        // startup purge is not doubled.
        purge_tick.tick().await;

        info!(
            "service loop running (drain every {}s)",
            self.drain_interval.as_secs()
        );
        loop {
            tokio::select! {
                _ = drain_tick.tick() => {
                    if let Err(e) = self.drain().await {
                        error!("drain pass failed: {e}");
                    }
                }
                _ = purge_tick.tick() => {
                    if let Err(e) = self.queue.purge_older_than(self.retention) {
                        error!("retention purge failed: {e}");
                    }
                }
                notification = recv_or_pending(&mut inbound) => {
                    match notification {
                        Some(bytes) => {
                            if let Some(frame) = self.client.handle_notification(&bytes) {
                                self.ingest_frame(&frame);
                            }
                        }
                        None => {
                            warn!("notification stream closed, treating as link loss");
                            inbound = None;
                            self.client.disconnect().await;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        self.client.disconnect().await;
        Ok(())
    }
}

/// Await the next notification, or park forever when the stream is gone
/// (drain and purge ticks keep the loop alive).
async fn recv_or_pending(
    inbound: &mut Option<tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>>,
) -> Option<Vec<u8>> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_round_trips_back_to_frames() {
        let msg = PendingMessage {
            id: "m1".to_string(),
            payload: b"hello".to_vec(),
            kind: MessageKind::Text,
            created_at: Utc::now(),
            status: crate::queue::PendingStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            last_retry_at: None,
        };
        let frame = frame_for_pending(7, &msg).unwrap();
        assert_eq!(frame.source, 7);
        assert_eq!(frame.payload, FramePayload::Text("hello".to_string()));

        let mut pos = msg.clone();
        pos.kind = MessageKind::Position;
        pos.payload = {
            let mut p = Vec::new();
            p.extend_from_slice(&47.5f32.to_le_bytes());
            p.extend_from_slice(&8.5f32.to_le_bytes());
            p.extend_from_slice(&500.0f32.to_le_bytes());
            p
        };
        let frame = frame_for_pending(7, &pos).unwrap();
        assert!(matches!(
            frame.payload,
            FramePayload::Position { lat, .. } if (lat - 47.5).abs() < 1e-6
        ));

        let mut bad = pos;
        bad.payload = vec![1, 2, 3];
        assert!(frame_for_pending(7, &bad).is_err());
    }

    #[test]
    fn inbound_ids_are_stable_and_distinct() {
        let a = Frame::text(7, "hello");
        let b = Frame::text(7, "hello");
        let c = Frame::text(8, "hello");
        assert_eq!(inbound_message_id(&a), inbound_message_id(&b));
        assert_ne!(inbound_message_id(&a), inbound_message_id(&c));
        assert!(inbound_message_id(&a).starts_with("msg-"));
    }

    #[test]
    fn position_plausibility() {
        assert!(plausible_position(47.0, 8.0));
        assert!(plausible_position(-90.0, 180.0));
        assert!(!plausible_position(0.0, 0.0));
        assert!(!plausible_position(91.0, 8.0));
        assert!(!plausible_position(47.0, -181.0));
    }
}
