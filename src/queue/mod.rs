//! # Delivery Queue - Durable Offline Store
//!
//! At-least-one-attempt, bounded-retry, duplicate-safe message delivery
//! across application restarts and radio disconnects, without a server in
//! the loop.
//!
//! ## Stores
//!
//! Four sled trees back the queue:
//!
//! - **pending** — outbound messages awaiting transmission (plus failed
//!   ones kept for explicit resubmission), keyed by creation time so the
//!   drain loop sees them in order
//! - **sent** — successfully transmitted messages, kept for the retention
//!   window
//! - **received** — inbound messages, keyed by id for idempotent ingest
//! - **peers** — known mesh peers, merged by id
//!
//! ## Contract highlights
//!
//! - A message is never present in both the pending and sent stores;
//!   [`DeliveryQueue::mark_sent`] moves it in one cross-tree transaction.
//! - [`DeliveryQueue::record_failure`] caps retries; at the bound the
//!   message becomes `Failed`, a terminal state that only
//!   [`DeliveryQueue::resubmit`] leaves.
//! - Re-ingesting a known inbound id is a silent no-op, not an error.
//! - The queue never touches the radio: the drain loop calls an injected
//!   "attempt send" capability and reacts to its result.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionError;
use sled::Transactional;
use uuid::Uuid;

pub mod errors;
pub mod snapshot;

pub use errors::QueueError;
pub use snapshot::QueueSnapshot;

use crate::logutil::escape_log;

const TREE_PENDING: &str = "queue_pending";
const TREE_SENT: &str = "queue_sent";
const TREE_RECEIVED: &str = "queue_received";
const TREE_PEERS: &str = "queue_peers";

/// Retry bound before a message is parked as failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retention window for sent/received records.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

fn next_timestamp_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros() * 1000)
}

/// Payload classification, mirroring the wire frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Position,
    PeerInfo,
}

/// Delivery state of an outbound message. `Failed` is terminal until the
/// payload is explicitly resubmitted as a new message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Failed,
}

/// Outbound message awaiting transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: String,
    pub payload: Vec<u8>,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub status: PendingStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
}

/// Successfully transmitted message, kept for the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    pub payload: Vec<u8>,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
}

/// Inbound message. The id deduplicates: re-ingesting is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub id: String,
    pub from_peer: String,
    pub payload: Vec<u8>,
    pub kind: MessageKind,
    pub received_at: DateTime<Utc>,
    pub read: bool,
    pub is_tactical_event: bool,
}

/// Known mesh peer, merged by id on every sighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub alt: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl PeerRecord {
    /// Normalize a raw mesh node id to the display form (`!1234abcd` and
    /// plain numeric ids both become `ID-1234abcd`).
    pub fn normalize_id(raw: &str) -> String {
        if let Some(hex) = raw.strip_prefix('!') {
            format!("ID-{hex}")
        } else if raw.starts_with("ID-") {
            raw.to_string()
        } else {
            format!("ID-{raw}")
        }
    }

    /// Display id for a numeric node address.
    pub fn id_for_node(node_id: u32) -> String {
        format!("ID-{node_id:08x}")
    }
}

/// Derived, read-only store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending_count: usize,
    pub sent_count: usize,
    pub received_count: usize,
    pub peer_count: usize,
    pub failed_count: usize,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Helper builder so tests can easily create throwaway queues with custom
/// paths and retry bounds.
pub struct DeliveryQueueBuilder {
    path: PathBuf,
    max_retries: u32,
}

impl DeliveryQueueBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn open(self) -> Result<DeliveryQueue, QueueError> {
        DeliveryQueue::open_with_options(self.path, self.max_retries)
    }
}

/// Sled-backed persistence for outbound/inbound messages and known peers.
pub struct DeliveryQueue {
    _db: sled::Db,
    pending: sled::Tree,
    sent: sled::Tree,
    received: sled::Tree,
    peers: sled::Tree,
    max_retries: u32,
}

impl DeliveryQueue {
    /// Open (or create) the queue rooted at `path` with the default retry
    /// bound.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, QueueError> {
        Self::open_with_options(path, DEFAULT_MAX_RETRIES)
    }

    fn open_with_options<P: AsRef<Path>>(path: P, max_retries: u32) -> Result<Self, QueueError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let pending = db.open_tree(TREE_PENDING)?;
        let sent = db.open_tree(TREE_SENT)?;
        let received = db.open_tree(TREE_RECEIVED)?;
        let peers = db.open_tree(TREE_PEERS)?;
        Ok(Self {
            _db: db,
            pending,
            sent,
            received,
            peers,
            max_retries,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Creation-ordered pending key: zero-padded nanos plus the id so keys
    /// are unique even within one tick.
    fn pending_key(created_nanos: i64, id: &str) -> Vec<u8> {
        format!("{created_nanos:020}:{id}").into_bytes()
    }

    fn sent_key(sent_nanos: i64, id: &str) -> Vec<u8> {
        format!("{sent_nanos:020}:{id}").into_bytes()
    }

    fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, QueueError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: sled::IVec) -> Result<T, QueueError> {
        Ok(bincode::deserialize::<T>(&bytes)?)
    }

    /// Scan the pending tree for a message by id.
    fn find_pending(&self, id: &str) -> Result<Option<(Vec<u8>, PendingMessage)>, QueueError> {
        for entry in self.pending.iter() {
            let (key, value) = entry?;
            let msg: PendingMessage = Self::deserialize(value)?;
            if msg.id == id {
                return Ok(Some((key.to_vec(), msg)));
            }
        }
        Ok(None)
    }

    /// Durably store an outbound message. Always succeeds locally; the
    /// radio is not involved.
    pub fn enqueue(&self, payload: Vec<u8>, kind: MessageKind) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let msg = PendingMessage {
            id: id.clone(),
            payload,
            kind,
            created_at,
            status: PendingStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries,
            last_retry_at: None,
        };
        let key = Self::pending_key(next_timestamp_nanos(), &id);
        self.pending.insert(key, Self::serialize(&msg)?)?;
        self.pending.flush()?;
        debug!("enqueued {:?} message {}", kind, id);
        Ok(id)
    }

    /// Pending messages in creation order. Failed messages are excluded —
    /// they stay parked until explicitly resubmitted.
    pub fn list_pending(&self) -> Result<Vec<PendingMessage>, QueueError> {
        let mut out = Vec::new();
        for entry in self.pending.iter() {
            let (_, value) = entry?;
            let msg: PendingMessage = Self::deserialize(value)?;
            if msg.status == PendingStatus::Pending {
                out.push(msg);
            }
        }
        Ok(out)
    }

    /// Messages that exhausted their retries, awaiting explicit
    /// resubmission.
    pub fn list_failed(&self) -> Result<Vec<PendingMessage>, QueueError> {
        let mut out = Vec::new();
        for entry in self.pending.iter() {
            let (_, value) = entry?;
            let msg: PendingMessage = Self::deserialize(value)?;
            if msg.status == PendingStatus::Failed {
                out.push(msg);
            }
        }
        Ok(out)
    }

    /// Move a message from the pending store into the sent store. The two
    /// writes happen in one transaction so the message is never present in
    /// both (or in neither after a crash).
    pub fn mark_sent(&self, id: &str) -> Result<(), QueueError> {
        let (key, msg) = self
            .find_pending(id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let sent_at = Utc::now();
        let sent = SentMessage {
            id: msg.id.clone(),
            payload: msg.payload,
            kind: msg.kind,
            created_at: msg.created_at,
            sent_at,
        };
        let sent_key = Self::sent_key(next_timestamp_nanos(), &sent.id);
        let sent_bytes = Self::serialize(&sent)?;
        (&self.pending, &self.sent)
            .transaction(|(pending, sent_tree)| {
                pending.remove(key.as_slice())?;
                sent_tree.insert(sent_key.as_slice(), sent_bytes.as_slice())?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Storage(e) => QueueError::Sled(e),
                TransactionError::Abort(()) => {
                    QueueError::Internal("mark_sent transaction aborted".to_string())
                }
            })?;
        self.pending.flush()?;
        self.sent.flush()?;
        debug!("message {} marked sent", id);
        Ok(())
    }

    /// Record a failed send attempt. At the retry bound the message flips
    /// to `Failed` and disappears from [`DeliveryQueue::list_pending`].
    /// Returns the resulting status.
    pub fn record_failure(&self, id: &str) -> Result<PendingStatus, QueueError> {
        let (key, mut msg) = self
            .find_pending(id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        msg.retry_count = msg.retry_count.saturating_add(1).min(msg.max_retries);
        msg.last_retry_at = Some(Utc::now());
        if msg.retry_count >= msg.max_retries {
            msg.status = PendingStatus::Failed;
            warn!(
                "message {} failed permanently after {} attempts",
                id, msg.retry_count
            );
        }
        let status = msg.status;
        self.pending.insert(key, Self::serialize(&msg)?)?;
        self.pending.flush()?;
        Ok(status)
    }

    /// Re-enqueue a failed payload as a fresh message with a new id and a
    /// clean retry counter. The failed record is removed.
    pub fn resubmit(&self, id: &str) -> Result<String, QueueError> {
        let (key, msg) = self
            .find_pending(id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if msg.status != PendingStatus::Failed {
            return Err(QueueError::Internal(format!(
                "message {id} is not failed; resubmit applies to failed messages only"
            )));
        }
        self.pending.remove(key)?;
        let new_id = self.enqueue(msg.payload, msg.kind)?;
        info!("failed message {} resubmitted as {}", id, new_id);
        Ok(new_id)
    }

    /// Store an inbound message. Idempotent: a record with the same id is
    /// left untouched and `false` is returned.
    pub fn ingest(&self, msg: ReceivedMessage) -> Result<bool, QueueError> {
        if self.received.contains_key(msg.id.as_bytes())? {
            debug!("duplicate ingest of {} ignored", escape_log(&msg.id));
            return Ok(false);
        }
        self.received
            .insert(msg.id.as_bytes(), Self::serialize(&msg)?)?;
        self.received.flush()?;
        Ok(true)
    }

    /// Flip the read flag on a received message.
    pub fn mark_read(&self, id: &str) -> Result<(), QueueError> {
        let bytes = self
            .received
            .get(id.as_bytes())?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let mut msg: ReceivedMessage = Self::deserialize(bytes)?;
        msg.read = true;
        self.received.insert(id.as_bytes(), Self::serialize(&msg)?)?;
        self.received.flush()?;
        Ok(())
    }

    /// Inbound messages, newest first.
    pub fn list_received(&self) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut out = Vec::new();
        for entry in self.received.iter() {
            let (_, value) = entry?;
            out.push(Self::deserialize::<ReceivedMessage>(value)?);
        }
        out.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(out)
    }

    /// Sent messages in transmission order.
    pub fn list_sent(&self) -> Result<Vec<SentMessage>, QueueError> {
        let mut out = Vec::new();
        for entry in self.sent.iter() {
            let (_, value) = entry?;
            out.push(Self::deserialize::<SentMessage>(value)?);
        }
        Ok(out)
    }

    /// Merge a peer record by id. Fields present on the update win;
    /// `updated_at` is always refreshed.
    pub fn upsert_peer(&self, peer: PeerRecord) -> Result<(), QueueError> {
        let mut merged = match self.peers.get(peer.id.as_bytes())? {
            Some(bytes) => {
                let existing: PeerRecord = Self::deserialize(bytes)?;
                PeerRecord {
                    id: existing.id,
                    name: if peer.name.is_empty() {
                        existing.name
                    } else {
                        peer.name
                    },
                    role: peer.role.or(existing.role),
                    lat: peer.lat.or(existing.lat),
                    lon: peer.lon.or(existing.lon),
                    alt: peer.alt.or(existing.alt),
                    updated_at: Utc::now(),
                }
            }
            None => PeerRecord {
                updated_at: Utc::now(),
                ..peer
            },
        };
        if merged.name.is_empty() {
            merged.name = merged.id.clone();
        }
        self.peers
            .insert(merged.id.clone().into_bytes(), Self::serialize(&merged)?)?;
        self.peers.flush()?;
        Ok(())
    }

    pub fn get_peer(&self, id: &str) -> Result<Option<PeerRecord>, QueueError> {
        match self.peers.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    /// Known peers, most recently updated first.
    pub fn list_peers(&self) -> Result<Vec<PeerRecord>, QueueError> {
        let mut out = Vec::new();
        for entry in self.peers.iter() {
            let (_, value) = entry?;
            out.push(Self::deserialize::<PeerRecord>(value)?);
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    /// Delete sent/received records older than the retention window.
    /// Pending and failed messages are exempt; they must be resolved
    /// explicitly. Returns the number of deleted records.
    pub fn purge_older_than(&self, retention: Duration) -> Result<usize, QueueError> {
        let cutoff = Utc::now() - retention;
        let mut removed = 0usize;

        let mut stale_keys = Vec::new();
        for entry in self.sent.iter() {
            let (key, value) = entry?;
            let msg: SentMessage = Self::deserialize(value)?;
            if msg.sent_at < cutoff {
                stale_keys.push(key);
            }
        }
        for key in stale_keys {
            self.sent.remove(key)?;
            removed += 1;
        }

        let mut stale_keys = Vec::new();
        for entry in self.received.iter() {
            let (key, value) = entry?;
            let msg: ReceivedMessage = Self::deserialize(value)?;
            if msg.received_at < cutoff {
                stale_keys.push(key);
            }
        }
        for key in stale_keys {
            self.received.remove(key)?;
            removed += 1;
        }

        if removed > 0 {
            self.sent.flush()?;
            self.received.flush()?;
            info!("purged {} records past retention", removed);
        }
        Ok(removed)
    }

    /// Full dump of all four stores, for backup or device transfer.
    pub fn export_snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        let mut pending = Vec::new();
        for entry in self.pending.iter() {
            let (_, value) = entry?;
            pending.push(Self::deserialize::<PendingMessage>(value)?);
        }
        Ok(QueueSnapshot {
            exported_at: Utc::now(),
            pending,
            sent: self.list_sent()?,
            received: {
                let mut received = Vec::new();
                for entry in self.received.iter() {
                    let (_, value) = entry?;
                    received.push(Self::deserialize::<ReceivedMessage>(value)?);
                }
                received
            },
            peers: self.list_peers()?,
        })
    }

    /// Replace all four stores with a snapshot's contents.
    pub fn import_snapshot(&self, snapshot: &QueueSnapshot) -> Result<(), QueueError> {
        self.pending.clear()?;
        self.sent.clear()?;
        self.received.clear()?;
        self.peers.clear()?;

        for msg in &snapshot.pending {
            let nanos = msg
                .created_at
                .timestamp_nanos_opt()
                .unwrap_or_else(next_timestamp_nanos);
            self.pending
                .insert(Self::pending_key(nanos, &msg.id), Self::serialize(msg)?)?;
        }
        for msg in &snapshot.sent {
            let nanos = msg
                .sent_at
                .timestamp_nanos_opt()
                .unwrap_or_else(next_timestamp_nanos);
            self.sent
                .insert(Self::sent_key(nanos, &msg.id), Self::serialize(msg)?)?;
        }
        for msg in &snapshot.received {
            self.received
                .insert(msg.id.as_bytes(), Self::serialize(msg)?)?;
        }
        for peer in &snapshot.peers {
            self.peers
                .insert(peer.id.clone().into_bytes(), Self::serialize(peer)?)?;
        }

        self.pending.flush()?;
        self.sent.flush()?;
        self.received.flush()?;
        self.peers.flush()?;
        info!(
            "imported snapshot: {} pending, {} sent, {} received, {} peers",
            snapshot.pending.len(),
            snapshot.sent.len(),
            snapshot.received.len(),
            snapshot.peers.len()
        );
        Ok(())
    }

    /// Derived store counters.
    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut pending_count = 0usize;
        let mut failed_count = 0usize;
        for entry in self.pending.iter() {
            let (_, value) = entry?;
            let msg: PendingMessage = Self::deserialize(value)?;
            match msg.status {
                PendingStatus::Pending => pending_count += 1,
                PendingStatus::Failed => failed_count += 1,
            }
        }
        Ok(QueueStats {
            pending_count,
            sent_count: self.sent.len(),
            received_count: self.received.len(),
            peer_count: self.peers.len(),
            failed_count,
        })
    }

    /// One drain pass: attempt every pending message in creation order via
    /// the injected send capability. A failure on one message records it
    /// and moves on; the pass never halts early. The caller is responsible
    /// for only draining while the transport reports connected.
    pub async fn drain_once(
        &self,
        sender: &mut dyn SendAttempt,
    ) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport::default();
        for msg in self.list_pending()? {
            let id = msg.id.clone();
            report.attempted += 1;
            match sender.attempt(&msg).await {
                Ok(()) => {
                    self.mark_sent(&id)?;
                    report.sent += 1;
                }
                Err(e) => {
                    debug!("send attempt for {} failed: {}", id, e);
                    self.record_failure(&id)?;
                    report.failed += 1;
                }
            }
        }
        if report.attempted > 0 {
            debug!(
                "drain pass: {} attempted, {} sent, {} failed",
                report.attempted, report.sent, report.failed
            );
        }
        Ok(report)
    }
}

/// Injected "attempt send" capability. The queue decides *what* to send
/// and *when* to give up; the implementor owns *how* bytes reach the
/// radio. Errors are recorded as failed attempts, never retried inline.
#[async_trait::async_trait]
pub trait SendAttempt {
    async fn attempt(&mut self, msg: &PendingMessage) -> anyhow::Result<()>;
}
