//! Snapshot files for backup and device transfer.
//!
//! A snapshot is the full contents of the four queue stores serialized as
//! gzipped JSON. A SHA-256 checksum travels alongside the file so a
//! transfer can be verified before importing.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::QueueError;
use super::{PeerRecord, PendingMessage, ReceivedMessage, SentMessage};

/// Full dump of all four stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub exported_at: DateTime<Utc>,
    pub pending: Vec<PendingMessage>,
    pub sent: Vec<SentMessage>,
    pub received: Vec<ReceivedMessage>,
    pub peers: Vec<PeerRecord>,
}

/// Write a snapshot as gzipped JSON. Returns the SHA-256 checksum of the
/// written file.
pub fn write_snapshot_file(path: &Path, snapshot: &QueueSnapshot) -> Result<String, QueueError> {
    let json = serde_json::to_vec(snapshot)?;
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(&json)?;
    // Finish and flush before calculating the checksum
    encoder.finish()?;
    checksum_of(path)
}

/// Read a snapshot file back. Returns the snapshot and the file's SHA-256
/// checksum for comparison against the exporting side.
pub fn read_snapshot_file(path: &Path) -> Result<(QueueSnapshot, String), QueueError> {
    let checksum = checksum_of(path)?;
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    let snapshot: QueueSnapshot = serde_json::from_slice(&json)?;
    Ok((snapshot, checksum))
}

/// SHA-256 checksum of a file, streamed.
fn checksum_of(path: &Path) -> Result<String, QueueError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
