//! The physical radio link seam.
//!
//! The transport client drives a mesh radio through this trait rather than
//! talking to hardware directly, so the connection state machine, chunking
//! and retry policy can be exercised against scripted links in tests. The
//! shipped implementation is [`super::serial::SerialLink`]; a BLE link
//! satisfies the same contract.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::{uuid, Uuid};

use super::TransportError;

/// GATT-style service profile: the logical service plus its outbound
/// (write) and inbound (notify) characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceProfile {
    pub service: Uuid,
    pub write: Uuid,
    pub notify: Uuid,
}

/// Profile advertised by current radio firmware.
pub const CURRENT_PROFILE: ServiceProfile = ServiceProfile {
    service: uuid!("6ba1b218-15a8-461f-9fa8-5dcae273eafd"),
    write: uuid!("f75c76d2-129e-4dad-a1dd-7866124401e7"),
    notify: uuid!("8ba2bcc2-ee02-4a55-a531-c525c5e454d5"),
};

/// Nordic UART profile used by older firmware. Tried when the current
/// profile fails to resolve.
pub const LEGACY_PROFILE: ServiceProfile = ServiceProfile {
    service: uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e"),
    write: uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e"),
    notify: uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e"),
};

/// Identity of the radio a link is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioDevice {
    pub id: String,
    pub name: String,
}

/// Asynchronous, non-blocking access to one mesh radio.
///
/// Implementations own exactly one physical link. All operations complete
/// via the async runtime; none of them retry internally — retry policy
/// belongs to the delivery queue.
#[async_trait]
pub trait RadioLink: Send {
    /// Capability probe. When this returns false every other operation
    /// must fail fast with [`TransportError::Unavailable`] instead of
    /// hanging.
    fn is_available(&self) -> bool;

    /// Run user/OS mediated device selection and return the chosen radio.
    async fn request_device(&mut self) -> Result<RadioDevice, TransportError>;

    /// Resolve the given service profile on the selected device.
    async fn bind(&mut self, profile: &ServiceProfile) -> Result<(), TransportError>;

    /// Subscribe to inbound notifications. Each received buffer is one
    /// complete notification payload (one wire frame).
    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, TransportError>;

    /// Write one chunk (at most [`super::frame::MAX_CHUNK_SIZE`] bytes) to
    /// the outbound characteristic.
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError>;

    /// Tear the link down. Must be idempotent.
    async fn close(&mut self);
}
