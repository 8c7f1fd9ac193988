//! Test utilities & fixtures.
//! Provides a scriptable radio link so transport and service tests can run
//! without hardware, plus helpers for throwaway queues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use meshtac::transport::{
    RadioDevice, RadioLink, ServiceProfile, TransportError, CURRENT_PROFILE,
};
use tokio::sync::mpsc;

/// Shared handles into a [`MockLink`], kept by the test while the link
/// itself is moved into the client.
#[derive(Clone, Default)]
pub struct MockLinkHandle {
    pub written: Arc<Mutex<Vec<Vec<u8>>>>,
    pub fail_writes: Arc<AtomicBool>,
    notify_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl MockLinkHandle {
    /// Inject one inbound notification, as the radio would.
    #[allow(dead_code)]
    pub fn notify(&self, bytes: Vec<u8>) {
        let guard = self.notify_tx.lock().unwrap();
        let tx = guard.as_ref().expect("link not subscribed");
        tx.send(bytes).expect("notification receiver dropped");
    }

    /// Simulate the link going away (closes the notification stream).
    #[allow(dead_code)]
    pub fn drop_stream(&self) {
        *self.notify_tx.lock().unwrap() = None;
    }

    #[allow(dead_code)]
    pub fn written_chunks(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

/// Scriptable in-memory radio link.
pub struct MockLink {
    pub available: bool,
    pub reject_current_profile: bool,
    handle: MockLinkHandle,
}

impl MockLink {
    pub fn new() -> (Self, MockLinkHandle) {
        let handle = MockLinkHandle::default();
        (
            Self {
                available: true,
                reject_current_profile: false,
                handle: handle.clone(),
            },
            handle,
        )
    }
}

#[async_trait::async_trait]
impl RadioLink for MockLink {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn request_device(&mut self) -> Result<RadioDevice, TransportError> {
        Ok(RadioDevice {
            id: "mock-0".to_string(),
            name: "Mock Radio".to_string(),
        })
    }

    async fn bind(&mut self, profile: &ServiceProfile) -> Result<(), TransportError> {
        if self.reject_current_profile && *profile == CURRENT_PROFILE {
            return Err(TransportError::ServiceResolution(
                "current profile absent".to_string(),
            ));
        }
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.handle.notify_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        if self.handle.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Write("scripted failure".to_string()));
        }
        self.handle.written.lock().unwrap().push(chunk.to_vec());
        Ok(())
    }

    async fn close(&mut self) {
        *self.handle.notify_tx.lock().unwrap() = None;
    }
}
