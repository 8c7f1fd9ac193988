//! Serial bridge to the mesh radio.
//!
//! The shipped [`RadioLink`] implementation: a USB/UART serial connection
//! to the radio (or to a bridge device exposing the same framed protocol).
//! Notification payloads are SLIP encoded on the wire so frame boundaries
//! survive arbitrary read chunking.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serialport::SerialPort;
use tokio::sync::mpsc;

use super::link::{RadioDevice, RadioLink, ServiceProfile};
use super::TransportError;

// SLIP (RFC 1055) framing bytes.
const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

fn slip_encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(END); // clean boundary even after line noise
    for &b in payload {
        match b {
            END => {
                out.push(ESC);
                out.push(ESC_END);
            }
            ESC => {
                out.push(ESC);
                out.push(ESC_ESC);
            }
            _ => out.push(b),
        }
    }
    out.push(END);
    out
}

/// Incremental SLIP decoder fed from the serial read loop.
#[derive(Default)]
struct SlipDecoder {
    buf: Vec<u8>,
    esc: bool,
}

impl SlipDecoder {
    /// Push raw bytes, returning any completed notification payloads.
    fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &b in data {
            if self.esc {
                match b {
                    ESC_END => self.buf.push(END),
                    ESC_ESC => self.buf.push(ESC),
                    _ => {} // invalid escape, dropped
                }
                self.esc = false;
                continue;
            }
            match b {
                END => {
                    if !self.buf.is_empty() {
                        frames.push(std::mem::take(&mut self.buf));
                    }
                }
                ESC => self.esc = true,
                _ => self.buf.push(b),
            }
        }
        frames
    }
}

/// Serial-port radio link. One instance owns one port.
pub struct SerialLink {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
    stop: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl SerialLink {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            port: None,
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }
}

#[async_trait]
impl RadioLink for SerialLink {
    fn is_available(&self) -> bool {
        self.port.is_some() || serialport::available_ports().is_ok()
    }

    async fn request_device(&mut self) -> Result<RadioDevice, TransportError> {
        let ports = serialport::available_ports()
            .map_err(|e| TransportError::DeviceSelection(e.to_string()))?;
        let info = ports.into_iter().find(|p| p.port_name == self.port_name);
        match info {
            Some(p) => Ok(RadioDevice {
                id: p.port_name.clone(),
                name: match p.port_type {
                    serialport::SerialPortType::UsbPort(usb) => usb
                        .product
                        .unwrap_or_else(|| p.port_name.clone()),
                    _ => p.port_name.clone(),
                },
            }),
            None => Err(TransportError::DeviceSelection(format!(
                "port {} not present",
                self.port_name
            ))),
        }
    }

    async fn bind(&mut self, profile: &ServiceProfile) -> Result<(), TransportError> {
        debug!(
            "opening {} at {} baud (service {})",
            self.port_name, self.baud_rate, profile.service
        );
        let mut builder =
            serialport::new(&self.port_name, self.baud_rate).timeout(Duration::from_millis(500));
        // Some USB serial adapters need explicit settings
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let port = builder
            .open()
            .map_err(|e| TransportError::ServiceResolution(e.to_string()))?;
        info!("serial link open on {}", self.port_name);
        self.port = Some(port);
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, TransportError> {
        let port = self
            .port
            .as_ref()
            .ok_or(TransportError::NotConnected)?
            .try_clone()
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.stop.store(false, Ordering::SeqCst);
        let stop = self.stop.clone();
        let name = self.port_name.clone();
        let handle = std::thread::spawn(move || {
            let mut port = port;
            let mut decoder = SlipDecoder::default();
            let mut buf = [0u8; 1024];
            while !stop.load(Ordering::SeqCst) {
                match port.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        for payload in decoder.push(&buf[..n]) {
                            if tx.send(payload).is_err() {
                                return; // receiver gone, nothing left to notify
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        warn!("serial read on {} failed: {}", name, e);
                        return;
                    }
                }
            }
        });
        self.reader = Some(handle);
        Ok(rx)
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        let encoded = slip_encode(chunk);
        port.write_all(&encoded)
            .and_then(|_| port.flush())
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.port = None;
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}
