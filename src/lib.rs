//! # Meshtac - Off-grid Mesh Messaging
//!
//! Meshtac is the off-grid messaging core of a tactical dashboard: it
//! drives a short-range mesh radio, speaks the Cursor-on-Target (CoT) XML
//! dialect of third-party situational-awareness tools, and guarantees
//! duplicate-safe, bounded-retry message delivery across restarts and
//! radio disconnects — without a server in the loop.
//!
//! ## Features
//!
//! - **Radio Transport**: explicit connection state machine over a
//!   pluggable link (serial bridge shipped, BLE-shaped seam), 12-byte
//!   framed wire protocol, 512-byte write chunking.
//! - **CoT Codec**: total (never-throwing) encode/decode/validate for CoT
//!   events, a prefix-ordered type-code translation table, and adapters to
//!   generic map entities.
//! - **Delivery Queue**: sled-backed pending/sent/received/peer stores
//!   with idempotent ingest, bounded retries, retention purging and
//!   snapshot export/import.
//! - **Async Design**: built with Tokio on one cooperative scheduler; no
//!   dedicated worker threads required.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshtac::config::Config;
//! use meshtac::queue::DeliveryQueue;
//! use meshtac::service::MeshService;
//! use meshtac::transport::serial::SerialLink;
//! use meshtac::transport::RadioClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let link = SerialLink::new(&config.radio.port, config.radio.baud_rate);
//!     let client = RadioClient::new(Box::new(link), config.radio.source_id);
//!     let queue = DeliveryQueue::open("./data/queue")?;
//!
//!     let mut service = MeshService::new(client, queue, &config);
//!     service.connect().await?;
//!     service.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Three components compose, leaves first:
//!
//! ```text
//! ┌─────────────────┐
//! │   MeshService   │ ← drain loop + inbound routing
//! └─────────────────┘
//!      │         │
//! ┌──────────┐ ┌──────────────┐     ┌───────────┐
//! │ Radio    │ │ Delivery     │ ──▶ │ CoT Codec │ (pure, stateless)
//! │ Client   │ │ Queue (sled) │     └───────────┘
//! └──────────┘ └──────────────┘
//! ```
//!
//! The queue never touches the radio: the drain loop hands each pending
//! message to an injected send capability and reacts to the result. The
//! codec depends on nothing else and never lets a malformed document cross
//! its boundary as an error.
//!
//! ## Module Organization
//!
//! - [`transport`] - radio link, frame codec, connection state machine
//! - [`cot`] - Cursor-on-Target event codec and type-code tables
//! - [`queue`] - durable offline delivery queue
//! - [`service`] - composition layer and run loop
//! - [`config`] - configuration management and validation
//! - [`logutil`] - log sanitization helpers

pub mod config;
pub mod cot;
pub mod logutil;
pub mod queue;
pub mod service;
pub mod transport;
