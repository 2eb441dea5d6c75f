//! # wsjtx2eqsl - WSJT-X to eQSL.cc bridge
//!
//! Listens for the logged-ADIF datagrams WSJT-X broadcasts after every
//! completed contact, keeps a short history for display, and uploads each
//! contact to eQSL.cc one at a time.
//!
//! ## Features
//!
//! - **ADIF codec**: length-prefixed tag scanner for WSJT-X payloads and an
//!   encoder for the single-record upload document.
//! - **UDP listener**: bad payloads are logged and skipped, never fatal.
//! - **Serialized uploads**: a single worker drains a FIFO queue; temporary
//!   failures hold the queue until the operator retries or skips.
//! - **Live auto-upload toggle** that applies to the next contact received.
//! - **TTY-aware logging** with a separate QSO log target.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::{mpsc, watch};
//! use wsjtx2eqsl::bridge::{BridgeServer, ConsoleDisplay, EqslClient, UserCommand};
//! use wsjtx2eqsl::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("wsjtx2eqsl.toml").await?;
//!     config.validate()?;
//!     let client = Arc::new(EqslClient::from_config(&config.eqsl)?);
//!     let (_auto_upload, auto_rx) = watch::channel(config.eqsl.auto_upload);
//!     let (commands, command_rx) = mpsc::unbounded_channel::<UserCommand>();
//!
//!     let server = BridgeServer::new(config, client, auto_rx, Box::new(ConsoleDisplay::new())).await?;
//!     let summary = server.run(command_rx).await;
//!     drop(commands);
//!     println!("{} QSOs this session", summary.counters.qsos_received);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`adif`] - contact record type, ADIF decoding and encoding
//! - [`listener`] - UDP receive loop for WSJT-X broadcasts
//! - [`bridge`] - orchestration, upload queue, eQSL.cc client, display boundary
//! - [`config`] - configuration file management and validation
//! - [`logutil`] - log-safe escaping of untrusted text
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  WSJT-X (UDP)   │
//! └─────────────────┘
//!          │ logged ADIF
//! ┌─────────────────┐
//! │    Listener     │ ← decode, stamp, forward
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  BridgeServer   │ ← history, counters, display
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Upload worker  │ ← one request at a time
//! └─────────────────┘
//!          │ HTTPS form POST
//!      eQSL.cc
//! ```

pub mod adif;
pub mod bridge;
pub mod config;
pub mod listener;
pub mod logutil;
