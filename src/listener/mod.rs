//! # WSJT-X Broadcast Listener
//!
//! WSJT-X's "secondary UDP server" sends one logged-ADIF datagram per
//! contact. [`BroadcastListener`] owns the UDP socket and runs the receive
//! loop on its own task:
//!
//! ```text
//! datagram ──→ adif::decode_all ──→ ListenerEvent::Contact        ──→ bridge
//!                               └─→ ListenerEvent::DecodeFailed   ──→ bridge (log only)
//! ```
//!
//! Bad payloads never stop the loop, nor does a datagram too large for the
//! receive buffer. Any other receive error from the socket itself is
//! reported once as [`ListenerEvent::Fatal`] and the task ends. Shutdown is a
//! oneshot signal; the socket is closed when the task returns.

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::adif::{decode_all, ContactRecord, DecodeError};
use crate::config::ListenerConfig;
use crate::logutil::payload_preview;

/// Bytes of an undecodable datagram kept for the log.
const FAILURE_PREVIEW_CHARS: usize = 120;

/// Everything the listener reports downstream.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    /// A decoded contact, stamped with the local receive time.
    Contact(ContactRecord),
    /// A datagram (or one record in it) that could not be decoded.
    DecodeFailed {
        error: DecodeError,
        from: SocketAddr,
        preview: String,
    },
    /// The socket failed; no further contacts will arrive.
    Fatal(String),
    /// Clean exit after a shutdown request.
    Stopped,
}

pub struct BroadcastListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    max_datagram: usize,
}

/// Owner-side handle for a spawned listener task.
pub struct ListenerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Ask the receive loop to stop and wait for the socket to close.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            warn!("Listener task ended abnormally: {}", e);
        }
    }
}

impl BroadcastListener {
    /// Bind the UDP socket described by `config`.
    pub async fn bind(config: &ListenerConfig) -> Result<Self> {
        let addr = config.socket_addr();
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|e| anyhow!("Failed to bind UDP listener on {}: {}", addr, e))?;
        let local_addr = socket.local_addr()?;
        info!("Listening for WSJT-X logged ADIF on UDP {}", local_addr);
        Ok(Self {
            socket,
            local_addr,
            max_datagram: config.max_datagram_bytes.max(512),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the receive loop on a new task.
    pub fn spawn(self, events: mpsc::UnboundedSender<ListenerEvent>) -> ListenerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(events, shutdown_rx));
        ListenerHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    /// Receive until shutdown, a socket error, or the event channel closing.
    pub async fn run(
        self,
        events: mpsc::UnboundedSender<ListenerEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut buf = vec![0u8; self.max_datagram];
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Listener received shutdown signal");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => {
                            if !forward_datagram(&buf[..len], from, &events) {
                                warn!("Listener event channel closed, stopping receive loop");
                                return;
                            }
                        }
                        Err(e) if is_oversized(&e) => {
                            warn!(
                                "Dropped a datagram larger than {} bytes on {}",
                                self.max_datagram, self.local_addr
                            );
                        }
                        Err(e) if is_transient(&e) => {
                            debug!("Ignoring transient UDP receive error: {}", e);
                        }
                        Err(e) => {
                            error!("UDP receive failed on {}: {}", self.local_addr, e);
                            let _ = events.send(ListenerEvent::Fatal(e.to_string()));
                            return;
                        }
                    }
                }
            }
        }
        let _ = events.send(ListenerEvent::Stopped);
        info!("Listener on {} closed", self.local_addr);
    }
}

/// WSAEMSGSIZE. Windows fails the recv when the datagram does not fit the
/// buffer; other platforms truncate silently.
const WSAEMSGSIZE: i32 = 10040;

fn is_oversized(e: &io::Error) -> bool {
    e.raw_os_error() == Some(WSAEMSGSIZE)
}

// Windows reports ICMP port-unreachable from an earlier send as
// ConnectionReset on the next recv.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::ConnectionReset
    )
}

/// Decode one datagram and emit its events. Returns false once the receiver is gone.
fn forward_datagram(
    payload: &[u8],
    from: SocketAddr,
    events: &mpsc::UnboundedSender<ListenerEvent>,
) -> bool {
    for result in decode_all(payload) {
        let event = match result {
            Ok(record) => {
                let record = record.stamped(Utc::now());
                debug!(
                    "Decoded QSO with {} from {} ({}/{})",
                    record.callsign, from, record.mode, record.band
                );
                ListenerEvent::Contact(record)
            }
            Err(error) => {
                let preview = payload_preview(payload, FAILURE_PREVIEW_CHARS);
                warn!("Dropping datagram from {}: {} [{}]", from, error, preview);
                ListenerEvent::DecodeFailed {
                    error,
                    from,
                    preview,
                }
            }
        };
        if events.send(event).is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:2237".parse().expect("addr")
    }

    #[test]
    fn forwards_each_record_in_a_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let payload = b"<CALL:4>K1AB<QSO_DATE:8>20250101<TIME_ON:6>123456<EOR>\
            <CALL:4>K2CD<QSO_DATE:8>20250101<TIME_ON:6>123500<EOR>";
        assert!(forward_datagram(payload, addr(), &tx));
        let mut calls = Vec::new();
        while let Ok(ListenerEvent::Contact(r)) = rx.try_recv() {
            assert!(r.received_at.is_some());
            calls.push(r.callsign);
        }
        assert_eq!(calls, vec!["K1AB", "K2CD"]);
    }

    #[test]
    fn empty_datagram_is_a_decode_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(forward_datagram(b"", addr(), &tx));
        assert!(matches!(
            rx.try_recv(),
            Ok(ListenerEvent::DecodeFailed {
                error: DecodeError::Malformed { .. },
                ..
            })
        ));
    }

    #[test]
    fn oversized_datagram_does_not_stop_the_loop() {
        let too_big = io::Error::from_raw_os_error(WSAEMSGSIZE);
        assert!(is_oversized(&too_big));

        let reset = io::Error::from(ErrorKind::ConnectionReset);
        assert!(!is_oversized(&reset));
        assert!(is_transient(&reset));

        let dead = io::Error::new(ErrorKind::Other, "network is down");
        assert!(!is_oversized(&dead));
        assert!(!is_transient(&dead));
    }

    #[test]
    fn closed_channel_stops_forwarding() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!forward_datagram(
            b"<CALL:4>K1AB<QSO_DATE:8>20250101<TIME_ON:6>123456<EOR>",
            addr(),
            &tx
        ));
    }
}
