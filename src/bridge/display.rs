//! Boundary to the human-facing status display.
//!
//! The bridge pushes a [`StatusFrame`] on every tick and an [`Alert`] when
//! something needs attention; the display answers with [`UserCommand`]s over
//! a channel. [`ConsoleDisplay`] is the plain line-oriented implementation
//! used by the binary.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

use super::stats::SessionCounters;
use super::upload::JobId;
use crate::adif::ContactRecord;
use crate::logutil::escape_log;

/// Operator input relevant to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    Retry,
    Skip,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ListenerStatus {
    Listening(SocketAddr),
    Failed(String),
    Stopped,
}

/// What the upload side is doing right now, as shown in the status panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UploadStatus {
    Ready,
    Manual,
    Uploading { job_id: JobId, callsign: String, attempt: u32 },
    Uploaded { callsign: String },
    Rejected { callsign: String, reason: String },
    AwaitingDecision { job_id: JobId, callsign: String, attempt: u32, reason: String },
    Skipped { callsign: String },
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::Ready => write!(f, "Ready"),
            UploadStatus::Manual => write!(f, "Manual mode"),
            UploadStatus::Uploading { callsign, attempt, .. } if *attempt > 1 => {
                write!(f, "Uploading {} (attempt {})", callsign, attempt)
            }
            UploadStatus::Uploading { callsign, .. } => write!(f, "Uploading {}", callsign),
            UploadStatus::Uploaded { callsign } => write!(f, "Upload OK ({})", callsign),
            UploadStatus::Rejected { callsign, reason } => {
                write!(f, "Upload failed ({}): {}", callsign, reason)
            }
            UploadStatus::AwaitingDecision { callsign, reason, .. } => {
                write!(f, "Upload error ({}): {}", callsign, reason)
            }
            UploadStatus::Skipped { callsign } => write!(f, "Skipped {}", callsign),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusFrame {
    pub now: DateTime<Utc>,
    pub counters: SessionCounters,
    pub auto_upload: bool,
    pub listener: ListenerStatus,
    pub upload: UploadStatus,
    /// Jobs accepted by the worker and not yet finished.
    pub outstanding_uploads: usize,
    pub last_contact: Option<ContactRecord>,
    /// Newest first, at most ten entries.
    pub history: Vec<ContactRecord>,
}

/// Events that deserve more than the periodic status line.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// The UDP socket died; no more contacts will arrive.
    ListenerFailed(String),
    UploadNeedsDecision {
        job_id: JobId,
        callsign: String,
        attempt: u32,
        reason: String,
    },
    UploadRejected { callsign: String, reason: String },
}

pub trait DisplaySink: Send {
    fn render(&mut self, frame: &StatusFrame);
    fn alert(&mut self, alert: &Alert);
}

/// Prints a status line whenever the visible state changes.
#[derive(Default)]
pub struct ConsoleDisplay {
    last_line: String,
    last_contact_seen: Option<DateTime<Utc>>,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    fn status_line(frame: &StatusFrame) -> String {
        let listener = match &frame.listener {
            ListenerStatus::Listening(addr) => format!("UDP {}", addr.port()),
            ListenerStatus::Failed(e) => format!("listener failed: {}", escape_log(e)),
            ListenerStatus::Stopped => "stopped".to_string(),
        };
        format!(
            "[{}] QSOs: {} | uploaded: {} | failed: {} | queued: {} | auto-upload: {} | {}",
            listener,
            frame.counters.qsos_received,
            frame.counters.uploads_succeeded,
            frame.counters.uploads_failed,
            frame.outstanding_uploads,
            if frame.auto_upload { "ON" } else { "OFF" },
            escape_log(&frame.upload.to_string())
        )
    }

    // Every field below arrived over the network; escape_log keeps control
    // and escape sequences from reaching the terminal.
    fn contact_line(contact: &ContactRecord) -> String {
        let or_na = |s: &str| if s.is_empty() { "N/A".to_string() } else { escape_log(s) };
        let logged = contact
            .received_at
            .map(|t| t.format("%H:%M:%S UTC").to_string())
            .unwrap_or_default();
        format!(
            "{} {} {}/{} grid {} rst {}/{} {} {}",
            logged,
            escape_log(&contact.callsign),
            escape_log(&contact.mode),
            escape_log(&contact.band),
            or_na(contact.grid_square.as_deref().unwrap_or("")),
            or_na(&contact.rst_sent),
            or_na(&contact.rst_rcvd),
            escape_log(contact.display_time()),
            escape_log(contact.comment.as_deref().unwrap_or(""))
        )
    }

    fn alert_text(alert: &Alert) -> String {
        match alert {
            Alert::ListenerFailed(reason) => format!(
                "*** UDP listener stopped: {} - no further contacts will be received ***",
                escape_log(reason)
            ),
            Alert::UploadNeedsDecision {
                callsign,
                attempt,
                reason,
                ..
            } => format!(
                "*** Upload of {} failed (attempt {}): {} ***\n    Enter 'r' to retry or 's' to skip.",
                escape_log(callsign),
                attempt,
                escape_log(reason)
            ),
            Alert::UploadRejected { callsign, reason } => format!(
                "*** eQSL.cc rejected {}: {} ***",
                escape_log(callsign),
                escape_log(reason)
            ),
        }
    }
}

impl DisplaySink for ConsoleDisplay {
    fn render(&mut self, frame: &StatusFrame) {
        if let Some(contact) = &frame.last_contact {
            if contact.received_at != self.last_contact_seen {
                self.last_contact_seen = contact.received_at;
                println!("{}", Self::contact_line(contact));
            }
        }
        let line = Self::status_line(frame);
        if line != self.last_line {
            println!("{}  (local {})", line, Local::now().format("%H:%M:%S"));
            self.last_line = line;
        }
    }

    fn alert(&mut self, alert: &Alert) {
        println!("{}", Self::alert_text(alert));
    }
}
