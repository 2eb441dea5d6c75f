//! Bridge between the WSJT-X listener and eQSL.cc.
//!
//! - [`server`] runs the orchestration loop and owns all per-run state
//! - [`upload`] is the single-worker FIFO upload queue
//! - [`eqsl`] talks HTTP to eQSL.cc behind the [`UploadClient`] trait
//! - [`display`] is the boundary to whatever shows status to the operator
//! - [`history`] and [`stats`] hold the recent contacts and session counters

pub mod display;
pub mod eqsl;
pub mod history;
pub mod server;
pub mod stats;
pub mod upload;

pub use display::{Alert, ConsoleDisplay, DisplaySink, ListenerStatus, StatusFrame, UploadStatus, UserCommand};
pub use eqsl::{Credentials, EqslClient, RemoteError, UploadClient};
pub use history::{HistoryList, HISTORY_CAPACITY};
pub use server::{BridgeServer, RunSummary, StopReason};
pub use stats::SessionCounters;
pub use upload::{start_upload_worker, Decision, JobId, JobState, UploadHandle, UploadJob, WorkerEvent};
