use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::display::{Alert, DisplaySink, ListenerStatus, StatusFrame, UploadStatus, UserCommand};
use super::eqsl::{Credentials, UploadClient};
use super::history::HistoryList;
use super::stats::SessionCounters;
use super::upload::{start_upload_worker, Decision, JobId, UploadHandle, UploadJob, WorkerEvent};
use crate::adif::ContactRecord;
use crate::config::Config;
use crate::listener::{BroadcastListener, ListenerEvent};
use crate::logutil::{escape_log, qso_log};

/// # Bridge Server - pipeline orchestrator
///
/// Owns the per-run state (history, counters, current upload status) and
/// wires the three tasks together:
///
/// ```text
/// ┌─────────────┐ ListenerEvent ┌──────────────┐ UploadJob   ┌──────────────┐
/// │  Listener   │──────────────→│ BridgeServer │────────────→│ Upload worker│
/// │ (UDP task)  │               │   (run loop) │←────────────│  (one task)  │
/// └─────────────┘               └──────────────┘ WorkerEvent └──────────────┘
///                                  │        ↑
///                   StatusFrame /  │        │ UserCommand
///                   Alert          ↓        │
///                               ┌──────────────┐
///                               │ DisplaySink  │
///                               └──────────────┘
/// ```
///
/// All state is mutated only inside [`BridgeServer::run`]; the other tasks
/// see copies carried by channel messages. The render tick only reads owned
/// state, so the clock keeps moving with no traffic and never waits on the
/// network.
///
/// ## Usage
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tokio::sync::{mpsc, watch};
/// use wsjtx2eqsl::bridge::{BridgeServer, ConsoleDisplay, EqslClient};
/// use wsjtx2eqsl::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::load("wsjtx2eqsl.toml").await?;
///     let client = Arc::new(EqslClient::from_config(&config.eqsl)?);
///     let (_auto_tx, auto_rx) = watch::channel(config.eqsl.auto_upload);
///     let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
///     let server = BridgeServer::new(config, client, auto_rx, Box::new(ConsoleDisplay::new())).await?;
///     let summary = server.run(cmd_rx).await;
///     println!("Total QSOs logged: {}", summary.counters.qsos_received);
///     Ok(())
/// }
/// ```
pub struct BridgeServer {
    config: Config,
    credentials: Credentials,
    client: Arc<dyn UploadClient>,
    auto_upload: watch::Receiver<bool>,
    display: Box<dyn DisplaySink>,
    listener: Option<BroadcastListener>,
    listener_status: ListenerStatus,
    history: HistoryList,
    counters: SessionCounters,
    upload_status: UploadStatus,
    outstanding_uploads: usize,
    awaiting_decision: Option<JobId>,
    next_job_id: JobId,
}

/// Why the run loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Quit,
    ListenerFailed(String),
}

/// Final report handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub counters: SessionCounters,
    pub reason: StopReason,
    /// Contacts still queued or awaiting a decision when the worker stopped.
    pub unsent_uploads: usize,
}

impl BridgeServer {
    /// Bind the UDP listener and prepare the bridge. Nothing runs until
    /// [`BridgeServer::run`].
    pub async fn new(
        config: Config,
        client: Arc<dyn UploadClient>,
        auto_upload: watch::Receiver<bool>,
        display: Box<dyn DisplaySink>,
    ) -> Result<Self> {
        let listener = BroadcastListener::bind(&config.listener).await?;
        let listener_status = ListenerStatus::Listening(listener.local_addr());
        let credentials = Credentials::new(&config.eqsl.username, &config.eqsl.password);
        let upload_status = if *auto_upload.borrow() {
            UploadStatus::Ready
        } else {
            UploadStatus::Manual
        };
        Ok(Self {
            config,
            credentials,
            client,
            auto_upload,
            display,
            listener: Some(listener),
            listener_status,
            history: HistoryList::new(),
            counters: SessionCounters::default(),
            upload_status,
            outstanding_uploads: 0,
            awaiting_decision: None,
            next_job_id: 1,
        })
    }

    /// Address the listener is bound to (useful when configured with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener_status {
            ListenerStatus::Listening(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Run until a quit command, ctrl-c, or a fatal listener error.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<UserCommand>) -> RunSummary {
        info!(
            "Bridge started for {} (auto-upload {})",
            self.credentials.username,
            if *self.auto_upload.borrow() { "on" } else { "off" }
        );

        let (listener_tx, mut listener_rx) = mpsc::unbounded_channel();
        let listener_handle = self.listener.take().map(|l| l.spawn(listener_tx));

        let (worker_tx, mut worker_rx) = mpsc::unbounded_channel();
        let uploads = start_upload_worker(self.client.clone(), self.credentials.clone(), worker_tx);

        let mut tick = tokio::time::interval(self.config.display.tick());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                _ = tick.tick() => self.render(),

                Some(event) = listener_rx.recv() => {
                    if let Some(reason) = self.on_listener_event(event, &uploads) {
                        break reason;
                    }
                }

                Some(event) = worker_rx.recv() => self.on_worker_event(event),

                Some(command) = commands.recv() => match command {
                    UserCommand::Quit => {
                        info!("Quit requested");
                        break StopReason::Quit;
                    }
                    UserCommand::Retry => self.decide(Decision::Retry, &uploads),
                    UserCommand::Skip => self.decide(Decision::Skip, &uploads),
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break StopReason::Quit;
                }
            }
        };

        // Close the socket first so no new contacts (and jobs) appear, then
        // let the worker finish whatever is on the wire.
        if let Some(handle) = listener_handle {
            handle.shutdown().await;
        }
        if !matches!(self.listener_status, ListenerStatus::Failed(_)) {
            self.listener_status = ListenerStatus::Stopped;
        }
        let report = uploads.shutdown().await;
        while let Ok(event) = worker_rx.try_recv() {
            self.on_worker_event(event);
        }
        self.render();

        let summary = self.summary(reason, report.map(|r| r.unsent).unwrap_or(0));
        info!(
            "Bridge stopped: {} QSOs, {} uploaded, {} failed, {} unsent",
            summary.counters.qsos_received,
            summary.counters.uploads_succeeded,
            summary.counters.uploads_failed,
            summary.unsent_uploads
        );
        summary
    }

    fn on_listener_event(&mut self, event: ListenerEvent, uploads: &UploadHandle) -> Option<StopReason> {
        match event {
            ListenerEvent::Contact(record) => self.on_contact(record, uploads),
            ListenerEvent::DecodeFailed { error, from, .. } => {
                self.counters.record_decode_failure();
                debug!("Decode failure from {} counted: {}", from, error);
            }
            ListenerEvent::Fatal(reason) => {
                error!("Listener failed: {}", reason);
                self.listener_status = ListenerStatus::Failed(reason.clone());
                self.display.alert(&Alert::ListenerFailed(reason.clone()));
                self.render();
                return Some(StopReason::ListenerFailed(reason));
            }
            ListenerEvent::Stopped => debug!("Listener reported stop"),
        }
        None
    }

    fn on_contact(&mut self, record: ContactRecord, uploads: &UploadHandle) {
        self.counters.record_qso();
        qso_log!(
            info,
            "QSO with {} on {}/{} {} {} grid {} comment [{}]",
            escape_log(&record.callsign),
            escape_log(&record.mode),
            escape_log(&record.band),
            record.qso_date,
            record.time_on,
            escape_log(record.grid_square.as_deref().unwrap_or("N/A")),
            escape_log(record.comment.as_deref().unwrap_or(""))
        );

        // Read the flag per record so a toggle applies to the very next contact.
        let auto_upload = *self.auto_upload.borrow();
        if auto_upload {
            let job = UploadJob::new(self.next_job_id, record.clone());
            self.next_job_id += 1;
            if uploads.enqueue(job) {
                self.outstanding_uploads += 1;
            } else {
                warn!("Upload worker unavailable; {} not queued", record.callsign);
            }
        } else if self.outstanding_uploads == 0 {
            self.upload_status = UploadStatus::Manual;
        }
        self.history.record(record);
    }

    fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Started(job) => {
                self.upload_status = UploadStatus::Uploading {
                    job_id: job.id,
                    callsign: job.record.callsign,
                    attempt: job.attempt_count,
                };
            }
            WorkerEvent::Succeeded(job) => {
                self.counters.record_upload_success();
                self.finish_job();
                self.upload_status = UploadStatus::Uploaded {
                    callsign: job.record.callsign,
                };
            }
            WorkerEvent::Rejected { job, reason } => {
                self.counters.record_upload_failure();
                self.finish_job();
                self.display.alert(&Alert::UploadRejected {
                    callsign: job.record.callsign.clone(),
                    reason: reason.clone(),
                });
                self.upload_status = UploadStatus::Rejected {
                    callsign: job.record.callsign,
                    reason,
                };
            }
            WorkerEvent::AwaitingDecision { job, reason } => {
                self.awaiting_decision = Some(job.id);
                self.display.alert(&Alert::UploadNeedsDecision {
                    job_id: job.id,
                    callsign: job.record.callsign.clone(),
                    attempt: job.attempt_count,
                    reason: reason.clone(),
                });
                self.upload_status = UploadStatus::AwaitingDecision {
                    job_id: job.id,
                    callsign: job.record.callsign,
                    attempt: job.attempt_count,
                    reason,
                };
            }
            WorkerEvent::Requeued(job) => {
                if self.awaiting_decision == Some(job.id) {
                    self.awaiting_decision = None;
                }
            }
            WorkerEvent::Skipped(job) => {
                if self.awaiting_decision == Some(job.id) {
                    self.awaiting_decision = None;
                }
                self.counters.record_upload_failure();
                self.finish_job();
                self.upload_status = UploadStatus::Skipped {
                    callsign: job.record.callsign,
                };
            }
            WorkerEvent::Stopped { unsent } => debug!("Upload worker stopped ({} unsent)", unsent),
        }
        self.render();
    }

    fn summary(&self, reason: StopReason, unsent_uploads: usize) -> RunSummary {
        RunSummary {
            counters: self.counters,
            reason,
            unsent_uploads,
        }
    }

    fn finish_job(&mut self) {
        self.outstanding_uploads = self.outstanding_uploads.saturating_sub(1);
    }

    fn decide(&mut self, decision: Decision, uploads: &UploadHandle) {
        match self.awaiting_decision {
            Some(job_id) => uploads.decide(job_id, decision),
            None => debug!("{:?} ignored: no upload is waiting for a decision", decision),
        }
    }

    fn frame(&self) -> StatusFrame {
        StatusFrame {
            now: Utc::now(),
            counters: self.counters,
            auto_upload: *self.auto_upload.borrow(),
            listener: self.listener_status.clone(),
            upload: self.upload_status.clone(),
            outstanding_uploads: self.outstanding_uploads,
            last_contact: self.history.latest().cloned(),
            history: self.history.snapshot(),
        }
    }

    fn render(&mut self) {
        let frame = self.frame();
        self.display.render(&frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::eqsl::RemoteError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct AcceptAll;

    #[async_trait]
    impl UploadClient for AcceptAll {
        async fn upload(&self, _: &ContactRecord, _: &Credentials) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct Alerts(Arc<Mutex<Vec<Alert>>>);

    impl DisplaySink for Alerts {
        fn render(&mut self, _frame: &StatusFrame) {}

        fn alert(&mut self, alert: &Alert) {
            self.0.lock().unwrap().push(alert.clone());
        }
    }

    async fn bridge(alerts: &Alerts) -> BridgeServer {
        let mut config = Config::default();
        config.listener.bind_address = "127.0.0.1".to_string();
        config.listener.port = 0;
        let (_auto_tx, auto_rx) = watch::channel(false);
        BridgeServer::new(config, Arc::new(AcceptAll), auto_rx, Box::new(alerts.clone()))
            .await
            .expect("bridge")
    }

    fn contact(call: &str) -> ContactRecord {
        ContactRecord {
            callsign: call.to_string(),
            qso_date: "20250101".into(),
            time_on: "123456".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fatal_listener_error_alerts_and_stops_with_counters() {
        let alerts = Alerts::default();
        let mut server = bridge(&alerts).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let uploads = start_upload_worker(Arc::new(AcceptAll), server.credentials.clone(), tx);

        assert_eq!(
            server.on_listener_event(ListenerEvent::Contact(contact("K1AB")), &uploads),
            None
        );
        let stop = server.on_listener_event(
            ListenerEvent::Fatal("Network is down".to_string()),
            &uploads,
        );

        assert_eq!(stop, Some(StopReason::ListenerFailed("Network is down".to_string())));
        assert_eq!(
            server.listener_status,
            ListenerStatus::Failed("Network is down".to_string())
        );
        assert_eq!(
            alerts.0.lock().unwrap().as_slice(),
            &[Alert::ListenerFailed("Network is down".to_string())]
        );
        assert_eq!(server.local_addr(), None);

        let summary = server.summary(stop.expect("stop reason"), 0);
        assert_eq!(summary.reason, StopReason::ListenerFailed("Network is down".to_string()));
        assert_eq!(summary.counters.qsos_received, 1);
        uploads.shutdown().await;
    }

    #[tokio::test]
    async fn decode_failures_only_count() {
        let alerts = Alerts::default();
        let mut server = bridge(&alerts).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let uploads = start_upload_worker(Arc::new(AcceptAll), server.credentials.clone(), tx);

        let event = ListenerEvent::DecodeFailed {
            error: crate::adif::DecodeError::MissingField("CALL"),
            from: "127.0.0.1:2237".parse().expect("addr"),
            preview: "<QSO_DATE:8>20250101<EOR>".to_string(),
        };
        assert_eq!(server.on_listener_event(event, &uploads), None);
        assert_eq!(server.counters.decode_failures, 1);
        assert!(alerts.0.lock().unwrap().is_empty());
        uploads.shutdown().await;
    }
}
