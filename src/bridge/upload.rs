//! Upload queue and its single worker
//!
//! eQSL.cc is session and rate sensitive, so contacts are uploaded strictly
//! one at a time in arrival order. The worker owns the FIFO queue; the bridge
//! talks to it through an [`UploadHandle`] and hears back through
//! [`WorkerEvent`]s.
//!
//! Job lifecycle:
//!
//! ```text
//! Pending ──→ InFlight ──→ Succeeded                      (dropped)
//!                     ├──→ TerminalFailure                (dropped, queue continues)
//!                     └──→ RetryableFailure ──Retry──→ Pending (front of queue)
//!                                         └──Skip───→ dropped
//! ```
//!
//! A retryable failure parks the job and holds the queue until the operator
//! decides. Contacts that arrive meanwhile queue up behind it. There is no
//! timed backoff; retrying is always an explicit decision.
//!
//! Shutdown never interrupts an upload already on the wire: the command is
//! only read between attempts.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

use super::eqsl::{Credentials, RemoteError, UploadClient};
use crate::adif::ContactRecord;
use crate::logutil::{escape_log, qso_log};

pub type JobId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobState {
    Pending,
    InFlight,
    Succeeded,
    RetryableFailure(String),
    TerminalFailure(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadJob {
    pub id: JobId,
    pub record: ContactRecord,
    pub state: JobState,
    /// Send attempts so far, counting the one in flight.
    pub attempt_count: u32,
}

impl UploadJob {
    pub fn new(id: JobId, record: ContactRecord) -> Self {
        Self {
            id,
            record,
            state: JobState::Pending,
            attempt_count: 0,
        }
    }
}

/// Operator answer for a job parked after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry,
    Skip,
}

pub enum WorkerCommand {
    Enqueue(UploadJob),
    Decide { job_id: JobId, decision: Decision },
    Snapshot(oneshot::Sender<QueueStats>),
    Shutdown(oneshot::Sender<ShutdownReport>),
}

/// Outcomes reported to the bridge, in the order they happen.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Started(UploadJob),
    Succeeded(UploadJob),
    /// Terminal failure; the job is gone and the queue moves on.
    Rejected { job: UploadJob, reason: String },
    /// Retryable failure; the queue is held until a [`Decision`] arrives.
    AwaitingDecision { job: UploadJob, reason: String },
    Requeued(UploadJob),
    Skipped(UploadJob),
    Stopped { unsent: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub blocked_on: Option<JobId>,
    pub attempts_total: u64,
    pub succeeded: u64,
    pub rejected: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs still queued or awaiting a decision when the worker stopped.
    pub unsent: usize,
    pub stats: QueueStats,
}

#[derive(Clone, Debug)]
pub struct UploadHandle {
    tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl UploadHandle {
    /// Queue a job. Returns false once the worker has stopped.
    pub fn enqueue(&self, job: UploadJob) -> bool {
        self.tx.send(WorkerCommand::Enqueue(job)).is_ok()
    }

    pub fn decide(&self, job_id: JobId, decision: Decision) {
        let _ = self.tx.send(WorkerCommand::Decide { job_id, decision });
    }

    pub async fn snapshot(&self) -> Option<QueueStats> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WorkerCommand::Snapshot(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    /// Stop the worker after any in-flight attempt completes.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WorkerCommand::Shutdown(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }
}

struct UploadWorker {
    client: Arc<dyn UploadClient>,
    credentials: Credentials,
    queue: VecDeque<UploadJob>,
    blocked: Option<UploadJob>,
    stats: QueueStats,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

pub fn start_upload_worker(
    client: Arc<dyn UploadClient>,
    credentials: Credentials,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> UploadHandle {
    let (tx, rx) = mpsc::unbounded_channel::<WorkerCommand>();
    let worker = UploadWorker {
        client,
        credentials,
        queue: VecDeque::new(),
        blocked: None,
        stats: QueueStats::default(),
        events,
    };
    tokio::spawn(worker.run(rx));
    UploadHandle { tx }
}

impl UploadWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerCommand>) {
        info!("Upload worker started for {}", self.credentials.username);
        let mut shutdown_reply = None;
        'outer: loop {
            // Apply everything already delivered before picking the next job,
            // so a decision or shutdown is never starved by a long queue.
            loop {
                match rx.try_recv() {
                    Ok(cmd) => {
                        if let Some(reply) = self.handle(cmd) {
                            shutdown_reply = Some(reply);
                            break 'outer;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'outer,
                }
            }

            if self.blocked.is_none() {
                if let Some(job) = self.queue.pop_front() {
                    self.attempt(job).await;
                    continue;
                }
            }

            match rx.recv().await {
                Some(cmd) => {
                    if let Some(reply) = self.handle(cmd) {
                        shutdown_reply = Some(reply);
                        break;
                    }
                }
                None => break,
            }
        }

        let unsent = self.queue.len() + usize::from(self.blocked.is_some());
        if unsent > 0 {
            warn!("Upload worker stopping with {} unsent contact(s)", unsent);
        }
        let _ = self.events.send(WorkerEvent::Stopped { unsent });
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(ShutdownReport {
                unsent,
                stats: self.current_stats(),
            });
        }
        info!("Upload worker stopped");
    }

    /// Apply one command. Returns the reply channel when it was a shutdown.
    fn handle(&mut self, cmd: WorkerCommand) -> Option<oneshot::Sender<ShutdownReport>> {
        match cmd {
            WorkerCommand::Enqueue(job) => {
                debug!("Queued upload #{} for {}", job.id, job.record.callsign);
                self.queue.push_back(job);
            }
            WorkerCommand::Decide { job_id, decision } => self.decide(job_id, decision),
            WorkerCommand::Snapshot(reply) => {
                let _ = reply.send(self.current_stats());
            }
            WorkerCommand::Shutdown(reply) => return Some(reply),
        }
        None
    }

    fn decide(&mut self, job_id: JobId, decision: Decision) {
        let Some(job) = self.blocked.take_if_id(job_id) else {
            debug!("Ignoring {:?} for upload #{}: not awaiting a decision", decision, job_id);
            return;
        };
        match decision {
            Decision::Retry => {
                let mut job = job;
                job.state = JobState::Pending;
                info!("Retrying upload #{} for {}", job.id, job.record.callsign);
                self.queue.push_front(job.clone());
                let _ = self.events.send(WorkerEvent::Requeued(job));
            }
            Decision::Skip => {
                self.stats.skipped += 1;
                qso_log!(
                    warn,
                    "Upload skipped by operator: {} {} {}",
                    job.record.callsign,
                    job.record.qso_date,
                    job.record.time_on
                );
                let _ = self.events.send(WorkerEvent::Skipped(job));
            }
        }
    }

    async fn attempt(&mut self, mut job: UploadJob) {
        job.state = JobState::InFlight;
        job.attempt_count += 1;
        self.stats.attempts_total += 1;
        debug!(
            "Uploading #{} {} (attempt {})",
            job.id, job.record.callsign, job.attempt_count
        );
        let _ = self.events.send(WorkerEvent::Started(job.clone()));

        match self.client.upload(&job.record, &self.credentials).await {
            Ok(()) => {
                job.state = JobState::Succeeded;
                self.stats.succeeded += 1;
                qso_log!(
                    info,
                    "Uploaded {} {}/{} {} {}",
                    job.record.callsign,
                    job.record.mode,
                    job.record.band,
                    job.record.qso_date,
                    job.record.time_on
                );
                let _ = self.events.send(WorkerEvent::Succeeded(job));
            }
            Err(RemoteError::Rejected(reason)) => {
                job.state = JobState::TerminalFailure(reason.clone());
                self.stats.rejected += 1;
                qso_log!(
                    warn,
                    "Upload rejected for {}: {}",
                    job.record.callsign,
                    escape_log(&reason)
                );
                let _ = self.events.send(WorkerEvent::Rejected { job, reason });
            }
            Err(RemoteError::Transient(reason)) => {
                job.state = JobState::RetryableFailure(reason.clone());
                warn!(
                    "Upload of {} failed (attempt {}), awaiting retry/skip: {}",
                    job.record.callsign,
                    job.attempt_count,
                    escape_log(&reason)
                );
                self.blocked = Some(job.clone());
                let _ = self.events.send(WorkerEvent::AwaitingDecision { job, reason });
            }
        }
    }

    fn current_stats(&self) -> QueueStats {
        QueueStats {
            queued: self.queue.len(),
            blocked_on: self.blocked.as_ref().map(|j| j.id),
            ..self.stats.clone()
        }
    }
}

trait TakeIfId {
    fn take_if_id(&mut self, id: JobId) -> Option<UploadJob>;
}

impl TakeIfId for Option<UploadJob> {
    fn take_if_id(&mut self, id: JobId) -> Option<UploadJob> {
        if self.as_ref().map(|j| j.id) == Some(id) {
            self.take()
        } else {
            None
        }
    }
}
