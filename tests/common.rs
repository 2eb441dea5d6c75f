//! Test utilities & fixtures shared by the integration tests.

#![allow(dead_code)] // each test binary uses a different subset

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wsjtx2eqsl::adif::ContactRecord;
use wsjtx2eqsl::bridge::{Alert, Credentials, DisplaySink, RemoteError, StatusFrame, UploadClient};

/// A complete WSJT-X style logged-ADIF datagram for `call`.
pub fn logged_adif(call: &str, time_on: &str) -> Vec<u8> {
    format!(
        "<adif_ver:5>3.1.0<programid:6>WSJT-X<EOH>\
         <call:{}>{}<gridsquare:4>FN31<mode:3>FT8<rst_sent:3>-05<rst_rcvd:3>-07\
         <qso_date:8>20250101<time_on:6>{}<band:3>20m<freq:9>14.075123<EOR>",
        call.len(),
        call,
        time_on
    )
    .into_bytes()
}

pub fn contact(call: &str) -> ContactRecord {
    ContactRecord {
        callsign: call.to_string(),
        mode: "FT8".to_string(),
        band: "20m".to_string(),
        qso_date: "20250101".to_string(),
        time_on: "123456".to_string(),
        ..Default::default()
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("K5JCJ", "hunter22")
}

/// Upload client that answers from a script (Ok once the script runs out)
/// and records what it was asked to send.
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<(), RemoteError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Callsigns in the order upload was called (retries appear twice).
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadClient for ScriptedClient {
    async fn upload(
        &self,
        record: &ContactRecord,
        _credentials: &Credentials,
    ) -> Result<(), RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(record.callsign.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Everything a [`RecordingDisplay`] has been shown.
#[derive(Default)]
pub struct Recorded {
    pub frames: Vec<StatusFrame>,
    pub alerts: Vec<Alert>,
}

#[derive(Clone, Default)]
pub struct RecordingDisplay {
    pub seen: Arc<Mutex<Recorded>>,
}

impl RecordingDisplay {
    pub fn last_frame(&self) -> Option<StatusFrame> {
        self.seen.lock().unwrap().frames.last().cloned()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.seen.lock().unwrap().alerts.clone()
    }
}

impl DisplaySink for RecordingDisplay {
    fn render(&mut self, frame: &StatusFrame) {
        self.seen.lock().unwrap().frames.push(frame.clone());
    }

    fn alert(&mut self, alert: &Alert) {
        self.seen.lock().unwrap().alerts.push(alert.clone());
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn wait_until<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
