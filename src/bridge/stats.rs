//! Per-run counters. Owned by the bridge loop and copied out in status frames.
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub qsos_received: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
    pub decode_failures: u64,
}

impl SessionCounters {
    pub fn record_qso(&mut self) {
        self.qsos_received = self.qsos_received.saturating_add(1);
    }

    pub fn record_upload_success(&mut self) {
        self.uploads_succeeded = self.uploads_succeeded.saturating_add(1);
    }

    pub fn record_upload_failure(&mut self) {
        self.uploads_failed = self.uploads_failed.saturating_add(1);
    }

    pub fn record_decode_failure(&mut self) {
        self.decode_failures = self.decode_failures.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_only_grow() {
        let mut c = SessionCounters::default();
        c.record_qso();
        c.record_qso();
        c.record_upload_success();
        c.record_upload_failure();
        c.record_decode_failure();
        assert_eq!(
            c,
            SessionCounters {
                qsos_received: 2,
                uploads_succeeded: 1,
                uploads_failed: 1,
                decode_failures: 1,
            }
        );
    }
}
