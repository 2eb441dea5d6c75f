//! # ADIF Tagged-Field Records
//!
//! WSJT-X broadcasts every logged contact as a short ADIF document over UDP.
//! Each field is encoded as `<NAME:LENGTH>VALUE` where `LENGTH` is the byte
//! count of `VALUE`, and a record ends with `<EOR>`:
//!
//! ```text
//! <adif_ver:5>3.1.0 <programid:6>WSJT-X <EOH>
//! <call:5>W1AW0 <gridsquare:4>FN31 <mode:3>FT8 <rst_sent:3>-05 <rst_rcvd:3>-07
//! <qso_date:8>20250101 <time_on:6>123456 <band:3>20m <freq:9>14.075123 <EOR>
//! ```
//!
//! ## Components
//!
//! - [`scanner`] - cursor based decoder producing [`ContactRecord`] values
//! - [`writer`] - re-encodes a record for the eQSL.cc upload form
//!
//! Lengths are authoritative. A value may legally contain `<`, `>` or `:` and
//! the scanner never looks inside it.

pub mod scanner;
pub mod writer;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;

pub use scanner::{decode, decode_all};
pub use writer::{encode_record, encode_upload};

/// Reasons a datagram could not be turned into a [`ContactRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Tag syntax is broken (no closing `>`, bad length, value runs past the payload...).
    #[error("malformed ADIF at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },

    /// A required field was absent when `<EOR>` was reached.
    #[error("record is missing required field {0}")]
    MissingField(&'static str),

    /// A required field was present but not in the expected shape (bad
    /// calendar date, clock time, or a callsign with embedded whitespace).
    /// Kept apart from `MissingField` so the log says which problem it was.
    #[error("record field {field} has invalid value '{value}'")]
    InvalidField { field: &'static str, value: String },
}

/// Character set of a record's field values.
///
/// WSJT-X sends UTF-8, but logs typed on a Windows codepage arrive as raw
/// 8-bit bytes. Such records are read as Latin-1, which maps every byte to
/// exactly one `char` and back, so no value is ever altered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
}

impl Charset {
    /// UTF-8 when every value is valid UTF-8, Latin-1 otherwise.
    pub fn detect<'a>(values: impl IntoIterator<Item = &'a [u8]>) -> Self {
        if values.into_iter().all(|v| std::str::from_utf8(v).is_ok()) {
            Charset::Utf8
        } else {
            Charset::Latin1
        }
    }

    pub fn decode(self, value: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(value).into_owned(),
            Charset::Latin1 => value.iter().map(|&b| char::from(b)).collect(),
        }
    }

    /// Bytes for `value` in this charset. A Latin-1 record edited to hold a
    /// character above U+00FF falls back to UTF-8 for that value.
    pub fn encode(self, value: &str) -> Cow<'_, [u8]> {
        match self {
            Charset::Latin1 if value.chars().all(|c| (c as u32) <= 0xFF) => {
                Cow::Owned(value.chars().map(|c| c as u8).collect())
            }
            _ => Cow::Borrowed(value.as_bytes()),
        }
    }
}

/// One logged contact as decoded from a WSJT-X broadcast.
///
/// Only `callsign`, `qso_date` and `time_on` are guaranteed; every other text
/// field is empty when the broadcaster left it out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContactRecord {
    pub callsign: String,
    pub mode: String,
    pub submode: String,
    pub band: String,
    /// Frequency in MHz exactly as broadcast (e.g. `14.075123`).
    pub frequency: String,
    pub grid_square: Option<String>,
    pub qso_date: String,
    pub time_on: String,
    pub qso_date_off: String,
    pub time_off: String,
    pub rst_sent: String,
    pub rst_rcvd: String,
    pub name: String,
    pub station_callsign: String,
    pub my_grid_square: String,
    pub tx_pwr: String,
    pub comment: Option<String>,
    /// How the broadcaster encoded the text values, so they re-encode to the
    /// same bytes.
    pub charset: Charset,
    /// Local capture time. Set by the listener, never taken from the payload.
    pub received_at: Option<DateTime<Utc>>,
}

impl ContactRecord {
    /// Attach the local capture timestamp.
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);
        self
    }

    /// Frequency parsed as MHz, if the broadcast carried a numeric value.
    pub fn frequency_mhz(&self) -> Option<f64> {
        self.frequency.trim().parse::<f64>().ok()
    }

    /// Time shown to the operator. WSJT-X logs when the contact ended, so
    /// `time_off` wins when present.
    pub fn display_time(&self) -> &str {
        if self.time_off.is_empty() {
            &self.time_on
        } else {
            &self.time_off
        }
    }

    /// Check the invariant every decoded record must satisfy.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.callsign.trim().is_empty() {
            return Err(DecodeError::MissingField("CALL"));
        }
        if self.callsign.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DecodeError::InvalidField {
                field: "CALL",
                value: self.callsign.clone(),
            });
        }
        if self.qso_date.is_empty() {
            return Err(DecodeError::MissingField("QSO_DATE"));
        }
        if !is_adif_date(&self.qso_date) {
            return Err(DecodeError::InvalidField {
                field: "QSO_DATE",
                value: self.qso_date.clone(),
            });
        }
        if self.time_on.is_empty() {
            return Err(DecodeError::MissingField("TIME_ON"));
        }
        if !is_adif_time(&self.time_on) {
            return Err(DecodeError::InvalidField {
                field: "TIME_ON",
                value: self.time_on.clone(),
            });
        }
        Ok(())
    }
}

/// `YYYYMMDD` naming a real calendar day.
pub fn is_adif_date(s: &str) -> bool {
    s.len() == 8
        && s.bytes().all(|b| b.is_ascii_digit())
        && NaiveDate::parse_from_str(s, "%Y%m%d").is_ok()
}

/// `HHMMSS`, or the shorter `HHMM` form ADIF also allows.
pub fn is_adif_time(s: &str) -> bool {
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match s.len() {
        6 => NaiveTime::parse_from_str(s, "%H%M%S").is_ok(),
        4 => NaiveTime::parse_from_str(&format!("{s}00"), "%H%M%S").is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ContactRecord {
        ContactRecord {
            callsign: "K5JCJ".into(),
            qso_date: "20250101".into(),
            time_on: "123456".into(),
            ..Default::default()
        }
    }

    #[test]
    fn minimal_record_is_valid() {
        assert_eq!(minimal().validate(), Ok(()));
    }

    #[test]
    fn blank_callsign_is_missing() {
        let mut r = minimal();
        r.callsign = "  ".into();
        assert_eq!(r.validate(), Err(DecodeError::MissingField("CALL")));
    }

    #[test]
    fn impossible_date_rejected() {
        let mut r = minimal();
        r.qso_date = "20251332".into();
        assert!(matches!(
            r.validate(),
            Err(DecodeError::InvalidField { field: "QSO_DATE", .. })
        ));
    }

    #[test]
    fn short_time_form_accepted() {
        assert!(is_adif_time("0915"));
        assert!(is_adif_time("235959"));
        assert!(!is_adif_time("246000"));
        assert!(!is_adif_time("12:34"));
    }

    #[test]
    fn display_time_prefers_time_off() {
        let mut r = minimal();
        assert_eq!(r.display_time(), "123456");
        r.time_off = "123530".into();
        assert_eq!(r.display_time(), "123530");
    }

    #[test]
    fn latin1_maps_every_byte_both_ways() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let text = Charset::Latin1.decode(&bytes);
        assert_eq!(text.chars().count(), 256);
        assert_eq!(Charset::Latin1.encode(&text).as_ref(), bytes.as_slice());
    }

    #[test]
    fn charset_detection() {
        assert_eq!(Charset::detect([&b"Jos\xC3\xA9"[..], &b"FT8"[..]]), Charset::Utf8);
        assert_eq!(Charset::detect([&b"Jos\xE9"[..], &b"FT8"[..]]), Charset::Latin1);
        assert_eq!(Charset::Latin1.encode("\u{4E16}").as_ref(), "\u{4E16}".as_bytes());
    }

    #[test]
    fn frequency_parses_when_numeric() {
        let mut r = minimal();
        assert_eq!(r.frequency_mhz(), None);
        r.frequency = "14.075123".into();
        assert_eq!(r.frequency_mhz(), Some(14.075123));
    }
}
