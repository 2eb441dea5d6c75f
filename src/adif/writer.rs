//! Re-encode a [`ContactRecord`] as ADIF for the eQSL.cc upload form.
//!
//! Output is bytes: each value is written in the record's [`Charset`], so a
//! decoded record re-encodes to the same VALUE bytes and lengths.
use super::{Charset, ContactRecord};

const ADIF_VERSION: &str = "3.1.4";

fn push_field(out: &mut Vec<u8>, name: &str, value: &str, charset: Charset) {
    if value.is_empty() {
        return;
    }
    let bytes = charset.encode(value);
    // Length is the byte count actually written, matching how the scanner consumes it.
    out.extend_from_slice(format!("<{}:{}>", name, bytes.len()).as_bytes());
    out.extend_from_slice(&bytes);
}

/// Encode one record terminated by `<EOR>`. Empty fields are omitted.
pub fn encode_record(record: &ContactRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    let cs = record.charset;
    push_field(&mut out, "CALL", &record.callsign, cs);
    push_field(&mut out, "QSO_DATE", &record.qso_date, cs);
    push_field(&mut out, "TIME_ON", &record.time_on, cs);
    push_field(&mut out, "QSO_DATE_OFF", &record.qso_date_off, cs);
    push_field(&mut out, "TIME_OFF", &record.time_off, cs);
    push_field(&mut out, "BAND", &record.band, cs);
    push_field(&mut out, "FREQ", &record.frequency, cs);
    push_field(&mut out, "MODE", &record.mode, cs);
    push_field(&mut out, "SUBMODE", &record.submode, cs);
    push_field(&mut out, "RST_SENT", &record.rst_sent, cs);
    push_field(&mut out, "RST_RCVD", &record.rst_rcvd, cs);
    push_field(&mut out, "GRIDSQUARE", record.grid_square.as_deref().unwrap_or(""), cs);
    push_field(&mut out, "NAME", &record.name, cs);
    push_field(&mut out, "STATION_CALLSIGN", &record.station_callsign, cs);
    push_field(&mut out, "MY_GRIDSQUARE", &record.my_grid_square, cs);
    push_field(&mut out, "TX_PWR", &record.tx_pwr, cs);
    push_field(&mut out, "COMMENT", record.comment.as_deref().unwrap_or(""), cs);
    out.extend_from_slice(b"<EOR>");
    out
}

/// Encode a complete single-record ADIF document (header + record) as the
/// `ADIFData` form value.
pub fn encode_upload(record: &ContactRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(320);
    push_field(&mut out, "ADIF_VER", ADIF_VERSION, Charset::Utf8);
    push_field(&mut out, "PROGRAMID", env!("CARGO_PKG_NAME"), Charset::Utf8);
    push_field(&mut out, "PROGRAMVERSION", env!("CARGO_PKG_VERSION"), Charset::Utf8);
    out.extend_from_slice(b"<EOH>\n");
    out.extend_from_slice(&encode_record(record));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adif::decode;

    fn sample() -> ContactRecord {
        ContactRecord {
            callsign: "W1AW0".into(),
            mode: "FT8".into(),
            band: "20m".into(),
            frequency: "14.075123".into(),
            grid_square: Some("FN31".into()),
            qso_date: "20250101".into(),
            time_on: "123456".into(),
            rst_sent: "-05".into(),
            rst_rcvd: "-07".into(),
            comment: Some("<EOR> in a comment, 73 de José".into()),
            ..Default::default()
        }
    }

    #[test]
    fn record_encoding_shape() {
        let encoded = String::from_utf8(encode_record(&sample())).expect("utf8");
        assert!(encoded.starts_with("<CALL:5>W1AW0<QSO_DATE:8>20250101<TIME_ON:6>123456"));
        assert!(encoded.ends_with("<EOR>"));
        assert!(!encoded.contains("TIME_OFF"));
        assert!(encoded.contains("<COMMENT:31>"));
    }

    #[test]
    fn upload_document_decodes_to_the_same_record() {
        let record = sample();
        let doc = encode_upload(&record);
        assert!(String::from_utf8_lossy(&doc).contains("<EOH>"));
        let decoded = decode(&doc).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn eight_bit_comment_keeps_its_bytes_and_length() {
        let payload = b"<CALL:4>F1AB<COMMENT:7>tnx Jo\xE9<QSO_DATE:8>20250101<TIME_ON:6>123456<EOR>";
        let record = decode(payload).expect("decode");
        let encoded = encode_record(&record);
        let needle = b"<COMMENT:7>tnx Jo\xE9";
        assert!(
            encoded.windows(needle.len()).any(|w| w == needle),
            "comment re-encoded as {:?}",
            String::from_utf8_lossy(&encoded)
        );
        assert_eq!(decode(&encoded).expect("decode again"), record);
    }
}
