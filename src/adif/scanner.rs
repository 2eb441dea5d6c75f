//! Cursor based scanner for ADIF tagged fields.
//!
//! The scanner walks the payload once, tracking its position and the bytes
//! remaining. For every `<NAME:LENGTH[:TYPE]>` header it consumes exactly
//! `LENGTH` bytes of value without inspecting them, so values containing tag
//! look-alikes decode verbatim. Anything between fields (whitespace, header
//! prose) is skipped up to the next `<`.
use super::{Charset, ContactRecord, DecodeError};

/// Upper bound on the bytes between `<` and `>` of a single tag header.
const MAX_TAG_HEADER: usize = 64;

/// Longest decimal length accepted (keeps the parse well inside `usize`).
const MAX_LENGTH_DIGITS: usize = 7;

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Field { name: String, value: &'a [u8] },
    EndOfHeader,
    EndOfRecord,
}

struct Scanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Next token, `None` once only non-tag bytes remain.
    fn next_token(&mut self) -> Option<Result<Token<'a>, DecodeError>> {
        let skip = self.buf[self.pos..].iter().position(|&b| b == b'<')?;
        let open = self.pos + skip;
        let close = match self.buf[open + 1..].iter().position(|&b| b == b'>') {
            Some(rel) => open + 1 + rel,
            None => return Some(Err(malformed(open, "unterminated tag"))),
        };
        let header = &self.buf[open + 1..close];
        if header.len() > MAX_TAG_HEADER {
            return Some(Err(malformed(open, "tag header too long")));
        }

        let mut parts = header.split(|&b| b == b':');
        let name = parts.next().unwrap_or_default();
        if name.is_empty() || !name.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_') {
            return Some(Err(malformed(open, "invalid tag name")));
        }
        let name = String::from_utf8_lossy(name).to_ascii_lowercase();
        self.pos = close + 1;

        let Some(len_bytes) = parts.next() else {
            return Some(Ok(match name.as_str() {
                "eor" => Token::EndOfRecord,
                "eoh" => Token::EndOfHeader,
                // Valueless tags we don't know are skipped like unknown fields.
                _ => Token::Field { name, value: &[] },
            }));
        };
        // An optional third part is the ADIF data type indicator; it carries
        // no information we need.
        let len = match parse_length(len_bytes) {
            Some(len) => len,
            None => return Some(Err(malformed(open, "invalid field length"))),
        };
        if len > self.remaining() {
            return Some(Err(malformed(open, "field value runs past end of payload")));
        }
        let value = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(Ok(Token::Field { name, value }))
    }
}

fn malformed(offset: usize, reason: &'static str) -> DecodeError {
    DecodeError::Malformed { offset, reason }
}

fn parse_length(digits: &[u8]) -> Option<usize> {
    if digits.is_empty()
        || digits.len() > MAX_LENGTH_DIGITS
        || !digits.iter().all(u8::is_ascii_digit)
    {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn apply_field(record: &mut ContactRecord, name: &str, value: &[u8]) {
    let text = record.charset.decode(value);
    let optional = |t: String| if t.is_empty() { None } else { Some(t) };
    match name {
        "call" => record.callsign = text,
        "mode" => record.mode = text,
        "submode" => record.submode = text,
        "band" => record.band = text,
        "freq" => record.frequency = text,
        "gridsquare" => record.grid_square = optional(text),
        "qso_date" => record.qso_date = text,
        "time_on" => record.time_on = text,
        "qso_date_off" => record.qso_date_off = text,
        "time_off" => record.time_off = text,
        "rst_sent" => record.rst_sent = text,
        "rst_rcvd" => record.rst_rcvd = text,
        "name" => record.name = text,
        "station_callsign" => record.station_callsign = text,
        "my_gridsquare" => record.my_grid_square = text,
        "tx_pwr" => record.tx_pwr = text,
        "comment" => record.comment = optional(text),
        _ => {}
    }
}

/// Build a record once its `<EOR>` is seen, so the charset is decided from
/// all of its values together.
fn build_record(fields: &[(String, &[u8])]) -> ContactRecord {
    let mut record = ContactRecord {
        charset: Charset::detect(fields.iter().map(|(_, v)| *v)),
        ..Default::default()
    };
    for (name, value) in fields {
        apply_field(&mut record, name, value);
    }
    record
}

/// Iterator over the records of one payload. Stops after the first
/// malformed tag since the cursor can no longer be trusted.
pub struct Records<'a> {
    scanner: Scanner<'a>,
    emitted: usize,
    finished: bool,
}

impl<'a> Records<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            scanner: Scanner::new(payload),
            emitted: 0,
            finished: false,
        }
    }
}

impl Iterator for Records<'_> {
    type Item = Result<ContactRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut fields: Vec<(String, &[u8])> = Vec::new();
        loop {
            match self.scanner.next_token() {
                Some(Ok(Token::Field { name, value })) => fields.push((name, value)),
                Some(Ok(Token::EndOfHeader)) => fields.clear(),
                Some(Ok(Token::EndOfRecord)) => {
                    self.emitted += 1;
                    let record = build_record(&fields);
                    return Some(record.validate().map(|_| record));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    if !fields.is_empty() {
                        return Some(Err(malformed(
                            self.scanner.buf.len(),
                            "record not terminated by <EOR>",
                        )));
                    }
                    if self.emitted == 0 {
                        return Some(Err(malformed(0, "no record in payload")));
                    }
                    return None;
                }
            }
        }
    }
}

/// Decode the first record in `payload`.
pub fn decode(payload: &[u8]) -> Result<ContactRecord, DecodeError> {
    Records::new(payload)
        .next()
        .unwrap_or(Err(malformed(0, "no record in payload")))
}

/// Decode every record in `payload`. A datagram may batch several contacts.
pub fn decode_all(payload: &[u8]) -> Vec<Result<ContactRecord, DecodeError>> {
    Records::new(payload).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &[u8] = b"<CALL:5>W1AW0<QSO_DATE:8>20250101<TIME_ON:6>123456<BAND:3>20m<MODE:3>FT8<RST_SENT:2>-5<RST_RCVD:2>-7<EOR>";

    #[test]
    fn decodes_reference_payload() {
        let r = decode(SCENARIO).expect("decode");
        assert_eq!(r.callsign, "W1AW0");
        assert_eq!(r.band, "20m");
        assert_eq!(r.mode, "FT8");
        assert_eq!(r.qso_date, "20250101");
        assert_eq!(r.time_on, "123456");
        assert_eq!(r.rst_sent, "-5");
        assert_eq!(r.rst_rcvd, "-7");
        assert_eq!(r.grid_square, None);
        assert_eq!(r.comment, None);
        assert_eq!(r.received_at, None);
    }

    #[test]
    fn value_with_tag_syntax_is_taken_verbatim() {
        let comment = "tnx <EOR> 73 <CALL:4>XXXX";
        let payload = format!(
            "<call:4>K1AB<comment:{}>{}<qso_date:8>20240229<time_on:4>0915<eor>",
            comment.len(),
            comment
        );
        let r = decode(payload.as_bytes()).expect("decode");
        assert_eq!(r.callsign, "K1AB");
        assert_eq!(r.comment.as_deref(), Some(comment));
        assert_eq!(r.time_on, "0915");
    }

    #[test]
    fn multibyte_lengths_count_bytes() {
        let name = "José";
        let payload = format!(
            "<CALL:4>EA1X<NAME:{}>{}<QSO_DATE:8>20250101<TIME_ON:6>000000<EOR>",
            name.len(),
            name
        );
        let r = decode(payload.as_bytes()).expect("decode");
        assert_eq!(r.name, "José");
        assert_eq!(r.charset, Charset::Utf8);
    }

    #[test]
    fn eight_bit_values_are_kept_exactly() {
        let payload = b"<CALL:4>F1AB<COMMENT:7>tnx Jo\xE9<QSO_DATE:8>20250101<TIME_ON:6>123456<EOR>";
        let r = decode(payload).expect("decode");
        assert_eq!(r.charset, Charset::Latin1);
        assert_eq!(r.callsign, "F1AB");
        let comment = r.comment.as_deref().expect("comment");
        assert_eq!(comment, "tnx Jo\u{e9}");
        assert!(!comment.contains('\u{FFFD}'));
        assert_eq!(r.charset.encode(comment).as_ref(), b"tnx Jo\xE9");
    }

    #[test]
    fn header_and_type_indicators_are_handled() {
        let payload = b"WSJT-X ADIF Export<adif_ver:5>3.1.0 <programid:6>WSJT-X <EOH>\n\
            <call:5>W1AW0 <gridsquare:4>FN31 <freq:9>14.075123 <qso_date:8:D>20250101 \
            <time_on:6>123456 <time_off:6>123600 <band:3>20m <mode:3>FT8 <EOR>";
        let r = decode(payload).expect("decode");
        assert_eq!(r.grid_square.as_deref(), Some("FN31"));
        assert_eq!(r.frequency, "14.075123");
        assert_eq!(r.time_off, "123600");
        assert_eq!(r.display_time(), "123600");
    }

    #[test]
    fn unknown_tags_are_ignored() {
        let payload = b"<APP_FUTURE_FIELD:3>abc<CALL:4>N0CA<X_FLAG><QSO_DATE:8>20250101<TIME_ON:6>010203<EOR>";
        assert_eq!(decode(payload).expect("decode").callsign, "N0CA");
    }

    #[test]
    fn missing_callsign_is_reported() {
        let payload = b"<QSO_DATE:8>20250101<TIME_ON:6>123456<BAND:3>20m<EOR>";
        assert_eq!(decode(payload), Err(DecodeError::MissingField("CALL")));
    }

    #[test]
    fn missing_time_is_reported() {
        let payload = b"<CALL:4>K1AB<QSO_DATE:8>20250101<EOR>";
        assert_eq!(decode(payload), Err(DecodeError::MissingField("TIME_ON")));
    }

    #[test]
    fn length_past_end_is_malformed() {
        let payload = b"<CALL:40>W1AW<EOR>";
        assert!(matches!(
            decode(payload),
            Err(DecodeError::Malformed { offset: 0, .. })
        ));
    }

    #[test]
    fn broken_tags_are_malformed() {
        for payload in [
            &b"<CALL:5W1AW0<EOR>"[..],
            b"<CALL:>W1AW0<EOR>",
            b"<CALL:x5>W1AW0<EOR>",
            b"<:5>W1AW0<EOR>",
            b"<CALL:5>W1AW0<EOR",
            b"",
            b"   ",
        ] {
            assert!(
                matches!(decode(payload), Err(DecodeError::Malformed { .. })),
                "expected malformed for {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn unterminated_record_is_malformed() {
        let payload = b"<CALL:4>K1AB<QSO_DATE:8>20250101<TIME_ON:6>123456";
        assert!(matches!(
            decode(payload),
            Err(DecodeError::Malformed {
                reason: "record not terminated by <EOR>",
                ..
            })
        ));
    }

    #[test]
    fn batches_decode_independently() {
        let payload = b"<CALL:4>K1AB<QSO_DATE:8>20250101<TIME_ON:6>123456<EOR>\n\
            <BAND:3>40m<EOR>\n\
            <CALL:4>K2CD<QSO_DATE:8>20250101<TIME_ON:6>123700<EOR>\n";
        let results = decode_all(payload);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().map(|r| r.callsign.as_str()), Ok("K1AB"));
        assert_eq!(results[1], Err(DecodeError::MissingField("CALL")));
        assert_eq!(results[2].as_ref().map(|r| r.callsign.as_str()), Ok("K2CD"));
    }

    #[test]
    fn batch_stops_at_first_malformed_tag() {
        let payload = b"<CALL:4>K1AB<QSO_DATE:8>20250101<TIME_ON:6>123456<EOR><CALL:99>K2";
        let results = decode_all(payload);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(DecodeError::Malformed { offset: 54, .. })));
    }
}
