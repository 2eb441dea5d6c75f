//! eQSL.cc upload client
//!
//! One contact is uploaded per request: an HTTP form POST to
//! `ImportADIF.cfm` carrying `EQSL_USER`, `EQSL_PSWD` and `ADIFData`.
//! eQSL.cc answers 200 for most outcomes and reports the real result in the
//! HTML body (`Result: 1 out of 1 records added`, or an `Error:` line), so the
//! body is always inspected.
//!
//! | outcome                                   | result                   |
//! |-------------------------------------------|--------------------------|
//! | timeout, connect/transport error, 5xx     | `RemoteError::Transient` |
//! | 4xx or other non-2xx                      | `RemoteError::Rejected`  |
//! | 2xx without a success marker              | `RemoteError::Rejected`  |
//! | 2xx with `Result: N` (N ≥ 1) or "success" | `Ok(())`                 |

use async_trait::async_trait;
use log::debug;
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::adif::{encode_upload, ContactRecord};
use crate::config::EqslConfig;
use crate::logutil::escape_log;

/// Everything but the form-urlencoded unreserved set gets escaped.
const FORM_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'*')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_');

/// Longest remote message carried in a [`RemoteError`].
const MAX_REMOTE_MESSAGE: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Worth retrying later: timeout, network trouble, server-side error.
    #[error("temporary upload failure: {0}")]
    Transient(String),
    /// The service refused this upload; retrying the same request won't help.
    #[error("eQSL.cc rejected the upload: {0}")]
    Rejected(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Anything that can deliver a contact to the remote log service.
#[async_trait]
pub trait UploadClient: Send + Sync {
    async fn upload(
        &self,
        record: &ContactRecord,
        credentials: &Credentials,
    ) -> Result<(), RemoteError>;
}

pub struct EqslClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl EqslClient {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout: request_timeout,
        })
    }

    pub fn from_config(config: &EqslConfig) -> anyhow::Result<Self> {
        Self::new(config.endpoint.clone(), config.timeout())
    }
}

#[async_trait]
impl UploadClient for EqslClient {
    async fn upload(
        &self,
        record: &ContactRecord,
        credentials: &Credentials,
    ) -> Result<(), RemoteError> {
        let adif = encode_upload(record);
        let body = form_body(&[
            ("EQSL_USER", credentials.username.as_bytes()),
            ("EQSL_PSWD", credentials.password.as_bytes()),
            ("ADIFData", adif.as_slice()),
        ]);
        debug!("Uploading {} to {}", record.callsign, self.endpoint);

        let request = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body);
        let exchange = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                RemoteError::Transient(format!(
                    "no response within {}s",
                    self.timeout.as_secs_f32()
                ))
            })?
            .map_err(|e| RemoteError::Transient(format!("HTTP request failed: {}", e)))?;

        debug!("eQSL.cc answered {} [{}]", status, escape_log(&body));
        interpret_response(status, &body)
    }
}

/// `application/x-www-form-urlencoded` body built from raw bytes, so 8-bit
/// ADIF values reach the server unchanged.
pub fn form_body(fields: &[(&str, &[u8])]) -> String {
    fields
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                percent_encode(name.as_bytes(), FORM_VALUE),
                percent_encode(value, FORM_VALUE)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Classify an HTTP status and body from `ImportADIF.cfm`.
pub fn interpret_response(status: u16, body: &str) -> Result<(), RemoteError> {
    match status {
        200..=299 if has_success_marker(body) => Ok(()),
        200..=299 => {
            let message = remote_message(body);
            if message.is_empty() {
                Err(RemoteError::Rejected("no result in response".to_string()))
            } else {
                Err(RemoteError::Rejected(message))
            }
        }
        500..=599 => Err(RemoteError::Transient(format!(
            "server error {}: {}",
            status,
            remote_message(body)
        ))),
        _ => {
            let message = remote_message(body);
            if message.is_empty() {
                Err(RemoteError::Rejected(format!("HTTP {}", status)))
            } else {
                Err(RemoteError::Rejected(message))
            }
        }
    }
}

fn has_success_marker(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    let mut rest = lower.as_str();
    while let Some(idx) = rest.find("result:") {
        rest = &rest[idx + "result:".len()..];
        let digits: String = rest
            .trim_start()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if digits.parse::<u64>().map(|n| n >= 1).unwrap_or(false) {
            return true;
        }
    }
    lower.contains("success") && !lower.contains("unsuccessful")
}

/// Human-readable message from an HTML response: the first `Error:` or
/// `Warning:` line if there is one, otherwise all text, tags stripped.
pub fn remote_message(body: &str) -> String {
    let text = strip_markup(body);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let chosen = lines
        .iter()
        .find(|l| {
            let lower = l.to_ascii_lowercase();
            lower.contains("error") || lower.contains("warning")
        })
        .map(|l| l.to_string())
        .unwrap_or_else(|| lines.join(" "));
    chosen.chars().take(MAX_REMOTE_MESSAGE).collect()
}

fn strip_markup(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut in_tag = false;
    for ch in body.chars() {
        match ch {
            '<' => in_tag = true,
            // Every tag ends a line so adjacent text blocks stay apart.
            '>' if in_tag => {
                in_tag = false;
                out.push('\n');
            }
            _ if in_tag => {}
            c => out.push(c),
        }
    }
    out.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
