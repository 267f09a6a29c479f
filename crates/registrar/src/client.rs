//! Registrar HTTP client: multipart deposit submission and result-document
//! polling.
//!
//! The submit/poll pair sits behind [`RegistrarTransport`] so the
//! registration daemon can be driven against a scripted stand-in. The real
//! client routes test DOIs to the test server and wraps HTTP failures with
//! any response body appended to the error message.

use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use mintage_domain::config::RegistrarConfig;
use mintage_domain::trace::TraceEvent;
use mintage_domain::{Error, Result};

use crate::deposit::Deposit;
use crate::xml;

/// The acknowledgement phrase the deposit servlet returns on acceptance.
const SUBMIT_ACK: &str = "Your batch submission was successfully received.";

/// Outcome of polling a batch's result document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Batch still in progress; carries the reported batch status.
    Submitted(String),
    CompletedSuccessfully,
    /// Completed, at least one record diagnostic was a warning.
    CompletedWithWarning(String),
    /// Completed, at least one record diagnostic was a failure.
    CompletedWithFailure(String),
    /// Result document missing or unintelligible; try again later.
    Unknown,
}

impl PollOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::Submitted(_) => "submitted",
            PollOutcome::CompletedSuccessfully => "completed successfully",
            PollOutcome::CompletedWithWarning(_) => "completed with warning",
            PollOutcome::CompletedWithFailure(_) => "completed with failure",
            PollOutcome::Unknown => "unknown",
        }
    }
}

/// The registrar wire protocol, as the daemon consumes it.
#[async_trait]
pub trait RegistrarTransport: Send + Sync {
    /// Submit a deposit. `doi` is the scheme-less DOI (server routing).
    async fn submit(&self, deposit: &Deposit, doi: &str) -> Result<()>;

    /// Fetch and interpret the result document for a batch.
    async fn poll(&self, batch_id: &str, doi: &str) -> Result<PollOutcome>;
}

/// HTTP implementation of [`RegistrarTransport`].
///
/// Created once per daemon generation; the underlying `reqwest::Client`
/// maintains a connection pool.
pub struct HttpRegistrarClient {
    http: Client,
    cfg: RegistrarConfig,
}

impl HttpRegistrarClient {
    pub fn new(cfg: &RegistrarConfig) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            cfg: cfg.clone(),
        })
    }

    /// Test DOIs route to the test server, everything else to the real one.
    fn server_for(&self, doi: &str) -> &str {
        if self.cfg.test_prefixes.iter().any(|p| doi.starts_with(p.as_str())) {
            &self.cfg.test_server
        } else {
            &self.cfg.real_server
        }
    }
}

#[async_trait]
impl RegistrarTransport for HttpRegistrarClient {
    async fn submit(&self, deposit: &Deposit, doi: &str) -> Result<()> {
        let url = self
            .cfg
            .deposit_url
            .replacen("%s", self.server_for(doi), 1);
        let (content_type, payload) = multipart_payload(
            &self.cfg.username,
            &self.cfg.password,
            &deposit.batch_id,
            &deposit.envelope,
        );

        let started = Instant::now();
        let result = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .body(payload)
            .send()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                if !status.is_success() {
                    Err(Error::Http(format!(
                        "registrar deposit returned {status}: {body}"
                    )))
                } else if body.contains(SUBMIT_ACK) {
                    Ok(())
                } else {
                    Err(Error::Http(format!(
                        "registrar deposit not acknowledged: {body}"
                    )))
                }
            }
            Err(e) => Err(from_reqwest(e)),
        };

        TraceEvent::RegistrarSubmit {
            doi: doi.to_owned(),
            batch_id: deposit.batch_id.clone(),
            ok: outcome.is_ok(),
            duration_ms,
        }
        .emit();
        outcome
    }

    async fn poll(&self, batch_id: &str, doi: &str) -> Result<PollOutcome> {
        let url = self
            .cfg
            .results_url
            .replacen("%s", self.server_for(doi), 1);
        let file_name = format!("{batch_id}.xml");

        let started = Instant::now();
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("usr", self.cfg.username.as_str()),
                ("pwd", self.cfg.password.as_str()),
                ("file_name", file_name.as_str()),
                ("type", "result"),
            ])
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Http(format!(
                "registrar poll returned {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        let text = decode_declared_encoding(&bytes);
        let outcome = parse_poll_response(&text);
        TraceEvent::RegistrarPoll {
            batch_id: batch_id.to_owned(),
            outcome: outcome.label().to_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        Ok(outcome)
    }
}

/// Convert a `reqwest::Error` into a domain `Error`.
fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ── multipart body ────────────────────────────────────────────────────

/// Hand-built multipart/form-data payload.
///
/// `reqwest`'s multipart support picks its own boundary; the deposit servlet
/// is picky enough that we keep the boundary under our control and rejection-
/// sample it against every part.
fn multipart_payload(
    username: &str,
    password: &str,
    batch_id: &str,
    envelope: &str,
) -> (String, Vec<u8>) {
    let fields = [
        ("operation", "doMDUpload"),
        ("login_id", username),
        ("login_passwd", password),
    ];
    let boundary = pick_boundary(&[username, password, envelope]);

    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"fname\"; \
         filename=\"{batch_id}.xml\"\r\nContent-Type: application/xml; \
         charset=UTF-8\r\n\r\n{envelope}\r\n--{boundary}--\r\n"
    ));
    (
        format!("multipart/form-data; boundary={boundary}"),
        body.into_bytes(),
    )
}

/// A boundary that collides with no part, by rejection sampling.
fn pick_boundary(parts: &[&str]) -> String {
    loop {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let boundary = format!("BOUNDARY_{token}");
        if !parts.iter().any(|p| p.contains(&boundary)) {
            return boundary;
        }
    }
}

// ── result-document interpretation ────────────────────────────────────

fn encoding_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"encoding=["']([A-Za-z0-9._-]+)["']"#).expect("valid regex"))
}

/// Decode a result document per its declared XML encoding (UTF-8 otherwise).
fn decode_declared_encoding(bytes: &[u8]) -> String {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]).into_owned();
    if let Some(caps) = encoding_re().captures(&head) {
        if let Some(encoding) = encoding_rs::Encoding::for_label(caps[1].as_bytes()) {
            let (text, _, _) = encoding.decode(bytes);
            return text.into_owned();
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Interpret a `doi_batch_diagnostic` document.
///
/// Anything structurally unexpected maps to [`PollOutcome::Unknown`] so the
/// daemon retries instead of wedging a queue row on a garbled response.
pub fn parse_poll_response(text: &str) -> PollOutcome {
    let doc = match xml::parse(text) {
        Ok(doc) => doc,
        Err(_) => return PollOutcome::Unknown,
    };
    if doc.root.local != "doi_batch_diagnostic" {
        return PollOutcome::Unknown;
    }
    let batch_status = match doc.root.attr("status") {
        Some(s) => s.to_owned(),
        None => return PollOutcome::Unknown,
    };
    if batch_status != "completed" {
        return PollOutcome::Submitted(batch_status);
    }

    for record in doc.root.child_elements() {
        if record.local != "record_diagnostic" {
            continue;
        }
        let severity = match record.attr("status") {
            Some("Success") => continue,
            Some(s @ ("Warning" | "Failure")) => s.to_owned(),
            _ => return PollOutcome::Unknown,
        };

        let mut lines = Vec::new();
        if let Some(msg) = record.find_child("msg", None) {
            lines.push(msg.text().trim().to_owned());
        }
        if let Some(conflict_id) = record.find_child("conflict_id", None) {
            lines.push(format!("conflict_id={}", conflict_id.text().trim()));
        }
        if let Some(conflicts) = record.find_child("dois_in_conflict", None) {
            for doi in conflicts.child_elements() {
                if doi.local == "doi" {
                    lines.push(format!("in conflict with: {}", doi.text().trim()));
                }
            }
        }
        let message = lines.join("\n");
        return if severity == "Warning" {
            PollOutcome::CompletedWithWarning(message)
        } else {
            PollOutcome::CompletedWithFailure(message)
        };
    }
    PollOutcome::CompletedSuccessfully
}
