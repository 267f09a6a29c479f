//! Crossref-style registrar protocol: deposit-document validation and
//! envelope construction, multipart submission, and result-document polling.

pub mod client;
pub mod deposit;
pub mod xml;

pub use client::{parse_poll_response, HttpRegistrarClient, PollOutcome, RegistrarTransport};
pub use deposit::{build_submission, validate_body, Deposit};
