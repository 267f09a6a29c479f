//! Minter adapter: opaque name generation under a configured shoulder.
//!
//! The production minter is a noid-style server reached over HTTP; the
//! sequence minter is the non-persistent stand-in used by tests and by
//! shoulders flagged for local experimentation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;

use mintage_domain::config::PrefixConfig;
use mintage_domain::trace::TraceEvent;
use mintage_domain::{Error, Result};

/// Obtains one fresh opaque name under a shoulder. Names are scheme-less and
/// begin with the shoulder's scheme-less prefix; durability (no double
/// minting) is the minter's responsibility.
#[async_trait]
pub trait Minter: Send + Sync {
    async fn mint(&self, shoulder: &PrefixConfig) -> Result<String>;
}

/// The scheme-less form of a qualified prefix (`ark:/13030/fk4` gives
/// `13030/fk4`, `doi:10.5060/` gives `10.5060/`).
pub fn scheme_less_prefix(prefix: &str) -> &str {
    prefix
        .strip_prefix("ark:/")
        .or_else(|| prefix.strip_prefix("doi:"))
        .or_else(|| prefix.strip_prefix("urn:uuid:"))
        .unwrap_or(prefix)
}

/// HTTP client for a noid-style minter server.
///
/// The protocol is one GET per draw: `<server>?mint%201`, answered with an
/// `id: <name>` line.
pub struct NoidMinter {
    http: Client,
}

impl NoidMinter {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Minter for NoidMinter {
    async fn mint(&self, shoulder: &PrefixConfig) -> Result<String> {
        if shoulder.minter.is_empty() {
            return Err(Error::MinterUnavailable);
        }
        let url = format!("{}?mint%201", shoulder.minter);

        let started = Instant::now();
        let result = async {
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| Error::Http(format!("minter request failed: {e}")))?;
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(Error::Http(format!("minter returned {status}: {body}")));
            }
            body.lines()
                .find_map(|line| line.strip_prefix("id:"))
                .map(|name| name.trim().to_owned())
                .filter(|name| !name.is_empty())
                .ok_or_else(|| Error::Http(format!("no id line in minter response: {body}")))
        }
        .await;

        TraceEvent::MinterCall {
            server: shoulder.minter.clone(),
            prefix: shoulder.prefix.clone(),
            ok: result.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        result
    }
}

/// Non-persistent minter: the shoulder's scheme-less prefix plus a counter.
pub struct SequenceMinter {
    next: AtomicU64,
}

impl Default for SequenceMinter {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceMinter {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Minter for SequenceMinter {
    async fn mint(&self, shoulder: &PrefixConfig) -> Result<String> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}{n}", scheme_less_prefix(&shoulder.prefix)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_less_prefix_strips_schemes() {
        assert_eq!(scheme_less_prefix("ark:/13030/fk4"), "13030/fk4");
        assert_eq!(scheme_less_prefix("doi:10.5060/"), "10.5060/");
        assert_eq!(scheme_less_prefix("urn:uuid:"), "");
    }

    #[tokio::test]
    async fn sequence_minter_stays_under_its_shoulder() {
        let minter = SequenceMinter::new();
        let shoulder = PrefixConfig {
            prefix: "ark:/13030/fk4".into(),
            minter: String::new(),
        };
        let a = minter.mint(&shoulder).await.unwrap();
        let b = minter.mint(&shoulder).await.unwrap();
        assert!(a.starts_with("13030/fk4"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn noid_minter_requires_a_server() {
        let minter = NoidMinter::new().unwrap();
        let shoulder = PrefixConfig {
            prefix: "ark:/13030/fk4".into(),
            minter: String::new(),
        };
        assert!(matches!(
            minter.mint(&shoulder).await,
            Err(Error::MinterUnavailable)
        ));
    }
}
