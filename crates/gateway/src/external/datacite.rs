//! DataCite-style DOI registrar seam.
//!
//! The DataCite submission pipeline is an external collaborator; the
//! coordinator only needs these operations. When `datacite.enabled` is off
//! the counting no-op below stands in, so the call sites stay live and the
//! status reporter still has an active-operation figure to show.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use mintage_domain::metadata::ElementMap;
use mintage_domain::Result;

#[async_trait]
pub trait DoiRegistrar: Send + Sync {
    /// Register a newly created DOI with its target URL.
    async fn register_identifier(&self, doi: &str, target: &str) -> Result<()>;

    /// Update the target URL of a registered DOI.
    async fn set_target_url(&self, doi: &str, target: &str) -> Result<()>;

    /// Push a metadata delta. Returns a user-visible error message when the
    /// registrar rejects the record, `None` on success.
    async fn upload_metadata(
        &self,
        doi: &str,
        current: &ElementMap,
        delta: &ElementMap,
    ) -> Result<Option<String>>;

    /// Validate a DataCite metadata record, returning its normalized form.
    fn validate_dcms_record(&self, qualified_id: &str, record: &str) -> Result<String>;

    /// DataCite operations currently in flight (status reporting).
    fn num_active_operations(&self) -> usize;
}

/// No-op registrar used while DataCite integration is disabled.
pub struct NoopDoiRegistrar {
    active: AtomicUsize,
}

impl Default for NoopDoiRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopDoiRegistrar {
    pub fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DoiRegistrar for NoopDoiRegistrar {
    async fn register_identifier(&self, doi: &str, target: &str) -> Result<()> {
        tracing::debug!(doi, target, "datacite disabled; registration skipped");
        Ok(())
    }

    async fn set_target_url(&self, doi: &str, target: &str) -> Result<()> {
        tracing::debug!(doi, target, "datacite disabled; target update skipped");
        Ok(())
    }

    async fn upload_metadata(
        &self,
        doi: &str,
        _current: &ElementMap,
        _delta: &ElementMap,
    ) -> Result<Option<String>> {
        tracing::debug!(doi, "datacite disabled; metadata upload skipped");
        Ok(None)
    }

    fn validate_dcms_record(&self, _qualified_id: &str, record: &str) -> Result<String> {
        Ok(record.to_owned())
    }

    fn num_active_operations(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
