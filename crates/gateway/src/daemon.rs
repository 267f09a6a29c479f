//! Registration daemon: drains the queue through the submit, poll, finalize
//! state machine.
//!
//! One daemon generation runs at a time. A configuration reload bumps the
//! shared generation counter; the superseded daemon notices at its next
//! checkpoint and exits without touching anything further. Checkpoints sit
//! before every mutation (save, delete, write-back, mail), so retirement is
//! prompt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use mintage_domain::config::Config;
use mintage_domain::metadata::{self, ElementMap};
use mintage_domain::trace::TraceEvent;
use mintage_domain::Result;
use mintage_registrar::{build_submission, PollOutcome, RegistrarTransport};
use mintage_store::{QueueEntry, QueueStatus, RegistrationOp, RegistrationQueue};

use crate::coordinator::{Coordinator, Outcome};
use crate::external::identity::IdentityDirectory;
use crate::notify::Notifier;

/// Resource URL submitted for delete deposits; nothing resolvable remains.
const DELETE_SENTINEL_TARGET: &str = "http://datacite.org/invalidDOI";

pub struct RegistrationDaemon {
    config: Arc<Config>,
    queue: Arc<RegistrationQueue>,
    coordinator: Arc<Coordinator>,
    transport: Arc<dyn RegistrarTransport>,
    directory: Arc<IdentityDirectory>,
    notifier: Option<Arc<dyn Notifier>>,
    /// Generation this daemon belongs to.
    generation: u64,
    /// Live generation counter; when it moves past ours, we retire.
    current_generation: Arc<AtomicU64>,
    /// Fast-path cursor: skip a pass when nothing was enqueued since.
    last_max_seq: Mutex<Option<u64>>,
}

impl RegistrationDaemon {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        queue: Arc<RegistrationQueue>,
        coordinator: Arc<Coordinator>,
        transport: Arc<dyn RegistrarTransport>,
        directory: Arc<IdentityDirectory>,
        notifier: Option<Arc<dyn Notifier>>,
        generation: u64,
        current_generation: Arc<AtomicU64>,
    ) -> Self {
        Self {
            config,
            queue,
            coordinator,
            transport,
            directory,
            notifier,
            generation,
            current_generation,
            last_max_seq: Mutex::new(None),
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        tracing::info!(generation = self.generation, "registration daemon started");
        loop {
            tokio::time::sleep(Duration::from_secs(self.config.registrar.idle_sleep)).await;
            if self.retired() {
                break;
            }
            self.process_queue_once().await;
            if self.retired() {
                break;
            }
        }
        tracing::info!(generation = self.generation, "registration daemon retired");
    }

    fn retired(&self) -> bool {
        self.current_generation.load(Ordering::SeqCst) != self.generation
    }

    /// One pass over the queue. Public so tests can drive the state machine
    /// without the sleep loop.
    pub async fn process_queue_once(&self) {
        let max_seq = self.queue.max_seq().await;
        if *self.last_max_seq.lock() == Some(max_seq) {
            return;
        }
        let rows = self.queue.list_in_seq_order().await;
        let mut settled = true;

        for row in rows {
            if self.retired() {
                return;
            }
            if self.queue.count_for_identifier(&row.identifier).await > 1 {
                // A newer intent exists for this identifier; the earlier row
                // is superseded, whatever its state.
                if let Err(e) = self.queue.delete(row.seq).await {
                    tracing::warn!(seq = row.seq, error = %e, "failed to drop superseded row");
                }
                TraceEvent::QueueTransition {
                    seq: row.seq,
                    identifier: row.identifier.clone(),
                    from: row.status.to_string(),
                    to: "superseded".to_owned(),
                }
                .emit();
                settled = false;
                continue;
            }
            let result = match row.status {
                QueueStatus::Unsubmitted => {
                    settled = false;
                    self.do_deposit(row).await
                }
                QueueStatus::Submitted => {
                    settled = false;
                    self.do_poll(row).await
                }
                QueueStatus::Warning | QueueStatus::Failure => Ok(()),
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "registration pass error; row left for retry");
            }
        }

        // Arm the fast path only once every remaining row is terminal; rows
        // awaiting submission or polling must be revisited next pass.
        *self.last_max_seq.lock() = if settled { Some(max_seq) } else { None };
    }

    // ── deposit ───────────────────────────────────────────────────────

    async fn do_deposit(&self, mut row: QueueEntry) -> Result<()> {
        let Some(body) = row.blob.get("crossref").cloned() else {
            tracing::warn!(
                seq = row.seq,
                identifier = %row.identifier,
                "queue row has no crossref element; skipping"
            );
            return Ok(());
        };
        let registrant = self.directory.agent_name(&row.owner);
        let doi = row
            .identifier
            .strip_prefix("doi:")
            .unwrap_or(&row.identifier)
            .to_owned();

        let is_delete = row.operation == RegistrationOp::Delete;
        let target = if is_delete {
            DELETE_SENTINEL_TARGET.to_owned()
        } else {
            row.blob.get(metadata::TARGET).cloned().unwrap_or_default()
        };
        let withdraw = is_delete
            || row
                .blob
                .get(metadata::STATUS)
                .map(|s| s.starts_with("unavailable"))
                .unwrap_or(false);

        let deposit = build_submission(
            &self.config.registrar,
            &body,
            &registrant,
            &doi,
            &target,
            withdraw,
            false,
        )?;

        if self.retired() {
            return Ok(());
        }
        match self.transport.submit(&deposit, &doi).await {
            Ok(()) => {
                if is_delete {
                    // Once the registrar accepts a delete there is nothing
                    // left to poll for.
                    self.queue.delete(row.seq).await?;
                } else {
                    row.status = QueueStatus::Submitted;
                    row.batch_id = Some(deposit.batch_id.clone());
                    row.submit_time = Some(Utc::now().timestamp());
                    TraceEvent::QueueTransition {
                        seq: row.seq,
                        identifier: row.identifier.clone(),
                        from: "U".to_owned(),
                        to: "S".to_owned(),
                    }
                    .emit();
                    self.queue.save(row).await?;
                }
                Ok(())
            }
            // Leave the row unsubmitted; the next pass retries.
            Err(e) => Err(e),
        }
    }

    // ── poll ──────────────────────────────────────────────────────────

    async fn do_poll(&self, mut row: QueueEntry) -> Result<()> {
        let Some(batch_id) = row.batch_id.clone() else {
            tracing::warn!(seq = row.seq, "submitted row has no batch id; skipping");
            return Ok(());
        };
        let doi = row
            .identifier
            .strip_prefix("doi:")
            .unwrap_or(&row.identifier)
            .to_owned();
        let outcome = self.transport.poll(&batch_id, &doi).await?;

        if self.retired() {
            return Ok(());
        }
        match outcome {
            PollOutcome::Submitted(batch_status) => {
                row.message = Some(batch_status);
                self.queue.save(row).await
            }
            PollOutcome::CompletedSuccessfully => {
                if row.operation != RegistrationOp::Delete {
                    self.write_back(&row, "CR_SUCCESS/".to_owned()).await;
                }
                if self.retired() {
                    return Ok(());
                }
                self.queue.delete(row.seq).await?;
                Ok(())
            }
            PollOutcome::CompletedWithWarning(message) => {
                self.finish_flagged(row, QueueStatus::Warning, "CR_WARNING", message)
                    .await
            }
            PollOutcome::CompletedWithFailure(message) => {
                self.finish_flagged(row, QueueStatus::Failure, "CR_FAILURE", message)
                    .await
            }
            PollOutcome::Unknown => Ok(()),
        }
    }

    async fn finish_flagged(
        &self,
        mut row: QueueEntry,
        status: QueueStatus,
        label: &str,
        message: String,
    ) -> Result<()> {
        self.write_back(&row, format!("{label}/{}", one_line(&message)))
            .await;

        if self.retired() {
            return Ok(());
        }
        let from = row.status.to_string();
        row.status = status;
        row.message = Some(message.clone());
        TraceEvent::QueueTransition {
            seq: row.seq,
            identifier: row.identifier.clone(),
            from,
            to: status.to_string(),
        }
        .emit();
        self.queue.save(row.clone()).await?;

        if let (Some(notifier), Some(email)) = (
            self.notifier.as_ref(),
            self.directory.registrar_email(&row.owner),
        ) {
            if self.retired() {
                return Ok(());
            }
            let display = match status {
                QueueStatus::Warning => "completed with warning",
                _ => "completed with failure",
            };
            let subject = format!("Crossref registration {display}");
            let body = format!(
                "Identifier: {}\nStatus: {display}\n\n{message}\n",
                row.identifier
            );
            if let Err(e) = notifier.notify(&email, &subject, &body).await {
                tracing::warn!(error = %e, to = %email, "registrar notification mail failed");
            }
        }
        Ok(())
    }

    /// Write registrar status back into the identifier's metadata, as the
    /// admin, with external services suppressed so nothing re-enqueues.
    async fn write_back(&self, row: &QueueEntry, value: String) {
        let mut elements = ElementMap::new();
        elements.insert("_crossref".to_owned(), value);
        let caller = self.directory.admin_caller();
        match self
            .coordinator
            .set_metadata(&caller, &row.identifier, &elements, false)
            .await
        {
            Outcome::Success { .. } => {}
            other => tracing::warn!(
                identifier = %row.identifier,
                outcome = ?other,
                "registrar status write-back did not succeed"
            ),
        }
    }
}

fn one_line(s: &str) -> String {
    s.replace(['\n', '\r'], " ").trim().to_owned()
}
