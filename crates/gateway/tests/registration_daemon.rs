//! Registration daemon state machine against a scripted registrar
//! transport.

use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mintage_domain::config::{AgentConfig, Config, PrefixConfig};
use mintage_domain::metadata::ElementMap;
use mintage_domain::Result;
use mintage_gateway::coordinator::{Coordinator, Outcome};
use mintage_gateway::daemon::RegistrationDaemon;
use mintage_gateway::external::datacite::NoopDoiRegistrar;
use mintage_gateway::external::identity::{Caller, IdentityDirectory};
use mintage_gateway::external::minter::SequenceMinter;
use mintage_gateway::locks::IdentifierLocks;
use mintage_gateway::notify::Notifier;
use mintage_gateway::state::ConfigHandle;
use mintage_registrar::{Deposit, PollOutcome, RegistrarTransport};
use mintage_store::{Binder, FileBinder, QueueStatus, RegistrationOp, RegistrationQueue};

const CROSSREF_NS: &str = "http://www.crossref.org/schema/4.4.0";

// ── scripted collaborators ────────────────────────────────────────────

#[derive(Default)]
struct ScriptedTransport {
    submits: Mutex<Vec<(Deposit, String)>>,
    poll_outcomes: Mutex<VecDeque<PollOutcome>>,
}

impl ScriptedTransport {
    fn push_outcome(&self, outcome: PollOutcome) {
        self.poll_outcomes.lock().unwrap().push_back(outcome);
    }

    fn submit_count(&self) -> usize {
        self.submits.lock().unwrap().len()
    }

    fn last_submit(&self) -> (Deposit, String) {
        self.submits.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl RegistrarTransport for ScriptedTransport {
    async fn submit(&self, deposit: &Deposit, doi: &str) -> Result<()> {
        self.submits
            .lock()
            .unwrap()
            .push((deposit.clone(), doi.to_owned()));
        Ok(())
    }

    async fn poll(&self, _batch_id: &str, _doi: &str) -> Result<PollOutcome> {
        Ok(self
            .poll_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PollOutcome::Unknown))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_owned(), subject.to_owned(), body.to_owned()));
        Ok(())
    }
}

// ── harness ───────────────────────────────────────────────────────────

struct Harness {
    coordinator: Arc<Coordinator>,
    binder: Arc<dyn Binder>,
    queue: Arc<RegistrationQueue>,
    directory: Arc<IdentityDirectory>,
    transport: Arc<ScriptedTransport>,
    notifier: Arc<RecordingNotifier>,
    config: ConfigHandle,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.bind_noid = dir.path().to_path_buf();
    cfg.base_url = "https://id.example.org".into();
    cfg.prefixes.insert(
        "doi".into(),
        PrefixConfig {
            prefix: "doi:10.5555/".into(),
            minter: "local".into(),
        },
    );
    cfg.directory.agents = vec![
        AgentConfig {
            name: "admin".into(),
            pid: "ark:/99166/p9admin".into(),
            kind: "user".into(),
            registrar_email: String::new(),
        },
        AgentConfig {
            name: "u".into(),
            pid: "ark:/99166/p9u".into(),
            kind: "user".into(),
            registrar_email: "u@example.edu".into(),
        },
    ];
    cfg.registrar.enabled = true;
    cfg.registrar.depositor_name = "Example Library".into();
    cfg.registrar.depositor_email = "ids@example.edu".into();
    cfg.registrar.username = "exl".into();
    cfg.registrar.password = "hunter2".into();

    let config: ConfigHandle = Arc::new(parking_lot::RwLock::new(Arc::new(cfg)));
    let binder: Arc<dyn Binder> = Arc::new(FileBinder::open(dir.path()).unwrap());
    let queue = Arc::new(RegistrationQueue::open(dir.path()).unwrap());
    let locks = Arc::new(IdentifierLocks::new());
    let directory = Arc::new(IdentityDirectory::new(config.clone()));
    let coordinator = Arc::new(Coordinator::new(
        config.clone(),
        binder.clone(),
        queue.clone(),
        locks,
        Arc::new(SequenceMinter::new()),
        directory.clone(),
        Arc::new(NoopDoiRegistrar::new()),
    ));

    Harness {
        coordinator,
        binder,
        queue,
        directory,
        transport: Arc::new(ScriptedTransport::default()),
        notifier: Arc::new(RecordingNotifier::default()),
        config,
        _dir: dir,
    }
}

fn daemon(h: &Harness, generation: u64, current: u64) -> RegistrationDaemon {
    RegistrationDaemon::new(
        h.config.read().clone(),
        h.queue.clone(),
        h.coordinator.clone(),
        h.transport.clone(),
        h.directory.clone(),
        Some(h.notifier.clone()),
        generation,
        Arc::new(AtomicU64::new(current)),
    )
}

fn crossref_body(doi: &str) -> String {
    format!(
        r#"<journal xmlns="{CROSSREF_NS}"><journal_metadata><full_title>Journal of Tests</full_title></journal_metadata><journal_article><titles><title>An Article</title></titles><doi_data><doi>{doi}</doi><resource>http://old.example.org</resource></doi_data></journal_article></journal>"#
    )
}

fn user(h: &Harness) -> Caller {
    h.directory.caller("u", None).unwrap()
}

/// Create a DOI and attach a crossref deposit body, enqueueing a `create`
/// registration intent.
async fn register_doi(h: &Harness, qid: &str) {
    let c = user(h);
    assert!(h
        .coordinator
        .create_identifier(&c, qid, Some("http://x"))
        .await
        .is_success());
    let mut elements = ElementMap::new();
    elements.insert(
        "crossref".into(),
        crossref_body(qid.strip_prefix("doi:").unwrap()),
    );
    assert!(h
        .coordinator
        .set_metadata(&c, qid, &elements, true)
        .await
        .is_success());
}

// ── scenarios ─────────────────────────────────────────────────────────

#[tokio::test]
async fn submit_then_success_retires_the_row() {
    let h = harness();
    register_doi(&h, "doi:10.5555/FOO").await;

    let rows = h.queue.list_in_seq_order().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, QueueStatus::Unsubmitted);
    assert_eq!(rows[0].operation, RegistrationOp::Create);
    assert_eq!(rows[0].owner, "ark:/99166/p9u");

    let d = daemon(&h, 1, 1);

    // First pass: U -> S with a batch id.
    d.process_queue_once().await;
    assert_eq!(h.transport.submit_count(), 1);
    let rows = h.queue.list_in_seq_order().await;
    assert_eq!(rows[0].status, QueueStatus::Submitted);
    let batch_id = rows[0].batch_id.clone().expect("batch id assigned");
    assert!(rows[0].submit_time.is_some());

    let (deposit, doi) = h.transport.last_submit();
    assert_eq!(doi, "10.5555/FOO");
    assert_eq!(deposit.batch_id, batch_id);
    assert!(deposit.envelope.contains("<doi>10.5555/FOO</doi>"));
    // The deposit resource is the stored ARK-side target.
    assert!(deposit
        .envelope
        .contains("<resource>https://id.example.org/id/ark:%2Fb5555%2Ffoo</resource>"));
    assert!(deposit.envelope.contains("<registrant>u</registrant>"));

    // Second pass: completed successfully; row retired, status written back.
    h.transport.push_outcome(PollOutcome::CompletedSuccessfully);
    d.process_queue_once().await;
    assert!(h.queue.is_empty().await);

    let stored = h.binder.get("ark:/b5555/foo").await.unwrap().unwrap();
    assert_eq!(stored.get("_cr").map(String::as_str), Some("CR_SUCCESS/"));
    // The write-back must not have re-enqueued anything.
    assert!(h.queue.is_empty().await);
    assert!(h.notifier.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn warning_with_conflicts_flags_row_and_mails_owner() {
    let h = harness();
    register_doi(&h, "doi:10.5555/BAR").await;

    let d = daemon(&h, 1, 1);
    d.process_queue_once().await;

    h.transport.push_outcome(PollOutcome::CompletedWithWarning(
        "dup\nconflict_id=42\nin conflict with: 10.5555/B\nin conflict with: 10.5555/C".into(),
    ));
    d.process_queue_once().await;

    let rows = h.queue.list_in_seq_order().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, QueueStatus::Warning);
    assert_eq!(
        rows[0].message.as_deref(),
        Some("dup\nconflict_id=42\nin conflict with: 10.5555/B\nin conflict with: 10.5555/C")
    );

    let stored = h.binder.get("ark:/b5555/bar").await.unwrap().unwrap();
    assert_eq!(
        stored.get("_cr").map(String::as_str),
        Some("CR_WARNING/dup conflict_id=42 in conflict with: 10.5555/B in conflict with: 10.5555/C")
    );

    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (to, subject, body) = &sent[0];
    assert_eq!(to, "u@example.edu");
    assert!(subject.contains("warning"));
    assert!(body.contains("doi:10.5555/BAR"));
    assert!(body.contains("dup"));
}

#[tokio::test]
async fn batch_still_in_progress_updates_message_only() {
    let h = harness();
    register_doi(&h, "doi:10.5555/WIP").await;

    let d = daemon(&h, 1, 1);
    d.process_queue_once().await;
    h.transport.push_outcome(PollOutcome::Submitted("in_process".into()));
    d.process_queue_once().await;

    let rows = h.queue.list_in_seq_order().await;
    assert_eq!(rows[0].status, QueueStatus::Submitted);
    assert_eq!(rows[0].message.as_deref(), Some("in_process"));

    // An unknown poll result leaves the row untouched for a later retry.
    h.transport.push_outcome(PollOutcome::Unknown);
    d.process_queue_once().await;
    assert_eq!(
        h.queue.list_in_seq_order().await[0].status,
        QueueStatus::Submitted
    );
}

#[tokio::test]
async fn superseded_rows_are_dropped_without_submission() {
    let h = harness();
    register_doi(&h, "doi:10.5555/DUP").await;

    // A second update for the same identifier supersedes the first intent.
    let c = user(&h);
    let mut elements = ElementMap::new();
    elements.insert("note".into(), "revised".into());
    assert!(h
        .coordinator
        .set_metadata(&c, "doi:10.5555/DUP", &elements, true)
        .await
        .is_success());
    assert_eq!(h.queue.count_for_identifier("doi:10.5555/DUP").await, 2);

    let d = daemon(&h, 1, 1);
    d.process_queue_once().await;

    // Only the later row survived, and only it was submitted.
    let rows = h.queue.list_in_seq_order().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].operation, RegistrationOp::Update);
    assert_eq!(rows[0].status, QueueStatus::Submitted);
    assert_eq!(h.transport.submit_count(), 1);
}

#[tokio::test]
async fn deleted_identifier_enqueues_withdrawing_delete() {
    let h = harness();
    register_doi(&h, "doi:10.5555/GONE").await;

    // Drain the create intent first.
    let d = daemon(&h, 1, 1);
    d.process_queue_once().await;
    h.transport.push_outcome(PollOutcome::CompletedSuccessfully);
    d.process_queue_once().await;
    assert!(h.queue.is_empty().await);

    let admin = h.directory.caller("admin", None).unwrap();
    assert!(h
        .coordinator
        .delete_identifier(&admin, "doi:10.5555/GONE")
        .await
        .is_success());
    let rows = h.queue.list_in_seq_order().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].operation, RegistrationOp::Delete);

    d.process_queue_once().await;
    // Delete deposits retire immediately; there is nothing left to poll.
    assert!(h.queue.is_empty().await);
    let (deposit, _) = h.transport.last_submit();
    assert!(deposit
        .envelope
        .contains("<resource>http://datacite.org/invalidDOI</resource>"));
    assert!(deposit
        .envelope
        .contains("<title>WITHDRAWN: An Article</title>"));
}

#[tokio::test]
async fn superseded_generation_does_not_touch_the_queue() {
    let h = harness();
    register_doi(&h, "doi:10.5555/OLD").await;

    // The daemon belongs to generation 1 but the live counter moved to 2.
    let d = daemon(&h, 1, 2);
    d.process_queue_once().await;

    assert_eq!(h.transport.submit_count(), 0);
    assert_eq!(
        h.queue.list_in_seq_order().await[0].status,
        QueueStatus::Unsubmitted
    );
}
