//! Shared application state and the daemon lifecycle.
//!
//! Configuration is an immutable snapshot behind a lock of an `Arc`; a
//! reload swaps the whole snapshot atomically and bumps the daemon
//! generation, which retires the running daemon at its next checkpoint and
//! starts a replacement built against the new snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use mintage_domain::config::Config;
use mintage_domain::Result;
use mintage_registrar::HttpRegistrarClient;
use mintage_store::{Binder, FileBinder, RegistrationQueue};

use crate::coordinator::Coordinator;
use crate::daemon::RegistrationDaemon;
use crate::external::datacite::{DoiRegistrar, NoopDoiRegistrar};
use crate::external::identity::IdentityDirectory;
use crate::external::minter::{Minter, NoidMinter};
use crate::notify::{Notifier, SmtpNotifier};

/// The process-wide configuration snapshot, swapped whole on reload.
pub type ConfigHandle = Arc<RwLock<Arc<Config>>>;

/// Shared service state.
///
/// Fields are grouped by concern:
/// - **Stores** — binder, registration queue
/// - **Coordination** — per-identifier locks, the coordinator
/// - **External collaborators** — identity directory, DataCite seam, mail
/// - **Daemon lifecycle** — generation counter
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigHandle,

    // ── Stores ────────────────────────────────────────────────────────
    pub binder: Arc<dyn Binder>,
    pub queue: Arc<RegistrationQueue>,

    // ── Coordination ──────────────────────────────────────────────────
    pub locks: Arc<crate::locks::IdentifierLocks>,
    pub coordinator: Arc<Coordinator>,

    // ── External collaborators ────────────────────────────────────────
    pub directory: Arc<IdentityDirectory>,
    pub datacite: Arc<dyn DoiRegistrar>,
    pub notifier: Option<Arc<dyn Notifier>>,

    // ── Daemon lifecycle ──────────────────────────────────────────────
    pub daemon_generation: Arc<AtomicU64>,
}

impl AppState {
    /// Build the service state from a configuration.
    pub fn build(config: Config) -> Result<Self> {
        let state_dir = config.bind_noid.clone();
        let mail_enabled = config.mail.enabled;
        let mail_cfg = config.mail.clone();

        let config: ConfigHandle = Arc::new(RwLock::new(Arc::new(config)));
        let binder: Arc<dyn Binder> = Arc::new(FileBinder::open(&state_dir)?);
        let queue = Arc::new(RegistrationQueue::open(&state_dir)?);
        let locks = Arc::new(crate::locks::IdentifierLocks::new());
        let directory = Arc::new(IdentityDirectory::new(config.clone()));
        let datacite: Arc<dyn DoiRegistrar> = Arc::new(NoopDoiRegistrar::new());
        let minter: Arc<dyn Minter> = Arc::new(NoidMinter::new()?);
        let notifier: Option<Arc<dyn Notifier>> = if mail_enabled {
            Some(Arc::new(SmtpNotifier::new(&mail_cfg)?))
        } else {
            None
        };

        let coordinator = Arc::new(Coordinator::new(
            config.clone(),
            binder.clone(),
            queue.clone(),
            locks.clone(),
            minter,
            directory.clone(),
            datacite.clone(),
        ));

        Ok(Self {
            config,
            binder,
            queue,
            locks,
            coordinator,
            directory,
            datacite,
            notifier,
            daemon_generation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Retire any running registration daemon and, when the registrar block
    /// allows it, start the next generation.
    pub fn spawn_registration_daemon(&self) -> Result<Option<tokio::task::JoinHandle<()>>> {
        let generation = self.daemon_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cfg = self.config.read().clone();
        if !(cfg.registrar.enabled && cfg.registrar.daemon_enabled) {
            tracing::info!("registration daemon disabled by configuration");
            return Ok(None);
        }
        let transport = Arc::new(HttpRegistrarClient::new(&cfg.registrar)?);
        let daemon = Arc::new(RegistrationDaemon::new(
            cfg,
            self.queue.clone(),
            self.coordinator.clone(),
            transport,
            self.directory.clone(),
            self.notifier.clone(),
            generation,
            self.daemon_generation.clone(),
        ));
        Ok(Some(daemon.spawn()))
    }

    /// Swap in a new configuration snapshot and restart the daemon against
    /// it. The pre-reload daemon exits at its next abort checkpoint.
    pub fn reload(&self, new_config: Config) -> Result<()> {
        *self.config.write() = Arc::new(new_config);
        tracing::info!("configuration snapshot swapped");
        self.spawn_registration_daemon()?;
        Ok(())
    }
}
