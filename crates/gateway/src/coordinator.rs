//! The identifier-operation coordinator: scheme-dispatched mint, create,
//! get, set, and delete, with shadow mapping, the reserved-element policy,
//! per-key locking, and timestamping.
//!
//! Every public operation runs under the per-identifier lock of its ARK
//! storage key and returns an [`Outcome`]; unexpected failures are logged
//! under a fresh transaction ID and collapse to `InternalError`.
//!
//! The `update_external_services` flag on [`Coordinator::set_metadata`]
//! breaks the cycle with the registration daemon: when the daemon writes
//! registrar status back into an element map, outbound registrar calls and
//! re-enqueueing are suppressed.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use mintage_domain::config::Config;
use mintage_domain::identifier::{self, Identifier, Scheme};
use mintage_domain::metadata::{self, ElementMap, Status};
use mintage_domain::{Error, Result};
use mintage_registrar::validate_body;
use mintage_store::{Binder, RegistrationOp, RegistrationQueue};

use crate::authz;
use crate::external::datacite::DoiRegistrar;
use crate::external::identity::{Caller, IdentityDirectory};
use crate::external::minter::{scheme_less_prefix, Minter};
use crate::locks::IdentifierLocks;
use crate::state::ConfigHandle;

/// Reserved transmitted names anyone may set.
const OPEN_RESERVED: &[&str] = &["_coowners", "_target", "_profile"];

/// Reserved transmitted names only the admin may set.
const ADMIN_RESERVED: &[&str] = &[
    "_owner",
    "_ownergroup",
    "_created",
    "_updated",
    "_status",
    "_crossref",
];

/// Result of one coordinator operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        payload: String,
        metadata: Option<ElementMap>,
    },
    Unauthorized,
    BadRequest(String),
    InternalError,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// The client-observable response string.
    pub fn render(&self) -> String {
        match self {
            Outcome::Success {
                payload,
                metadata: None,
            } => format!("success: {payload}"),
            Outcome::Success {
                payload,
                metadata: Some(map),
            } => format!("success: {payload}\n{}", metadata::to_anvl(map)),
            Outcome::Unauthorized => "error: unauthorized".to_owned(),
            Outcome::BadRequest(reason) => format!("error: bad request - {reason}"),
            Outcome::InternalError => "error: internal server error".to_owned(),
        }
    }
}

pub struct Coordinator {
    config: ConfigHandle,
    binder: Arc<dyn Binder>,
    queue: Arc<RegistrationQueue>,
    locks: Arc<IdentifierLocks>,
    minter: Arc<dyn Minter>,
    directory: Arc<IdentityDirectory>,
    datacite: Arc<dyn DoiRegistrar>,
}

impl Coordinator {
    pub fn new(
        config: ConfigHandle,
        binder: Arc<dyn Binder>,
        queue: Arc<RegistrationQueue>,
        locks: Arc<IdentifierLocks>,
        minter: Arc<dyn Minter>,
        directory: Arc<IdentityDirectory>,
        datacite: Arc<dyn DoiRegistrar>,
    ) -> Self {
        Self {
            config,
            binder,
            queue,
            locks,
            minter,
            directory,
            datacite,
        }
    }

    fn snapshot(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    // ── mint ──────────────────────────────────────────────────────────

    /// Mint a fresh identifier under a registered prefix, then create it.
    pub async fn mint_identifier(
        &self,
        caller: &Caller,
        prefix: &str,
        target: Option<&str>,
    ) -> Outcome {
        let tx = Uuid::new_v4();
        tracing::info!(tx = %tx, user = %caller.user.name, prefix, "mint begin");
        let result = self.mint_inner(caller, prefix, target).await;
        conclude(&tx, "mint", result)
    }

    async fn mint_inner(
        &self,
        caller: &Caller,
        prefix: &str,
        target: Option<&str>,
    ) -> Result<Outcome> {
        let cfg = self.snapshot();
        let scheme = Scheme::of(prefix).ok_or(Error::UnknownScheme)?;
        let shoulder = cfg
            .shoulder_for(prefix)
            .ok_or(Error::UnknownPrefix(scheme.label()))?;
        if !authz::authorize_create(&cfg, caller, prefix) {
            return Err(Error::Unauthorized);
        }

        let id = match scheme {
            Scheme::UrnUuid => Identifier::UrnUuid(Uuid::new_v4()),
            Scheme::Ark => {
                let name = self.minter.mint(shoulder).await?;
                if !name.starts_with(scheme_less_prefix(prefix)) {
                    return Err(Error::Internal(format!(
                        "minter returned {name}, outside namespace {prefix}"
                    )));
                }
                identifier::validate_ark(&format!("ark:/{name}"))?
            }
            Scheme::Doi => {
                let name = self.minter.mint(shoulder).await?;
                if !name.starts_with(scheme_less_prefix(prefix)) {
                    return Err(Error::Internal(format!(
                        "minter returned {name}, outside namespace {prefix}"
                    )));
                }
                let id = identifier::validate_doi(&format!("doi:{name}"))?;
                let shadow = id.ark_key();
                if identifier::shadow2doi(&shadow)? != id.qualified() {
                    return Err(Error::Internal(format!(
                        "shadow mapping does not round-trip for {}",
                        id.qualified()
                    )));
                }
                id
            }
        };
        self.create_parsed(&cfg, caller, &id, target).await
    }

    // ── create ────────────────────────────────────────────────────────

    pub async fn create_identifier(
        &self,
        caller: &Caller,
        id: &str,
        target: Option<&str>,
    ) -> Outcome {
        let tx = Uuid::new_v4();
        tracing::info!(tx = %tx, user = %caller.user.name, id, "create begin");
        let result = async {
            let cfg = self.snapshot();
            let parsed = Identifier::parse(id)?;
            self.create_parsed(&cfg, caller, &parsed, target).await
        }
        .await;
        conclude(&tx, "create", result)
    }

    async fn create_parsed(
        &self,
        cfg: &Config,
        caller: &Caller,
        id: &Identifier,
        target: Option<&str>,
    ) -> Result<Outcome> {
        let qid = id.qualified();
        let ark = id.ark_key();
        let _guard = self.locks.acquire(&ark, &caller.user.name).await?;

        if !authz::authorize_create(cfg, caller, &qid) {
            return Err(Error::Unauthorized);
        }
        if self.binder.exists(&ark).await? {
            return Err(Error::AlreadyExists);
        }

        let now = Utc::now().timestamp().to_string();
        let mut elements = ElementMap::new();
        elements.insert(metadata::OWNER.into(), caller.user.pid.clone());
        elements.insert(metadata::OWNER_GROUP.into(), caller.group.pid.clone());
        elements.insert(metadata::CREATED.into(), now.clone());
        elements.insert(metadata::UPDATED.into(), now.clone());

        let payload = match id {
            Identifier::Ark { .. } => {
                let resolved = target
                    .map(str::to_owned)
                    .unwrap_or_else(|| metadata::default_target(&cfg.base_url, &qid));
                elements.insert(metadata::TARGET.into(), resolved);
                elements.insert(metadata::PROFILE.into(), cfg.default_ark_profile.clone());
                qid.clone()
            }
            Identifier::Doi { .. } => {
                let shadow_target = target
                    .map(str::to_owned)
                    .unwrap_or_else(|| metadata::default_target(&cfg.base_url, &qid));
                // Register with the external DOI registrar before committing
                // storage.
                self.datacite
                    .register_identifier(&id.scheme_less(), &shadow_target)
                    .await?;
                elements.insert(metadata::SHADOWS.into(), qid.clone());
                elements.insert(metadata::SHADOW_UPDATED.into(), now.clone());
                elements.insert(metadata::SHADOW_TARGET.into(), shadow_target);
                elements.insert(
                    metadata::TARGET.into(),
                    metadata::default_target(&cfg.base_url, &ark),
                );
                elements.insert(metadata::PROFILE.into(), cfg.default_doi_profile.clone());
                format!("{qid} | {ark}")
            }
            Identifier::UrnUuid(_) => {
                let shadow_target = target
                    .map(str::to_owned)
                    .unwrap_or_else(|| metadata::default_target(&cfg.base_url, &qid));
                elements.insert(metadata::SHADOWS.into(), qid.clone());
                elements.insert(metadata::SHADOW_UPDATED.into(), now.clone());
                elements.insert(metadata::SHADOW_TARGET.into(), shadow_target);
                elements.insert(
                    metadata::TARGET.into(),
                    metadata::default_target(&cfg.base_url, &ark),
                );
                elements.insert(
                    metadata::PROFILE.into(),
                    cfg.default_urn_uuid_profile.clone(),
                );
                format!("{qid} | {ark}")
            }
        };

        self.binder.hold(&ark).await?;
        self.binder.set(&ark, elements).await?;
        Ok(Outcome::Success {
            payload,
            metadata: None,
        })
    }

    // ── get ───────────────────────────────────────────────────────────

    pub async fn get_metadata(&self, id: &str) -> Outcome {
        let tx = Uuid::new_v4();
        tracing::info!(tx = %tx, id, "get begin");
        let result = self.get_inner(id).await;
        conclude(&tx, "get", result)
    }

    async fn get_inner(&self, id_str: &str) -> Result<Outcome> {
        let id = Identifier::parse(id_str)?;
        let ark = id.ark_key();
        let _guard = self.locks.acquire(&ark, "anonymous").await?;
        let stored = self
            .binder
            .get(&ark)
            .await?
            .ok_or(Error::NoSuchIdentifier)?;

        let mut view = match id.scheme() {
            Scheme::Ark => metadata::project_ark_view(&stored),
            _ => metadata::project_shadowed_view(&stored, &ark),
        };

        // Agent PIDs read back as local names.
        for key in ["_owner", "_ownergroup"] {
            if let Some(pid) = view.get(key).cloned() {
                view.insert(key.to_owned(), self.directory.agent_name(&pid));
            }
        }
        if let Some(raw) = view.get("_coowners").cloned() {
            let names: Vec<String> = split_co(Some(&raw))
                .iter()
                .map(|pid| self.directory.agent_name(pid))
                .collect();
            view.insert("_coowners".to_owned(), names.join(";"));
        }

        Ok(Outcome::Success {
            payload: id.qualified(),
            metadata: Some(view),
        })
    }

    // ── set ───────────────────────────────────────────────────────────

    pub async fn set_metadata(
        &self,
        caller: &Caller,
        id: &str,
        elements: &ElementMap,
        update_external_services: bool,
    ) -> Outcome {
        let tx = Uuid::new_v4();
        tracing::info!(
            tx = %tx,
            user = %caller.user.name,
            id,
            count = elements.len(),
            "set begin"
        );
        let result = self
            .set_inner(caller, id, elements, update_external_services)
            .await;
        conclude(&tx, "set", result)
    }

    async fn set_inner(
        &self,
        caller: &Caller,
        id_str: &str,
        elements: &ElementMap,
        update_external_services: bool,
    ) -> Result<Outcome> {
        let cfg = self.snapshot();
        let id = Identifier::parse(id_str)?;
        let qid = id.qualified();
        let admin = authz::is_admin(&cfg, caller);

        // Name policy and per-element validation, before taking the lock.
        let mut incoming = elements.clone();
        for name in incoming.keys() {
            if name.is_empty() {
                return Err(Error::EmptyName);
            }
            if metadata::is_reserved(name) && !OPEN_RESERVED.contains(&name.as_str()) {
                if !(admin && ADMIN_RESERVED.contains(&name.as_str())) {
                    return Err(Error::ReservedName);
                }
            }
        }
        if let Some(record) = incoming.get("datacite").filter(|v| !v.is_empty()).cloned() {
            let normalized = self
                .datacite
                .validate_dcms_record(&qid, &record)
                .map_err(|e| Error::ElementValidation {
                    element: "datacite".into(),
                    message: one_line(&e.to_string()),
                })?;
            incoming.insert("datacite".into(), normalized);
        }
        if let Some(body) = incoming.get("crossref").filter(|v| !v.is_empty()).cloned() {
            let normalized = validate_body(&body).map_err(|e| Error::ElementValidation {
                element: "crossref".into(),
                message: one_line(&e.to_string()),
            })?;
            incoming.insert("crossref".into(), normalized);
        }
        if let Some(status) = incoming.get("_status") {
            Status::parse(status)?;
        }

        let ark = id.ark_key();
        let _guard = self.locks.acquire(&ark, &caller.user.name).await?;
        let current = self
            .binder
            .get(&ark)
            .await?
            .ok_or(Error::NoSuchIdentifier)?;

        let owner_pid = current.get(metadata::OWNER).cloned();
        let group_pid = current.get(metadata::OWNER_GROUP).cloned();
        let current_co = split_co(current.get(metadata::CO_OWNERS));
        let keys: Vec<String> = incoming.keys().cloned().collect();
        if !authz::authorize_update(
            &cfg,
            caller,
            owner_pid.as_deref(),
            group_pid.as_deref(),
            &current_co,
            &keys,
        ) {
            return Err(Error::Unauthorized);
        }

        let now = Utc::now().timestamp().to_string();
        let mut delta = ElementMap::new();

        // Co-owner update rules.
        let mut co_owners = match incoming.get("_coowners") {
            Some(raw) => self.parse_co_owners(&cfg, raw, owner_pid.as_deref())?,
            None => current_co.clone(),
        };
        let is_owner = owner_pid.as_deref() == Some(caller.user.pid.as_str());
        if !admin && !is_owner && !co_owners.contains(&caller.user.pid) {
            co_owners.push(caller.user.pid.clone());
        }
        if co_owners != current_co || incoming.contains_key("_coowners") {
            delta.insert(metadata::CO_OWNERS.into(), co_owners.join(";"));
        }

        // Transmitted names to stored slots.
        let mut explicit_updated = false;
        for (name, value) in &incoming {
            match name.as_str() {
                "_coowners" => {}
                "_target" => {
                    let resolved = if value.is_empty() {
                        metadata::default_target(&cfg.base_url, &qid)
                    } else {
                        value.clone()
                    };
                    let slot = match id.scheme() {
                        Scheme::Ark => metadata::TARGET,
                        _ => metadata::SHADOW_TARGET,
                    };
                    delta.insert(slot.into(), resolved);
                }
                "_profile" => {
                    delta.insert(metadata::PROFILE.into(), value.clone());
                }
                "_status" => {
                    delta.insert(metadata::STATUS.into(), value.clone());
                }
                "_owner" => {
                    delta.insert(metadata::OWNER.into(), self.directory.user_pid(value)?);
                }
                "_ownergroup" => {
                    delta.insert(metadata::OWNER_GROUP.into(), value.clone());
                }
                "_created" => {
                    delta.insert(metadata::CREATED.into(), value.clone());
                }
                "_updated" => {
                    explicit_updated = true;
                    let slot = match id.scheme() {
                        Scheme::Ark => metadata::UPDATED,
                        _ => metadata::SHADOW_UPDATED,
                    };
                    delta.insert(slot.into(), value.clone());
                }
                "_crossref" => {
                    delta.insert(metadata::CROSSREF.into(), value.clone());
                }
                _ => {
                    delta.insert(name.clone(), value.clone());
                }
            }
        }
        if !explicit_updated {
            let slot = match id.scheme() {
                Scheme::Ark => metadata::UPDATED,
                _ => metadata::SHADOW_UPDATED,
            };
            delta.insert(slot.into(), now);
        }

        // External side effects (suppressed on daemon write-backs). Note the
        // ordering: the target is pushed before the metadata upload, so a
        // rejected upload leaves the new target standing.
        if update_external_services {
            let upload_delta: ElementMap = delta
                .iter()
                .filter(|(k, _)| !metadata::is_reserved(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            match &id {
                Identifier::Doi { .. } => {
                    if incoming.contains_key("_target") {
                        if let Some(target) = delta.get(metadata::SHADOW_TARGET) {
                            self.datacite
                                .set_target_url(&id.scheme_less(), target)
                                .await?;
                        }
                    }
                    if !upload_delta.is_empty() {
                        if let Some(msg) = self
                            .datacite
                            .upload_metadata(&id.scheme_less(), &current, &upload_delta)
                            .await?
                        {
                            return Err(Error::BadRequest(msg));
                        }
                    }
                }
                Identifier::Ark { .. } => {
                    let shadowed = current
                        .get(metadata::SHADOWS)
                        .and_then(|s| s.strip_prefix("doi:"))
                        .map(str::to_owned);
                    if let Some(doi) = shadowed {
                        if !upload_delta.is_empty() {
                            if let Some(msg) = self
                                .datacite
                                .upload_metadata(&doi, &current, &upload_delta)
                                .await?
                            {
                                return Err(Error::BadRequest(msg));
                            }
                        }
                    }
                }
                Identifier::UrnUuid(_) => {}
            }
        }

        self.binder.set(&ark, delta).await?;

        // Commit the registration intent.
        if update_external_services
            && cfg.registrar.enabled
            && matches!(id.scheme(), Scheme::Doi)
        {
            if let Some(updated) = self.binder.get(&ark).await? {
                if updated.contains_key("crossref") {
                    let op = if current.contains_key("crossref") {
                        RegistrationOp::Update
                    } else {
                        RegistrationOp::Create
                    };
                    let owner = updated
                        .get(metadata::OWNER)
                        .cloned()
                        .unwrap_or_default();
                    self.queue.enqueue(&qid, op, &owner, updated).await?;
                }
            }
        }

        Ok(Outcome::Success {
            payload: qid,
            metadata: None,
        })
    }

    // ── delete ────────────────────────────────────────────────────────

    /// Delete an identifier. The admin may delete anything; the owner only
    /// while the identifier is still reserved.
    pub async fn delete_identifier(&self, caller: &Caller, id: &str) -> Outcome {
        let tx = Uuid::new_v4();
        tracing::info!(tx = %tx, user = %caller.user.name, id, "delete begin");
        let result = self.delete_inner(caller, id).await;
        conclude(&tx, "delete", result)
    }

    async fn delete_inner(&self, caller: &Caller, id_str: &str) -> Result<Outcome> {
        let cfg = self.snapshot();
        let id = Identifier::parse(id_str)?;
        let qid = id.qualified();
        let ark = id.ark_key();
        let _guard = self.locks.acquire(&ark, &caller.user.name).await?;
        let current = self
            .binder
            .get(&ark)
            .await?
            .ok_or(Error::NoSuchIdentifier)?;

        if !authz::is_admin(&cfg, caller) {
            if current.get(metadata::OWNER).map(String::as_str)
                != Some(caller.user.pid.as_str())
            {
                return Err(Error::Unauthorized);
            }
            let status = current
                .get(metadata::STATUS)
                .map(String::as_str)
                .unwrap_or("public");
            if !status.starts_with("reserved") {
                return Err(Error::BadRequest(
                    "identifier status does not support deletion".into(),
                ));
            }
        }

        self.binder.purge(&ark).await?;
        if cfg.registrar.enabled
            && matches!(id.scheme(), Scheme::Doi)
            && current.contains_key("crossref")
        {
            let owner = current
                .get(metadata::OWNER)
                .cloned()
                .unwrap_or_default();
            self.queue
                .enqueue(&qid, RegistrationOp::Delete, &owner, current)
                .await?;
        }

        Ok(Outcome::Success {
            payload: qid,
            metadata: None,
        })
    }

    // ── helpers ───────────────────────────────────────────────────────

    /// Parse a transmitted `_coowners` value (semicolon-separated local
    /// names) into a deduplicated PID list, dropping empties, `anonymous`,
    /// the admin, and the owner.
    fn parse_co_owners(
        &self,
        cfg: &Config,
        raw: &str,
        owner_pid: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for name in raw.split(';') {
            let name = name.trim();
            if name.is_empty() || name == "anonymous" || name == cfg.directory.admin_username {
                continue;
            }
            let pid = self.directory.user_pid(name)?;
            if Some(pid.as_str()) == owner_pid {
                continue;
            }
            if !out.contains(&pid) {
                out.push(pid);
            }
        }
        Ok(out)
    }
}

/// Split a stored `_co` value into PIDs.
fn split_co(raw: Option<&String>) -> Vec<String> {
    raw.map(|s| {
        s.split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

fn one_line(s: &str) -> String {
    s.replace('\n', " ").replace('\r', " ").trim().to_owned()
}

/// Collapse an operation result into an [`Outcome`], logging the ending.
fn conclude(tx: &Uuid, op: &str, result: Result<Outcome>) -> Outcome {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(Error::Unauthorized) => Outcome::Unauthorized,
        Err(e) if e.is_bad_request() => Outcome::BadRequest(e.to_string()),
        Err(e) => {
            tracing::error!(tx = %tx, op, error = %e, "operation failed");
            Outcome::InternalError
        }
    };
    match &outcome {
        Outcome::Success { payload, .. } => {
            tracing::info!(tx = %tx, op, payload = %payload, "success");
        }
        Outcome::Unauthorized => {
            tracing::info!(tx = %tx, op, "unauthorized");
        }
        Outcome::BadRequest(reason) => {
            tracing::info!(tx = %tx, op, reason = %reason, "bad request");
        }
        Outcome::InternalError => {}
    }
    outcome
}
