//! Registration queue: a durable FIFO of create/update/delete intents
//! against the external DOI registrar.
//!
//! Rows are insertion-ordered by a monotonic `seq` that survives restarts.
//! Several rows may exist for the same identifier; the daemon only ever
//! advances the earliest one, and deletes it unconditionally when newer rows
//! exist, so the latest intent wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use mintage_domain::metadata::ElementMap;
use mintage_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationOp {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for RegistrationOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationOp::Create => write!(f, "create"),
            RegistrationOp::Update => write!(f, "update"),
            RegistrationOp::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    /// Not yet submitted to the registrar.
    #[serde(rename = "U")]
    Unsubmitted,
    /// Submitted; awaiting poll results.
    #[serde(rename = "S")]
    Submitted,
    /// Registrar completed the batch with a warning.
    #[serde(rename = "W")]
    Warning,
    /// Registrar completed the batch with a failure.
    #[serde(rename = "F")]
    Failure,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Unsubmitted => write!(f, "U"),
            QueueStatus::Submitted => write!(f, "S"),
            QueueStatus::Warning => write!(f, "W"),
            QueueStatus::Failure => write!(f, "F"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub seq: u64,
    /// Qualified identifier, e.g. `doi:10.5060/FOO`.
    pub identifier: String,
    /// Owner agent PID at enqueue time.
    pub owner: String,
    pub operation: RegistrationOp,
    /// Element map snapshot at enqueue time.
    pub blob: ElementMap,
    pub status: QueueStatus,
    #[serde(default)]
    pub batch_id: Option<String>,
    /// Unix seconds of the accepted submission.
    #[serde(default)]
    pub submit_time: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    next_seq: u64,
    rows: Vec<QueueEntry>,
}

struct QueueInner {
    next_seq: u64,
    rows: BTreeMap<u64, QueueEntry>,
}

/// Durable registration queue persisted to a JSON state file.
pub struct RegistrationQueue {
    inner: RwLock<QueueInner>,
    persist_path: PathBuf,
}

impl RegistrationQueue {
    /// Open (or create) the queue state file under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let persist_path = dir.join("queue.json");
        let mut inner = QueueInner {
            next_seq: 1,
            rows: BTreeMap::new(),
        };
        if let Ok(data) = std::fs::read_to_string(&persist_path) {
            let state: QueueState = serde_json::from_str(&data)
                .map_err(|e| Error::Internal(format!("corrupt queue state file: {e}")))?;
            inner.next_seq = state.next_seq.max(1);
            for row in state.rows {
                inner.next_seq = inner.next_seq.max(row.seq + 1);
                inner.rows.insert(row.seq, row);
            }
            tracing::info!(count = inner.rows.len(), path = %persist_path.display(), "loaded registration queue");
        }
        Ok(Self {
            inner: RwLock::new(inner),
            persist_path,
        })
    }

    async fn persist(&self) -> Result<()> {
        let json = {
            let inner = self.inner.read().await;
            let state = QueueState {
                next_seq: inner.next_seq,
                rows: inner.rows.values().cloned().collect(),
            };
            serde_json::to_string_pretty(&state)?
        };
        let path = self.persist_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, json)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(format!("queue persist task failed: {e}")))?
    }

    /// Append a new unsubmitted row and return it.
    pub async fn enqueue(
        &self,
        identifier: &str,
        operation: RegistrationOp,
        owner: &str,
        blob: ElementMap,
    ) -> Result<QueueEntry> {
        let entry = {
            let mut inner = self.inner.write().await;
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let entry = QueueEntry {
                seq,
                identifier: identifier.to_owned(),
                owner: owner.to_owned(),
                operation,
                blob,
                status: QueueStatus::Unsubmitted,
                batch_id: None,
                submit_time: None,
                message: None,
            };
            inner.rows.insert(seq, entry.clone());
            entry
        };
        self.persist().await?;
        tracing::debug!(seq = entry.seq, identifier = %entry.identifier, op = %entry.operation, "registration intent enqueued");
        Ok(entry)
    }

    /// All rows in ascending `seq` order.
    pub async fn list_in_seq_order(&self) -> Vec<QueueEntry> {
        self.inner.read().await.rows.values().cloned().collect()
    }

    /// Highest `seq` ever assigned (0 when nothing was ever enqueued).
    pub async fn max_seq(&self) -> u64 {
        self.inner.read().await.next_seq - 1
    }

    pub async fn count_for_identifier(&self, identifier: &str) -> usize {
        self.inner
            .read()
            .await
            .rows
            .values()
            .filter(|r| r.identifier == identifier)
            .count()
    }

    /// Replace a row (matched by `seq`).
    pub async fn save(&self, entry: QueueEntry) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            inner.rows.insert(entry.seq, entry);
        }
        self.persist().await
    }

    /// Remove a row. Returns whether it existed.
    pub async fn delete(&self, seq: u64) -> Result<bool> {
        let removed = self.inner.write().await.rows.remove(&seq).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob() -> ElementMap {
        let mut m = ElementMap::new();
        m.insert("_t".into(), "http://x".into());
        m
    }

    #[tokio::test]
    async fn seq_is_monotonic_across_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let q = RegistrationQueue::open(dir.path()).unwrap();

        let a = q
            .enqueue("doi:10.5060/A", RegistrationOp::Create, "ark:/99166/p9u", blob())
            .await
            .unwrap();
        q.delete(a.seq).await.unwrap();
        let b = q
            .enqueue("doi:10.5060/B", RegistrationOp::Create, "ark:/99166/p9u", blob())
            .await
            .unwrap();
        assert!(b.seq > a.seq);
        assert_eq!(q.max_seq().await, b.seq);
    }

    #[tokio::test]
    async fn duplicate_identifier_rows_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let q = RegistrationQueue::open(dir.path()).unwrap();

        q.enqueue("doi:10.5060/A", RegistrationOp::Create, "p", blob())
            .await
            .unwrap();
        q.enqueue("doi:10.5060/A", RegistrationOp::Update, "p", blob())
            .await
            .unwrap();
        q.enqueue("doi:10.5060/B", RegistrationOp::Create, "p", blob())
            .await
            .unwrap();

        assert_eq!(q.count_for_identifier("doi:10.5060/A").await, 2);
        assert_eq!(q.count_for_identifier("doi:10.5060/B").await, 1);

        let rows = q.list_in_seq_order().await;
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let seq = {
            let q = RegistrationQueue::open(dir.path()).unwrap();
            let mut row = q
                .enqueue("doi:10.5060/A", RegistrationOp::Create, "p", blob())
                .await
                .unwrap();
            row.status = QueueStatus::Submitted;
            row.batch_id = Some("batch-1".into());
            q.save(row.clone()).await.unwrap();
            row.seq
        };
        let q = RegistrationQueue::open(dir.path()).unwrap();
        let rows = q.list_in_seq_order().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].seq, seq);
        assert_eq!(rows[0].status, QueueStatus::Submitted);
        assert_eq!(q.max_seq().await, seq);
    }
}
