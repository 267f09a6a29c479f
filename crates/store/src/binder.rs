//! Metadata-store adapter: element maps keyed by ARK.
//!
//! The store itself is opaque to the rest of the service; everything goes
//! through the [`Binder`] trait. No multi-key transactions are assumed, and
//! none are needed: all coordination is per-key, in the lock registry above
//! this layer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use mintage_domain::metadata::ElementMap;
use mintage_domain::{Error, Result};

/// Operations the service needs from the metadata store.
#[async_trait]
pub trait Binder: Send + Sync {
    async fn exists(&self, ark: &str) -> Result<bool>;

    /// Reserve an ARK with no elements. Idempotent.
    async fn hold(&self, ark: &str) -> Result<()>;

    /// The stored element map, or `None` for an unknown ARK.
    async fn get(&self, ark: &str) -> Result<Option<ElementMap>>;

    /// Merge elements into the stored map. Keys absent from `elements` are
    /// preserved; an empty-string value removes the key.
    async fn set(&self, ark: &str, elements: ElementMap) -> Result<()>;

    /// Remove an identifier and all its elements.
    async fn purge(&self, ark: &str) -> Result<()>;

    /// Number of stored identifiers (status reporting).
    async fn count(&self) -> Result<usize>;
}

/// File-backed binder: an in-memory map persisted to a JSON state file on
/// every mutation.
pub struct FileBinder {
    inner: RwLock<HashMap<String, ElementMap>>,
    persist_path: PathBuf,
}

impl FileBinder {
    /// Open (or create) the binder state file under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let persist_path = dir.join("bind.json");
        let map = match std::fs::read_to_string(&persist_path) {
            Ok(data) => {
                let map: HashMap<String, ElementMap> = serde_json::from_str(&data)
                    .map_err(|e| Error::Internal(format!("corrupt binder state file: {e}")))?;
                tracing::info!(count = map.len(), path = %persist_path.display(), "loaded binder state");
                map
            }
            Err(_) => HashMap::new(),
        };
        Ok(Self {
            inner: RwLock::new(map),
            persist_path,
        })
    }

    async fn persist(&self) -> Result<()> {
        let json = {
            let map = self.inner.read().await;
            serde_json::to_string_pretty(&*map)?
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
        .map_err(|e| Error::Internal(format!("binder persist task failed: {e}")))?
    }
}

#[async_trait]
impl Binder for FileBinder {
    async fn exists(&self, ark: &str) -> Result<bool> {
        Ok(self.inner.read().await.contains_key(ark))
    }

    async fn hold(&self, ark: &str) -> Result<()> {
        {
            let mut map = self.inner.write().await;
            map.entry(ark.to_owned()).or_default();
        }
        self.persist().await
    }

    async fn get(&self, ark: &str) -> Result<Option<ElementMap>> {
        Ok(self.inner.read().await.get(ark).cloned())
    }

    async fn set(&self, ark: &str, elements: ElementMap) -> Result<()> {
        {
            let mut map = self.inner.write().await;
            let stored = map.entry(ark.to_owned()).or_default();
            for (k, v) in elements {
                if v.is_empty() {
                    stored.remove(&k);
                } else {
                    stored.insert(k, v);
                }
            }
        }
        self.persist().await
    }

    async fn purge(&self, ark: &str) -> Result<()> {
        self.inner.write().await.remove(ark);
        self.persist().await
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hold_then_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let binder = FileBinder::open(dir.path()).unwrap();

        assert!(!binder.exists("ark:/13030/x").await.unwrap());
        binder.hold("ark:/13030/x").await.unwrap();
        assert!(binder.exists("ark:/13030/x").await.unwrap());

        let mut m = ElementMap::new();
        m.insert("_o".into(), "ark:/99166/p9u".into());
        m.insert("erc.who".into(), "someone".into());
        binder.set("ark:/13030/x", m).await.unwrap();

        let stored = binder.get("ark:/13030/x").await.unwrap().unwrap();
        assert_eq!(stored.get("erc.who").map(String::as_str), Some("someone"));
    }

    #[tokio::test]
    async fn set_merges_and_empty_value_removes() {
        let dir = tempfile::tempdir().unwrap();
        let binder = FileBinder::open(dir.path()).unwrap();

        let mut first = ElementMap::new();
        first.insert("a".into(), "1".into());
        first.insert("b".into(), "2".into());
        binder.set("ark:/13030/x", first).await.unwrap();

        let mut second = ElementMap::new();
        second.insert("b".into(), String::new());
        second.insert("c".into(), "3".into());
        binder.set("ark:/13030/x", second).await.unwrap();

        let stored = binder.get("ark:/13030/x").await.unwrap().unwrap();
        assert_eq!(stored.get("a").map(String::as_str), Some("1"));
        assert!(!stored.contains_key("b"));
        assert_eq!(stored.get("c").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let binder = FileBinder::open(dir.path()).unwrap();
            let mut m = ElementMap::new();
            m.insert("_t".into(), "http://x".into());
            binder.set("ark:/13030/x", m).await.unwrap();
        }
        let binder = FileBinder::open(dir.path()).unwrap();
        assert!(binder.exists("ark:/13030/x").await.unwrap());
        assert_eq!(binder.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn purge_removes_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let binder = FileBinder::open(dir.path()).unwrap();
        binder.hold("ark:/13030/x").await.unwrap();
        binder.purge("ark:/13030/x").await.unwrap();
        assert!(!binder.exists("ark:/13030/x").await.unwrap());
    }
}
