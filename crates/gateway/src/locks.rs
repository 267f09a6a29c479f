//! Per-identifier concurrency control.
//!
//! Every identifier operation runs under the lock of its ARK storage key, so
//! concurrent operations on one identifier serialize while different
//! identifiers proceed in parallel. The core never holds two identifier
//! locks at once, so there is nothing to deadlock on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use mintage_domain::{Error, Result};

/// Manages per-identifier locks plus the per-user active/waiting counts the
/// status reporter emits.
pub struct IdentifierLocks {
    /// ARK key maps to a `Semaphore(1)`; holding the permit is holding the
    /// identifier.
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
    active: Mutex<HashMap<String, usize>>,
    waiting: Mutex<HashMap<String, usize>>,
}

impl Default for IdentifierLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            waiting: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for an ARK key, blocking until the current holder
    /// releases it. The returned guard releases on drop.
    pub async fn acquire(
        self: &Arc<Self>,
        ark: &str,
        user: &str,
    ) -> Result<IdentifierGuard> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(ark.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        bump(&self.waiting, user, 1);
        let permit = sem.acquire_owned().await;
        bump(&self.waiting, user, -1);
        let permit =
            permit.map_err(|_| Error::Internal("identifier lock semaphore closed".into()))?;

        bump(&self.active, user, 1);
        Ok(IdentifierGuard {
            _permit: permit,
            registry: self.clone(),
            user: user.to_owned(),
        })
    }

    /// Number of identifiers currently locked.
    pub fn num_locked(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|s| s.available_permits() == 0)
            .count()
    }

    /// Drop map entries for identifiers nobody holds (periodic cleanup).
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }

    /// Active operation counts grouped by user.
    pub fn active_by_user(&self) -> HashMap<String, usize> {
        self.active.lock().clone()
    }

    /// Waiting request counts grouped by user.
    pub fn waiting_by_user(&self) -> HashMap<String, usize> {
        self.waiting.lock().clone()
    }
}

fn bump(map: &Mutex<HashMap<String, usize>>, user: &str, delta: isize) {
    let mut map = map.lock();
    let entry = map.entry(user.to_owned()).or_insert(0);
    let next = entry.saturating_add_signed(delta);
    if next == 0 {
        map.remove(user);
    } else {
        *entry = next;
    }
}

/// Held identifier lock; releases (and decrements the user's active count)
/// on drop.
pub struct IdentifierGuard {
    _permit: OwnedSemaphorePermit,
    registry: Arc<IdentifierLocks>,
    user: String,
}

impl Drop for IdentifierGuard {
    fn drop(&mut self) {
        bump(&self.registry.active, &self.user, -1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_acquire_release() {
        let locks = Arc::new(IdentifierLocks::new());
        let g1 = locks.acquire("ark:/13030/x", "u").await.unwrap();
        assert_eq!(locks.num_locked(), 1);
        drop(g1);
        let g2 = locks.acquire("ark:/13030/x", "u").await.unwrap();
        drop(g2);
        assert_eq!(locks.num_locked(), 0);
    }

    #[tokio::test]
    async fn different_identifiers_are_independent() {
        let locks = Arc::new(IdentifierLocks::new());
        let g1 = locks.acquire("ark:/13030/a", "u").await.unwrap();
        let g2 = locks.acquire("ark:/13030/b", "v").await.unwrap();
        assert_eq!(locks.num_locked(), 2);
        let active = locks.active_by_user();
        assert_eq!(active.get("u"), Some(&1));
        assert_eq!(active.get("v"), Some(&1));
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn same_identifier_serializes() {
        let locks = Arc::new(IdentifierLocks::new());
        let locks2 = locks.clone();

        let g1 = locks.acquire("ark:/13030/x", "u").await.unwrap();
        let waiter = tokio::spawn(async move {
            let _g2 = locks2.acquire("ark:/13030/x", "v").await.unwrap();
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(locks.waiting_by_user().get("v"), Some(&1));

        drop(g1);
        assert_eq!(waiter.await.unwrap(), 42);
        assert!(locks.waiting_by_user().is_empty());
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = Arc::new(IdentifierLocks::new());
        let _g = locks.acquire("ark:/13030/a", "u").await.unwrap();
        drop(locks.acquire("ark:/13030/b", "u").await.unwrap());
        locks.prune_idle();
        assert_eq!(locks.num_locked(), 1);
    }
}
