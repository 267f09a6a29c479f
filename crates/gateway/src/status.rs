//! Periodic process-health reporting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mintage_store::{Binder, RegistrationQueue};

use crate::external::datacite::DoiRegistrar;
use crate::locks::IdentifierLocks;

/// Spawn the status reporter. `interval_secs == 0` disables it.
pub fn spawn_status_reporter(
    interval_secs: u64,
    locks: Arc<IdentifierLocks>,
    binder: Arc<dyn Binder>,
    queue: Arc<RegistrationQueue>,
    datacite: Arc<dyn DoiRegistrar>,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;
            locks.prune_idle();

            let active = locks.active_by_user();
            let waiting = locks.waiting_by_user();
            let identifiers = binder.count().await.unwrap_or(0);
            let queue_depth = queue.len().await;
            tracing::info!(
                pid = std::process::id(),
                active_operations = %format_by_user(&active),
                waiting_requests = %format_by_user(&waiting),
                active_datacite_operations = datacite.num_active_operations(),
                identifiers,
                queue_depth,
                "STATUS"
            );
        }
    }))
}

fn format_by_user(counts: &HashMap<String, usize>) -> String {
    if counts.is_empty() {
        return "none".to_owned();
    }
    let mut entries: Vec<_> = counts.iter().collect();
    entries.sort();
    entries
        .into_iter()
        .map(|(user, n)| format!("{user}={n}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_user_formatting_is_stable() {
        let mut counts = HashMap::new();
        counts.insert("beta".to_owned(), 2);
        counts.insert("alpha".to_owned(), 1);
        assert_eq!(format_by_user(&counts), "alpha=1,beta=2");
        assert_eq!(format_by_user(&HashMap::new()), "none");
    }
}
