use crate::survey::RespondentId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-respondent exclusive sections.
///
/// Each respondent gets its own async mutex; waiters are served in arrival
/// order. Entries nobody holds or waits on are dropped once the map grows
/// past `prune_threshold`. After a pass, the next one waits until the map
/// holds twice what survived.
pub struct RespondentLocks {
    locks: Mutex<LockMap>,
    prune_threshold: usize,
}

struct LockMap {
    entries: HashMap<RespondentId, Arc<AsyncMutex<()>>>,
    prune_at: usize,
}

impl RespondentLocks {
    pub fn new(prune_threshold: usize) -> Self {
        let prune_threshold = prune_threshold.max(1);
        Self {
            locks: Mutex::new(LockMap {
                entries: HashMap::new(),
                prune_at: prune_threshold,
            }),
            prune_threshold,
        }
    }

    /// Wait for exclusive access to one respondent. Released on drop.
    pub async fn acquire(&self, respondent_id: RespondentId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if map.entries.len() >= map.prune_at {
                Self::prune(&mut map.entries);
                map.prune_at = self.prune_threshold.max(map.entries.len() * 2);
            }
            Arc::clone(map.entries.entry(respondent_id).or_default())
        };
        lock.lock_owned().await
    }

    fn prune(map: &mut HashMap<RespondentId, Arc<AsyncMutex<()>>>) {
        let before = map.len();
        // Only the map holds an idle entry.
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        tracing::debug!(
            pruned = before - map.len(),
            remaining = map.len(),
            "pruned respondent locks"
        );
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RespondentLocks {
    fn default() -> Self {
        Self::new(1024)
    }
}
