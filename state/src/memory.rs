//! In-memory tally store for testing and single-process runs

use ballotbox_core::{OptionId, TallyResult, TallySnapshot, TallyStore};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::lock::{acquire_local, LockPolicy};
use crate::store::{next_count, zeroed_snapshot};

/// In-memory tally store
pub struct MemoryTallyStore {
    counts: DashMap<OptionId, u64>,
    lock: Mutex<()>,
    policy: LockPolicy,
}

impl MemoryTallyStore {
    pub fn new() -> Self {
        Self::with_policy(LockPolicy::default())
    }

    pub fn with_policy(policy: LockPolicy) -> Self {
        Self {
            counts: DashMap::new(),
            lock: Mutex::new(()),
            policy,
        }
    }

    pub fn with_counts(counts: Vec<(OptionId, u64)>) -> Self {
        let store = Self::new();
        for (id, count) in counts {
            store.counts.insert(id, count);
        }
        store
    }
}

impl Default for MemoryTallyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TallyStore for MemoryTallyStore {
    fn increment(&self, id: OptionId) -> TallyResult<u64> {
        let _guard = acquire_local(&self.lock, self.policy)?;

        let current = self.counts.get(&id).map(|c| *c.value()).unwrap_or(0);
        let next = next_count(id, current)?;
        self.counts.insert(id, next);

        Ok(next)
    }

    fn snapshot(&self, ids: &[OptionId]) -> TallyResult<TallySnapshot> {
        let mut snapshot = zeroed_snapshot(ids);
        for (id, count) in snapshot.iter_mut() {
            if let Some(stored) = self.counts.get(id) {
                *count = *stored.value();
            }
        }
        Ok(snapshot)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
