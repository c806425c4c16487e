//! Persistent tally store using sled database
//!
//! sled keeps an exclusive lock on its directory, so this backend serves one
//! process per directory. Use the mapped store to share counters between
//! processes on a host.

use ballotbox_core::{OptionId, TallyError, TallyKey, TallyResult, TallySnapshot, TallyStore};
use parking_lot::Mutex;
use sled::{Db, Tree};
use std::path::Path;

use crate::lock::{acquire_local, LockPolicy};
use crate::store::{next_count, zeroed_snapshot};

/// Persistent tally store backed by sled database
pub struct SledTallyStore {
    db: Db,
    counts: Tree,
    lock: Mutex<()>,
    policy: LockPolicy,
}

impl SledTallyStore {
    pub fn open<P: AsRef<Path>>(path: P, key: TallyKey, policy: LockPolicy) -> TallyResult<Self> {
        let db = sled::open(path).map_err(unavailable)?;
        let counts = db.open_tree(key.tree_name()).map_err(unavailable)?;

        Ok(Self {
            db,
            counts,
            lock: Mutex::new(()),
            policy,
        })
    }

    fn read_count(&self, id: OptionId) -> TallyResult<u64> {
        match self.counts.get(id.0.to_be_bytes()).map_err(unavailable)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    TallyError::StoreUnavailable(format!("corrupt counter for option {id}"))
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn write_count(&self, id: OptionId, count: u64) -> TallyResult<()> {
        self.counts
            .insert(id.0.to_be_bytes(), count.to_be_bytes().to_vec())
            .map_err(unavailable)?;
        // Flush to disk
        self.db.flush().map_err(unavailable)?;
        Ok(())
    }

}

impl TallyStore for SledTallyStore {
    fn increment(&self, id: OptionId) -> TallyResult<u64> {
        let _guard = acquire_local(&self.lock, self.policy)?;

        let next = next_count(id, self.read_count(id)?)?;
        self.write_count(id, next)?;

        Ok(next)
    }

    fn snapshot(&self, ids: &[OptionId]) -> TallyResult<TallySnapshot> {
        let mut snapshot = zeroed_snapshot(ids);
        for (id, count) in snapshot.iter_mut() {
            *count = self.read_count(*id)?;
        }
        Ok(snapshot)
    }

    fn name(&self) -> &'static str {
        "sled"
    }
}

fn unavailable(err: sled::Error) -> TallyError {
    TallyError::StoreUnavailable(err.to_string())
}
