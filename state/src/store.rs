//! Store selection and counter rules shared by every backend

use ballotbox_core::{
    OptionId, StoreBackend, StoreConfig, TallyError, TallyKey, TallyResult, TallySnapshot,
    TallyStore,
};
use std::sync::Arc;
use tracing::info;

use crate::lock::LockPolicy;
use crate::mapped::MappedTallyStore;
use crate::memory::MemoryTallyStore;
use crate::persistent::SledTallyStore;

/// Directory name of the sled database inside the store directory
const SLED_DIR: &str = "ballotbox-sled";

/// Thread-safe handle to any tally store
pub type SharedTallyStore = Arc<dyn TallyStore>;

/// Count after one more vote; refuses to wrap
pub fn next_count(id: OptionId, current: u64) -> TallyResult<u64> {
    current.checked_add(1).ok_or(TallyError::Overflow { id })
}

/// Snapshot with every id present, missing ones at 0
pub fn zeroed_snapshot(ids: &[OptionId]) -> TallySnapshot {
    ids.iter().map(|id| (*id, 0)).collect()
}

/// Open the store selected by configuration
pub fn open_store(config: &StoreConfig) -> TallyResult<SharedTallyStore> {
    let policy = LockPolicy {
        timeout: config.lock_timeout(),
    };
    let store: SharedTallyStore = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryTallyStore::with_policy(policy)),
        StoreBackend::Sled => Arc::new(SledTallyStore::open(
            config.dir.join(SLED_DIR),
            TallyKey::DEFAULT,
            policy,
        )?),
        StoreBackend::Mapped => Arc::new(MappedTallyStore::open(&config.dir, TallyKey::DEFAULT, policy)?),
    };
    info!("Opened {} tally store in {}", store.name(), config.dir.display());
    Ok(store)
}
