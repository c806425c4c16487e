//! Host-shared tally store on a memory mapped file
//!
//! Layout: a 16 byte header (magic, layout version, slot capacity, reserved;
//! native endian u32 each) followed by `capacity` slots of two 8 byte words,
//! `[key, count]`. A key is `OCCUPIED | option id`, zero marks a free slot.
//! Slots are found by linear probing from `id % capacity` and never freed.
//!
//! Every operation maps the file at its path afresh, so all processes on the
//! host see one table even after the file is removed and recreated. Writers
//! serialize on an in-process mutex and an exclusive `flock` of the sibling
//! `.lock` file. Readers take no lock: each word is read atomically, a new
//! slot's count is published before its key, and the magic is published last
//! when a file is initialized.

use ballotbox_core::{OptionId, TallyError, TallyKey, TallyResult, TallySnapshot, TallyStore};
use memmap2::MmapRaw;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

use crate::lock::{acquire_local, HostLock, LockPolicy};
use crate::store::{next_count, zeroed_snapshot};

const MAGIC: u32 = 0x5941_4c54; // "TLAY" little endian
const LAYOUT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;
const SLOT_LEN: usize = 16;
const OCCUPIED: u64 = 1 << 32;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const CAPACITY_OFFSET: usize = 8;

/// Slots in a newly created store
pub const DEFAULT_CAPACITY: u32 = 1024;

/// Tally store shared by every process on the host
pub struct MappedTallyStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock: Mutex<()>,
    capacity: u32,
    policy: LockPolicy,
}

impl MappedTallyStore {
    /// Attach to the host's store, creating it if absent
    pub fn open(dir: &Path, key: TallyKey, policy: LockPolicy) -> TallyResult<Self> {
        Self::open_with_capacity(dir, key, policy, DEFAULT_CAPACITY)
    }

    /// Like `open`, with `capacity` slots if this call creates the file
    pub fn open_with_capacity(
        dir: &Path,
        key: TallyKey,
        policy: LockPolicy,
        capacity: u32,
    ) -> TallyResult<Self> {
        if capacity == 0 {
            return Err(TallyError::StoreUnavailable("capacity must be non-zero".into()));
        }
        fs::create_dir_all(dir).map_err(|e| {
            TallyError::StoreUnavailable(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(key.file_name());
        let store = Self {
            lock_path: path.with_extension("lock"),
            path,
            lock: Mutex::new(()),
            capacity,
            policy,
        };

        // Fail early on an unusable file
        store.attach_for_read()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Slot capacity of the file currently at `path`
    pub fn capacity(&self) -> TallyResult<usize> {
        Ok(self.attach_for_read()?.capacity)
    }

    fn open_lock_file(&self) -> TallyResult<File> {
        open_rw(&self.lock_path).map_err(|e| {
            TallyError::Lock(format!("unable to create lock {}: {}", self.lock_path.display(), e))
        })
    }

    fn open_file(&self) -> TallyResult<File> {
        open_rw(&self.path).map_err(|e| {
            TallyError::StoreUnavailable(format!("unable to open {}: {}", self.path.display(), e))
        })
    }

    /// Map the store, creating or finishing its header. Caller holds the host lock.
    fn attach_locked(&self) -> TallyResult<Attachment> {
        let file = self.open_file()?;
        Attachment::create_or_map(&file, &self.path, self.capacity)
    }

    /// Map the store without the host lock unless it still needs creating
    fn attach_for_read(&self) -> TallyResult<Attachment> {
        let file = self.open_file()?;
        if let Some(attachment) = Attachment::map_existing(&file, &self.path)? {
            return Ok(attachment);
        }

        let lock_file = self.open_lock_file()?;
        let _host = HostLock::acquire(&lock_file, self.policy)?;
        self.attach_locked()
    }
}

impl TallyStore for MappedTallyStore {
    fn increment(&self, id: OptionId) -> TallyResult<u64> {
        let _local = acquire_local(&self.lock, self.policy)?;
        let lock_file = self.open_lock_file()?;
        let _host = HostLock::acquire(&lock_file, self.policy)?;
        let attachment = self.attach_locked()?;

        let next = next_count(id, attachment.read_count(id))?;
        attachment.write_count(id, next)?;

        Ok(next)
    }

    fn snapshot(&self, ids: &[OptionId]) -> TallyResult<TallySnapshot> {
        let attachment = self.attach_for_read()?;
        let mut snapshot = zeroed_snapshot(ids);
        for (id, count) in snapshot.iter_mut() {
            *count = attachment.read_count(*id);
        }
        Ok(snapshot)
    }

    fn name(&self) -> &'static str {
        "mapped"
    }
}

/// One mapping of the store file, dropped at the end of each operation
struct Attachment {
    map: MmapRaw,
    capacity: usize,
}

impl Attachment {
    /// Size the file if empty, initialize a header never written, validate.
    /// Caller holds the host lock.
    fn create_or_map(file: &File, path: &Path, capacity: u32) -> TallyResult<Self> {
        let len = file_len(file, path)?;
        if len == 0 {
            let size = HEADER_LEN + capacity as usize * SLOT_LEN;
            file.set_len(size as u64)
                .map_err(|e| unavailable(path, e.to_string()))?;
        } else if len < HEADER_LEN {
            return Err(unavailable(path, format!("truncated store ({len} bytes)")));
        }

        let map = map_raw(file, path)?;
        if header(&map, MAGIC_OFFSET).load(Ordering::Acquire) == 0 {
            // Fresh, or left by a creator that died before publishing the magic
            let slots = (map.len() - HEADER_LEN) / SLOT_LEN;
            let slots = u32::try_from(slots)
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| unavailable(path, format!("cannot hold {slots} slots")))?;
            header(&map, VERSION_OFFSET).store(LAYOUT_VERSION, Ordering::Relaxed);
            header(&map, CAPACITY_OFFSET).store(slots, Ordering::Relaxed);
            header(&map, MAGIC_OFFSET).store(MAGIC, Ordering::Release);
            map.flush().map_err(|e| unavailable(path, e.to_string()))?;
            debug!("Created tally store {} with {} slots", path.display(), slots);
        }

        Self::validate(map, path)
    }

    /// Map an initialized store, or `None` if it still needs creating
    fn map_existing(file: &File, path: &Path) -> TallyResult<Option<Self>> {
        if file_len(file, path)? < HEADER_LEN {
            return Ok(None);
        }
        let map = map_raw(file, path)?;
        if header(&map, MAGIC_OFFSET).load(Ordering::Acquire) == 0 {
            return Ok(None);
        }
        Self::validate(map, path).map(Some)
    }

    fn validate(map: MmapRaw, path: &Path) -> TallyResult<Self> {
        if header(&map, MAGIC_OFFSET).load(Ordering::Acquire) != MAGIC {
            return Err(unavailable(path, "not a tally store".into()));
        }
        let version = header(&map, VERSION_OFFSET).load(Ordering::Relaxed);
        if version != LAYOUT_VERSION {
            return Err(unavailable(path, format!("unsupported layout version {version}")));
        }
        let capacity = header(&map, CAPACITY_OFFSET).load(Ordering::Relaxed) as usize;
        if capacity == 0 || map.len() < HEADER_LEN + capacity * SLOT_LEN {
            return Err(unavailable(path, format!("store shorter than its {capacity} slots")));
        }

        Ok(Self { map, capacity })
    }

    fn slot(&self, index: usize) -> (&AtomicU64, &AtomicU64) {
        debug_assert!(index < self.capacity);
        let offset = HEADER_LEN + index * SLOT_LEN;
        // SAFETY: `validate` checked the mapping covers every slot. Offsets are
        // multiples of 8 from a page aligned base. The pointer comes from a
        // raw shared mapping, never from a Rust reference to its bytes, and
        // slot words are only accessed through these atomics while `self`
        // keeps the mapping alive.
        unsafe {
            let key = self.map.as_mut_ptr().add(offset) as *const AtomicU64;
            (&*key, &*key.add(1))
        }
    }

    fn probe(&self, id: OptionId) -> impl Iterator<Item = usize> + '_ {
        let start = id.0 as usize % self.capacity;
        (0..self.capacity).map(move |i| (start + i) % self.capacity)
    }

    fn read_count(&self, id: OptionId) -> u64 {
        let tag = OCCUPIED | u64::from(id.0);
        for index in self.probe(id) {
            let (key, count) = self.slot(index);
            match key.load(Ordering::Acquire) {
                0 => return 0,
                k if k == tag => return count.load(Ordering::Acquire),
                _ => continue,
            }
        }
        0
    }

    /// Store `value` for `id`, claiming a slot if needed. Caller holds the lock.
    fn write_count(&self, id: OptionId, value: u64) -> TallyResult<()> {
        let tag = OCCUPIED | u64::from(id.0);
        for index in self.probe(id) {
            let (key, count) = self.slot(index);
            match key.load(Ordering::Acquire) {
                0 => {
                    count.store(value, Ordering::Release);
                    key.store(tag, Ordering::Release);
                    debug!("Claimed slot {} for option {}", index, id);
                    return Ok(());
                }
                k if k == tag => {
                    count.store(value, Ordering::Release);
                    return Ok(());
                }
                _ => continue,
            }
        }
        Err(TallyError::StoreUnavailable(format!(
            "counter table full ({} slots)",
            self.capacity
        )))
    }
}

/// Header word at `offset`
fn header(map: &MmapRaw, offset: usize) -> &AtomicU32 {
    debug_assert!(offset + 4 <= HEADER_LEN && map.len() >= HEADER_LEN);
    // SAFETY: callers only map files of at least HEADER_LEN bytes, offsets
    // are multiples of 4 from a page aligned base, and header words are only
    // accessed atomically.
    unsafe { &*(map.as_mut_ptr().add(offset) as *const AtomicU32) }
}

fn open_rw(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(true).create(true).open(path)
}

fn file_len(file: &File, path: &Path) -> TallyResult<usize> {
    let len = file
        .metadata()
        .map_err(|e| unavailable(path, e.to_string()))?
        .len();
    usize::try_from(len).map_err(|_| unavailable(path, format!("store too large ({len} bytes)")))
}

fn map_raw(file: &File, path: &Path) -> TallyResult<MmapRaw> {
    MmapRaw::map_raw(file).map_err(|e| unavailable(path, e.to_string()))
}

fn unavailable(path: &Path, reason: String) -> TallyError {
    TallyError::StoreUnavailable(format!("{}: {}", path.display(), reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn open(tmp: &TempDir) -> MappedTallyStore {
        MappedTallyStore::open(tmp.path(), TallyKey::DEFAULT, LockPolicy::default()).unwrap()
    }

    #[test]
    fn test_fresh_store_is_zero() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        let ids = [OptionId::from_name("A"), OptionId::from_name("B"), OptionId::from_name("C")];

        let snapshot = store.snapshot(&ids).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.values().all(|c| *c == 0));
        assert_eq!(store.capacity().unwrap(), DEFAULT_CAPACITY as usize);
        assert!(store.path().ends_with(TallyKey::DEFAULT.file_name()));
    }

    #[test]
    fn test_counts_survive_reattach() {
        let tmp = TempDir::new().unwrap();
        let id = OptionId::from_name("Red Team");

        {
            let store = open(&tmp);
            assert_eq!(store.increment(id).unwrap(), 1);
            assert_eq!(store.increment(id).unwrap(), 2);
        }

        let store = open(&tmp);
        assert_eq!(store.snapshot(&[id]).unwrap()[&id], 2);
        assert_eq!(store.increment(id).unwrap(), 3);
    }

    #[test]
    fn test_writes_visible_to_other_attachments() {
        let tmp = TempDir::new().unwrap();
        let writer = open(&tmp);
        let reader = open(&tmp);
        let id = OptionId::from_name("Blue Team");

        writer.increment(id).unwrap();
        assert_eq!(reader.snapshot(&[id]).unwrap()[&id], 1);

        reader.increment(id).unwrap();
        assert_eq!(writer.snapshot(&[id]).unwrap()[&id], 2);
    }

    #[test]
    fn test_follows_recreated_store() {
        let tmp = TempDir::new().unwrap();
        let id = OptionId::from_name("Red Team");

        let long_lived = open(&tmp);
        long_lived.increment(id).unwrap();
        fs::remove_file(long_lived.path()).unwrap();

        // A process started after the teardown creates a new file
        let fresh = open(&tmp);
        assert_eq!(fresh.increment(id).unwrap(), 1);
        assert_eq!(long_lived.increment(id).unwrap(), 2);

        assert_eq!(fresh.snapshot(&[id]).unwrap()[&id], 2);
        assert_eq!(long_lived.snapshot(&[id]).unwrap()[&id], 2);
    }

    #[test]
    fn test_snapshot_recreates_missing_store() {
        let tmp = TempDir::new().unwrap();
        let id = OptionId::from_name("Green Team");
        let store = open(&tmp);
        store.increment(id).unwrap();

        fs::remove_file(store.path()).unwrap();
        fs::remove_file(store.path().with_extension("lock")).unwrap();

        assert_eq!(store.snapshot(&[id]).unwrap()[&id], 0);
        assert!(store.path().is_file());
        assert_eq!(store.increment(id).unwrap(), 1);
    }

    #[test]
    fn test_finishes_interrupted_creation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TallyKey::DEFAULT.file_name());
        // Sized but never given a header
        fs::write(&path, vec![0u8; HEADER_LEN + 4 * SLOT_LEN]).unwrap();

        let store = open(&tmp);
        assert_eq!(store.capacity().unwrap(), 4);
        assert_eq!(store.increment(OptionId(9)).unwrap(), 1);
    }

    #[test]
    fn test_probing_and_full_table() {
        let tmp = TempDir::new().unwrap();
        let store =
            MappedTallyStore::open_with_capacity(tmp.path(), TallyKey::DEFAULT, LockPolicy::default(), 2)
                .unwrap();
        let a = OptionId(4);
        let b = OptionId(6); // same home slot as `a`
        let c = OptionId(7);

        store.increment(a).unwrap();
        store.increment(b).unwrap();
        store.increment(b).unwrap();

        let snapshot = store.snapshot(&[a, b]).unwrap();
        assert_eq!(snapshot[&a], 1);
        assert_eq!(snapshot[&b], 2);

        assert!(matches!(store.increment(c), Err(TallyError::StoreUnavailable(_))));
        assert_eq!(store.snapshot(&[c]).unwrap()[&c], 0);
    }

    #[test]
    fn test_existing_capacity_wins() {
        let tmp = TempDir::new().unwrap();
        let first =
            MappedTallyStore::open_with_capacity(tmp.path(), TallyKey::DEFAULT, LockPolicy::default(), 8)
                .unwrap();
        let second = open(&tmp);

        assert_eq!(first.capacity().unwrap(), 8);
        assert_eq!(second.capacity().unwrap(), 8);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(TallyKey::DEFAULT.file_name()), vec![0xAB; 64]).unwrap();

        let result = MappedTallyStore::open(tmp.path(), TallyKey::DEFAULT, LockPolicy::default());
        assert!(matches!(result, Err(TallyError::StoreUnavailable(_))));
    }

    #[test]
    fn test_overflow_leaves_counter_unchanged() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        let id = OptionId::from_name("A");

        store.attach_for_read().unwrap().write_count(id, u64::MAX).unwrap();

        assert!(matches!(store.increment(id), Err(TallyError::Overflow { .. })));
        assert_eq!(store.snapshot(&[id]).unwrap()[&id], u64::MAX);

        // Both locks were released on the failure path
        assert_eq!(store.increment(OptionId::from_name("B")).unwrap(), 1);
    }

    #[test]
    fn test_concurrent_attachments_lose_no_updates() {
        let tmp = TempDir::new().unwrap();
        let ids = [OptionId::from_name("Red Team"), OptionId::from_name("Blue Team")];

        // Each thread attaches separately, as independent processes would
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::new(open(&tmp));
                thread::spawn(move || {
                    for i in 0..250 {
                        store.increment(ids[(t + i) % 2]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = open(&tmp).snapshot(&ids).unwrap();
        assert_eq!(snapshot[&ids[0]] + snapshot[&ids[1]], 2000);
        assert_eq!(snapshot[&ids[0]], 1000);
    }

    #[test]
    fn test_shared_attachment_across_threads() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(open(&tmp));
        let id = OptionId::from_name("Green Team");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..125 {
                        store.increment(id).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.snapshot(&[id]).unwrap()[&id], 1000);
    }
}
