//! Store-wide mutual exclusion
//!
//! Increments take two locks in order: an in-process mutex, then (for
//! host-shared stores) an exclusive `flock` on the store's lock file. Both are
//! held by guards and released on every exit path.

use ballotbox_core::{TallyError, TallyResult};
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use std::fs::File;
use std::io;
use std::time::{Duration, Instant};
use tracing::warn;

/// Poll interval while waiting on a contended host lock with a deadline
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// How long an increment may wait for the store lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockPolicy {
    /// `None` blocks until the lock is granted
    pub timeout: Option<Duration>,
}

impl LockPolicy {
    pub fn blocking() -> Self {
        Self { timeout: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Acquire the in-process half of the store lock
pub fn acquire_local(lock: &Mutex<()>, policy: LockPolicy) -> TallyResult<MutexGuard<'_, ()>> {
    match policy.timeout {
        None => Ok(lock.lock()),
        Some(timeout) => lock
            .try_lock_for(timeout)
            .ok_or_else(|| TallyError::Lock(format!("lock not acquired within {timeout:?}"))),
    }
}

/// Exclusive advisory lock on a file, held until dropped
pub struct HostLock<'a> {
    file: &'a File,
}

impl<'a> HostLock<'a> {
    pub fn acquire(file: &'a File, policy: LockPolicy) -> TallyResult<Self> {
        match policy.timeout {
            None => FileExt::lock_exclusive(file).map_err(|e| {
                TallyError::Lock(format!("host lock could not be acquired: {e}"))
            })?,
            Some(timeout) => Self::acquire_until(file, Instant::now() + timeout, timeout)?,
        }
        Ok(Self { file })
    }

    fn acquire_until(file: &File, deadline: Instant, timeout: Duration) -> TallyResult<()> {
        loop {
            match FileExt::try_lock_exclusive(file) {
                Ok(()) => return Ok(()),
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Err(TallyError::Lock(format!(
                            "host lock not acquired within {timeout:?}"
                        )));
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(TallyError::Lock(format!(
                        "host lock could not be acquired: {e}"
                    )))
                }
            }
        }
    }
}

impl Drop for HostLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.file) {
            warn!("Failed to release host lock: {}", e);
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind() || err.kind() == io::ErrorKind::WouldBlock
}
