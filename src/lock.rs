//! Process-wide exclusivity and the in-use entry registry (spec §4.7, §5).
//!
//! Two distinct locks exist. [`ProcessLock`] is the `.lock` sentinel file
//! that keeps a second process from opening the same persistent store.
//! [`InUseRegistry`] is the in-memory bookkeeping that tracks which body
//! handles are outstanding, so a locked `CacheEntry` is never removed by GC
//! or `purge_cache` while a caller still holds it.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{CacheError, CacheResult};
use crate::table::EntryHandle;

const CACHE_LOCK: &str = ".lock";

/// Holds the process-wide `.lock` file for as long as the cache is open.
/// Dropping it removes the file, releasing the store for another process.
pub struct ProcessLock {
    path: PathBuf,
    _file: File,
}

impl ProcessLock {
    /// Acquire the lock at `root/.lock`. If the file already exists and
    /// `force` is false, the store is considered held by another process
    /// and `Ok(None)` is returned. With `force`, a stale lock file is
    /// removed and re-created.
    pub fn acquire(root: &Path, force: bool) -> CacheResult<Option<Self>> {
        fs::create_dir_all(root)?;
        let path = root.join(CACHE_LOCK);

        if path.exists() {
            if force {
                fs::remove_file(&path)?;
            } else {
                return Ok(None);
            }
        }

        let file = File::create(&path)?;
        Ok(Some(Self { path, _file: file }))
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Opaque handle returned by `get_cached_response`/`get_cached_response_body`,
/// to be passed back to `release_cached_response`.
pub type BodyHandle = u64;

/// Tracks outstanding (locked) body handles under a single mutex, mirroring
/// the original's `d_locked_entries` map guarded by the interface mutex.
#[derive(Default)]
pub struct InUseRegistry {
    next_id: AtomicU64,
    open: Mutex<Vec<(BodyHandle, EntryHandle)>>,
}

impl InUseRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            open: Mutex::new(Vec::new()),
        }
    }

    /// Record that `entry` has been handed out to a caller. Increments the
    /// entry's `locked` counter and returns a fresh handle.
    pub fn record(&self, entry: &EntryHandle) -> BodyHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        entry.lock().expect("entry mutex poisoned").locked += 1;
        self.open
            .lock()
            .expect("registry mutex poisoned")
            .push((id, EntryHandle::clone(entry)));
        id
    }

    /// Release `handle`, decrementing its entry's `locked` counter.
    /// Returns an error if `handle` is unknown (already released, or never
    /// issued).
    pub fn release(&self, handle: BodyHandle) -> CacheResult<()> {
        let mut open = self.open.lock().expect("registry mutex poisoned");
        let idx = open
            .iter()
            .position(|(id, _)| *id == handle)
            .ok_or_else(|| CacheError::Internal("release of an unknown body handle".to_string()))?;
        let (_, entry) = open.remove(idx);
        let mut guard = entry.lock().expect("entry mutex poisoned");
        if guard.locked == 0 {
            return Err(CacheError::Internal(
                "an unlocked entry was released".to_string(),
            ));
        }
        guard.locked -= 1;
        Ok(())
    }

    /// True if any handle is currently outstanding. `purge_cache` refuses
    /// to run while this holds.
    pub fn has_outstanding(&self) -> bool {
        !self.open.lock().expect("registry mutex poisoned").is_empty()
    }
}
