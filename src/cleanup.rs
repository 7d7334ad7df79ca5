//! Open-file watchlist and signal-driven cleanup (spec §4.8).
//!
//! The reference implementation registers a handler for `SIGINT`,
//! `SIGTERM` and `SIGPIPE` that unlinks any cache file currently mid-write
//! and removes the process lock, so a killed client doesn't leave a
//! half-written body or a stale `.lock` behind. `signal-hook`'s `flag`
//! module gives us the async-signal-safe version of the same thing: a
//! handler that only sets an `AtomicBool`, polled from ordinary code.
//!
//! `HttpCache` installs one guard per open cache and calls
//! [`CleanupGuard::watch`]/[`CleanupGuard::unwatch`] around every body and
//! metadata write, so `poll_and_cleanup` has something real to reclaim if
//! the process is interrupted mid-write.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use signal_hook::consts::{SIGINT, SIGPIPE, SIGTERM};
use signal_hook::flag;
use tracing::{info, warn};

/// Tracks files currently open for writing so they can be unlinked if the
/// process is interrupted mid-write, and arms the `SIGINT`/`SIGTERM`/
/// `SIGPIPE` flags that `poll_and_cleanup` checks.
pub struct CleanupGuard {
    open_files: Arc<Mutex<Vec<PathBuf>>>,
    interrupted: Arc<AtomicBool>,
}

impl CleanupGuard {
    /// Register the flag handlers. Returns `Err` if `signal-hook` cannot
    /// install them (e.g. the signal is already handled in a way it can't
    /// share).
    pub fn install() -> std::io::Result<Self> {
        let interrupted = Arc::new(AtomicBool::new(false));
        flag::register(SIGINT, Arc::clone(&interrupted))?;
        flag::register(SIGTERM, Arc::clone(&interrupted))?;
        flag::register(SIGPIPE, Arc::clone(&interrupted))?;
        Ok(Self {
            open_files: Arc::new(Mutex::new(Vec::new())),
            interrupted,
        })
    }

    /// Mark `path` as being actively written. Call before streaming a body
    /// or metadata file; pair with [`CleanupGuard::unwatch`] when done.
    pub fn watch(&self, path: PathBuf) {
        self.open_files.lock().expect("cleanup mutex poisoned").push(path);
    }

    /// Stop tracking `path`; the write completed normally.
    pub fn unwatch(&self, path: &std::path::Path) {
        self.open_files
            .lock()
            .expect("cleanup mutex poisoned")
            .retain(|p| p != path);
    }

    /// Has a tracked signal arrived since the last check?
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// If a signal arrived, unlink every watched file and clear the
    /// watchlist. Call this from the normal control flow (a request loop,
    /// a periodic tick) — `flag::register` only sets a bit, it cannot run
    /// file I/O itself from the handler.
    pub fn poll_and_cleanup(&self) {
        if !self.interrupted.swap(false, Ordering::Relaxed) {
            return;
        }
        warn!("interrupt signal received, cleaning up partial cache files");
        let mut files = self.open_files.lock().expect("cleanup mutex poisoned");
        for path in files.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => info!(?path, "removed partial cache file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(?path, error = %e, "failed to remove partial cache file"),
            }
        }
    }
}
