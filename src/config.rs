//! Cache-wide tunables (RFC 2616 §13 policy knobs), see spec §3.4.

use crate::error::{CacheError, CacheResult};

const MEGA: u64 = 1024 * 1024;

/// Default total cache size: 20 MiB.
pub const DEFAULT_TOTAL_SIZE: u64 = 20 * MEGA;
/// Minimum total cache size: 5 MiB.
pub const MIN_CACHE_TOTAL_SIZE: u64 = 5 * MEGA;
/// Default max size of a single cached entry: 3 MiB.
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 3 * MEGA;
/// Default freshness lifetime when no other signal is available: 24h.
pub const DEFAULT_EXPIRATION_SECS: i64 = 24 * 3600;
/// Cap on the heuristic (Last-Modified derived) freshness lifetime: 48h.
pub const MAX_LM_EXPIRATION_SECS: i64 = 48 * 3600;
/// Number of fresh inserts between automatic index rewrites.
pub const DUMP_FREQUENCY: u32 = 10;

/// How the cache should behave when the embedding client reports that it has
/// no network connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectedMode {
    /// Normal operation: always attempt to use the network when required.
    #[default]
    None,
    /// Serve from cache even if stale; do not attempt to revalidate.
    Normal,
    /// Serve from cache even if stale, and treat cache misses for any URL
    /// outside the cache as fatal rather than attempting a network fetch.
    External,
}

/// Cache-wide configuration. Every field has a default and, where
/// applicable, a constrained range enforced by its setter (spec §3.4).
#[derive(Debug, Clone)]
pub struct CachePolicy {
    total_size: u64,
    folder_size: u64,
    gc_buffer: u64,
    max_entry_size: u64,
    default_expiration: i64,
    enabled: bool,
    cache_protected: bool,
    expire_ignored: bool,
    always_validate: bool,
    disconnected: DisconnectedMode,
    max_age: i64,
    max_stale: i64,
    min_fresh: i64,
    cache_control: Vec<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            total_size: DEFAULT_TOTAL_SIZE,
            folder_size: DEFAULT_TOTAL_SIZE / 10,
            gc_buffer: DEFAULT_TOTAL_SIZE / 10,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            default_expiration: DEFAULT_EXPIRATION_SECS,
            enabled: true,
            cache_protected: false,
            expire_ignored: false,
            always_validate: false,
            disconnected: DisconnectedMode::None,
            max_age: -1,
            max_stale: -1,
            min_fresh: -1,
            cache_control: Vec::new(),
        }
    }
}

impl CachePolicy {
    /// Total size budget for the cache, in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes reserved for metadata and slot directories (`total_size / 10`).
    pub fn folder_size(&self) -> u64 {
        self.folder_size
    }

    /// Free headroom, in bytes, that garbage collection aims to leave behind.
    pub fn gc_buffer(&self) -> u64 {
        self.gc_buffer
    }

    pub fn max_entry_size(&self) -> u64 {
        self.max_entry_size
    }

    pub fn default_expiration(&self) -> i64 {
        self.default_expiration
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_cache_protected(&self) -> bool {
        self.cache_protected
    }

    pub fn set_cache_protected(&mut self, protected: bool) {
        self.cache_protected = protected;
    }

    pub fn is_expire_ignored(&self) -> bool {
        self.expire_ignored
    }

    pub fn set_expire_ignored(&mut self, ignored: bool) {
        self.expire_ignored = ignored;
    }

    pub fn always_validate(&self) -> bool {
        self.always_validate
    }

    pub fn set_always_validate(&mut self, validate: bool) {
        self.always_validate = validate;
    }

    pub fn disconnected_mode(&self) -> DisconnectedMode {
        self.disconnected
    }

    pub fn set_disconnected_mode(&mut self, mode: DisconnectedMode) {
        self.disconnected = mode;
    }

    pub fn request_max_age(&self) -> i64 {
        self.max_age
    }

    pub fn request_max_stale(&self) -> i64 {
        self.max_stale
    }

    pub fn request_min_fresh(&self) -> i64 {
        self.min_fresh
    }

    /// Set the total cache size, in bytes. Values below
    /// [`MIN_CACHE_TOTAL_SIZE`] are clamped up rather than rejected (spec §8
    /// boundary behavior). Recomputes `folder_size` and `gc_buffer` as 10%
    /// of the new total. Returns `true` if the new size is smaller than the
    /// old one (the caller should trigger GC and an index rewrite).
    pub fn set_max_size(&mut self, size: u64) -> bool {
        let new_size = size.max(MIN_CACHE_TOTAL_SIZE);
        let old_size = self.total_size;
        self.total_size = new_size;
        self.folder_size = new_size / 10;
        self.gc_buffer = new_size / 10;
        new_size < old_size
    }

    /// Set the maximum size of a single cache entry, in bytes. Must be
    /// greater than zero and less than `total_size - folder_size`.
    /// Returns `true` if the new size is smaller than the old one.
    pub fn set_max_entry_size(&mut self, size: u64) -> CacheResult<bool> {
        if size == 0 || size >= self.total_size.saturating_sub(self.folder_size) {
            return Err(CacheError::Config(format!(
                "max_entry_size must be in (0, {}), got {}",
                self.total_size - self.folder_size,
                size
            )));
        }
        let old_size = self.max_entry_size;
        self.max_entry_size = size;
        Ok(size < old_size)
    }

    pub fn set_default_expiration(&mut self, seconds: i64) {
        self.default_expiration = seconds;
    }

    /// Parse and store request-side `Cache-Control` headers
    /// (`max-age`, `max-stale`, `min-fresh`; `no-cache`/`no-store` disable
    /// the cache entirely). Each string must be a complete
    /// `Cache-Control: ...` header line.
    pub fn set_cache_control(&mut self, headers: &[String]) -> CacheResult<()> {
        for header in headers {
            let (name, value) = header.split_once(':').ok_or_else(|| {
                CacheError::Internal(format!("malformed Cache-Control header: {header}"))
            })?;
            if name.trim() != "Cache-Control" {
                return Err(CacheError::Internal(
                    "expected Cache-Control header not found".to_string(),
                ));
            }
            let value = value.trim();
            if value == "no-cache" || value == "no-store" {
                self.enabled = false;
            } else if value == "max-stale" {
                self.max_stale = 0;
            } else if let Some(n) = value.strip_prefix("max-stale=") {
                self.max_stale = n.trim().parse().unwrap_or(-1);
            } else if let Some(n) = value.strip_prefix("max-age=") {
                self.max_age = n.trim().parse().unwrap_or(-1);
            } else if let Some(n) = value.strip_prefix("min-fresh=") {
                self.min_fresh = n.trim().parse().unwrap_or(-1);
            }
        }
        self.cache_control = headers.to_vec();
        Ok(())
    }

    pub fn cache_control(&self) -> &[String] {
        &self.cache_control
    }
}
