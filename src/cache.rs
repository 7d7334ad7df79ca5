//! `HttpCache`: the public facade tying hashing, storage, freshness, GC,
//! locking and the index together (spec §4, §6).

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::cleanup::CleanupGuard;
use crate::config::{CachePolicy, DUMP_FREQUENCY};
use crate::entry::{now_secs, CacheEntry};
use crate::env;
use crate::error::{CacheError, CacheResult};
use crate::freshness;
use crate::gc;
use crate::index;
use crate::lock::{BodyHandle, InUseRegistry, ProcessLock};
use crate::store;
use crate::table::CacheTable;

struct Inner {
    root: PathBuf,
    policy: CachePolicy,
    table: CacheTable,
    new_entries: u32,
    _lock: ProcessLock,
}

/// A single-user, on-disk HTTP/1.1 response cache.
///
/// Every mutating operation locks the interface mutex for its duration,
/// mirroring the reference implementation's single process-wide mutex
/// guarding the in-memory table; a separate [`InUseRegistry`] tracks
/// outstanding body handles so a response in use is never evicted out from
/// under its caller.
pub struct HttpCache {
    inner: Mutex<Inner>,
    registry: InUseRegistry,
    cleanup: CleanupGuard,
}

static INSTANCE: OnceCell<HttpCache> = OnceCell::new();

impl HttpCache {
    /// Open (or create) the cache rooted at `root`, loading any existing
    /// `.index`. Returns `Err` if another process already holds the lock
    /// and `force` is false.
    pub fn new(root: impl Into<PathBuf>, force: bool) -> CacheResult<Self> {
        let root = root.into();
        let lock = ProcessLock::acquire(&root, force)?.ok_or_else(|| {
            CacheError::Internal(format!(
                "cache at {} is already open by another process",
                root.display()
            ))
        })?;

        let index_path = root.join(".index");
        let mut table = CacheTable::new();
        for entry in index::read(&index_path)? {
            table.insert(entry);
        }
        info!(root = %root.display(), entries = table.entry_count(), "opened HTTP cache");

        let cleanup = CleanupGuard::install()?;

        Ok(Self {
            inner: Mutex::new(Inner {
                root,
                policy: CachePolicy::default(),
                table,
                new_entries: 0,
                _lock: lock,
            }),
            registry: InUseRegistry::new(),
            cleanup,
        })
    }

    /// Open the cache at `root`, or, when `root` is `None`, resolve the
    /// root from `DODS_CACHE`/`TMP`/`TEMP`/`/tmp` the way the original's
    /// `set_cache_root` falls back when the embedding client doesn't supply
    /// one explicitly (spec §6.2).
    pub fn open(root: Option<PathBuf>, force: bool) -> CacheResult<Self> {
        Self::new(env::resolve_cache_root(root.as_deref()), force)
    }

    /// The process-wide singleton cache, created on first call from `root`
    /// (or the environment-resolved root if `root` is `None`). Subsequent
    /// calls ignore their arguments and return the existing instance, as
    /// a cache may only be opened once per process.
    pub fn instance(root: Option<PathBuf>, force: bool) -> CacheResult<&'static HttpCache> {
        if let Some(existing) = INSTANCE.get() {
            return Ok(existing);
        }
        let cache = Self::open(root, force)?;
        Ok(INSTANCE.get_or_init(|| cache))
    }

    /// Read-only access to the policy knobs (total size, expiration
    /// defaults, request-side directives, ...).
    pub fn with_policy<T>(&self, f: impl FnOnce(&CachePolicy) -> T) -> T {
        f(&self.inner.lock().expect("cache mutex poisoned").policy)
    }

    /// Mutate the policy knobs.
    pub fn with_policy_mut<T>(&self, f: impl FnOnce(&mut CachePolicy) -> T) -> T {
        f(&mut self.inner.lock().expect("cache mutex poisoned").policy)
    }

    /// Is there a cached entry for `url`?
    pub fn is_url_in_cache(&self, url: &str) -> bool {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner.table.lookup(url).is_some()
    }

    /// Can the cached response for `url` be used without revalidation?
    pub fn is_url_valid(&self, url: &str) -> CacheResult<bool> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let handle = inner
            .table
            .lookup(url)
            .ok_or_else(|| CacheError::NotFound(url.to_string()))?;
        let entry = handle.lock().expect("entry mutex poisoned");
        Ok(freshness::is_valid(&entry, &inner.policy))
    }

    /// Store a response. Returns `false` (without error) when the response
    /// isn't cacheable: a non-http(s) URL, or a `no-cache`/`no-store`
    /// directive or oversize body found while parsing headers.
    pub fn cache_response<R: Read>(
        &self,
        url: &str,
        request_time: i64,
        headers: &[String],
        body: R,
    ) -> CacheResult<bool> {
        let is_http = url::Url::parse(url)
            .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !is_http {
            return Ok(false);
        }

        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.table.remove(url);

        let mut entry = CacheEntry::new(url.to_string());
        entry.parse_headers(headers, inner.policy.max_entry_size());
        if entry.no_cache {
            debug!(url, "response not cacheable per headers");
            return Ok(false);
        }

        freshness::calculate_time(&mut entry, request_time, inner.policy.default_expiration());

        let cachename = store::create_body_file(&inner.root, entry.hash)?;
        self.cleanup.watch(cachename.clone());
        let size = match store::write_body(&cachename, body).and_then(|size| {
            store::write_metadata(&cachename, headers)?;
            Ok(size)
        }) {
            Ok(size) => size,
            Err(e) => {
                self.cleanup.unwatch(&cachename);
                if let Err(cleanup_err) = store::remove_body(&cachename) {
                    warn!(url, error = %cleanup_err, "failed to unlink partial body after write failure");
                }
                if let Err(cleanup_err) = store::remove_metadata(&cachename) {
                    warn!(url, error = %cleanup_err, "failed to unlink partial metadata after write failure");
                }
                return Err(e);
            }
        };
        self.cleanup.unwatch(&cachename);
        entry.cachename = cachename;
        entry.size = size;

        inner.table.insert(entry);
        inner.new_entries += 1;

        if inner.new_entries > DUMP_FREQUENCY {
            if gc::start_gc(&inner.table, &inner.policy) {
                gc::perform_garbage_collection(&mut inner.table, &inner.policy);
            }
            let index_path = inner.root.join(".index");
            let entries: Vec<CacheEntry> = inner
                .table
                .iter()
                .map(|h| h.lock().expect("entry mutex poisoned").clone())
                .collect();
            index::write(&index_path, entries.iter())?;
            inner.new_entries = 0;
        }

        Ok(true)
    }

    /// Fetch the cached headers and a handle to the body for `url`,
    /// incrementing its hit counter and locking it against removal until
    /// [`HttpCache::release_cached_response`] is called.
    pub fn get_cached_response(&self, url: &str) -> CacheResult<(Vec<String>, BodyHandle)> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let handle = inner
            .table
            .lookup(url)
            .ok_or_else(|| CacheError::NotFound(url.to_string()))?;

        let cachename = handle.lock().expect("entry mutex poisoned").cachename.clone();
        let headers = store::read_metadata(&cachename)?;

        handle.lock().expect("entry mutex poisoned").hits += 1;
        let body_handle = self.registry.record(&handle);
        Ok((headers, body_handle))
    }

    /// Read the cached body bytes for `url`. Does not itself lock the
    /// entry; callers that need to hold it across later operations should
    /// use [`HttpCache::get_cached_response`] first.
    pub fn get_cached_response_body(&self, url: &str) -> CacheResult<Vec<u8>> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let handle = inner
            .table
            .lookup(url)
            .ok_or_else(|| CacheError::NotFound(url.to_string()))?;
        let cachename = handle.lock().expect("entry mutex poisoned").cachename.clone();
        store::read_body(&cachename)
    }

    /// Release a handle obtained from [`HttpCache::get_cached_response`].
    pub fn release_cached_response(&self, handle: BodyHandle) -> CacheResult<()> {
        self.registry.release(handle)
    }

    /// Build the `If-None-Match`/`If-Modified-Since` headers for the
    /// cached entry at `url` (spec §4.4).
    pub fn get_conditional_request_headers(&self, url: &str) -> CacheResult<Vec<String>> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let handle = inner
            .table
            .lookup(url)
            .ok_or_else(|| CacheError::NotFound(url.to_string()))?;
        let entry = handle.lock().expect("entry mutex poisoned");
        Ok(freshness::conditional_request_headers(&entry))
    }

    /// Merge freshly-received headers (typically from a `304 Not
    /// Modified`) into the cached entry for `url`, re-deriving freshness
    /// and writing the merged header set back to the metadata file.
    /// New headers take precedence over stored ones with the same name.
    pub fn update_response(&self, url: &str, request_time: i64, headers: &[String]) -> CacheResult<()> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let handle = inner
            .table
            .lookup(url)
            .ok_or_else(|| CacheError::NotFound(url.to_string()))?;

        let mut entry = handle.lock().expect("entry mutex poisoned");
        entry.parse_headers(headers, inner.policy.max_entry_size());
        freshness::calculate_time(&mut entry, request_time, inner.policy.default_expiration());

        let old_headers = store::read_metadata(&entry.cachename)?;
        let merged = merge_headers(headers, &old_headers);

        self.cleanup.watch(entry.cachename.clone());
        if let Err(e) = store::write_metadata(&entry.cachename, &merged) {
            self.cleanup.unwatch(&entry.cachename);
            if let Err(cleanup_err) = store::remove_metadata(&entry.cachename) {
                warn!(url, error = %cleanup_err, "failed to unlink partial metadata after write failure");
            }
            return Err(e);
        }
        self.cleanup.unwatch(&entry.cachename);
        Ok(())
    }

    /// Delete every unlocked entry from the table, disk, and index.
    /// Refuses (returning an error) if any entry is currently checked out
    /// via [`HttpCache::get_cached_response`].
    pub fn purge_cache(&self) -> CacheResult<()> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        if self.registry.has_outstanding() {
            return Err(CacheError::InUse(
                "attempt to purge the cache with entries in use".to_string(),
            ));
        }

        let removed: Vec<(PathBuf, u64)> = inner
            .table
            .iter()
            .map(|h| {
                let e = h.lock().expect("entry mutex poisoned");
                (e.cachename.clone(), e.size)
            })
            .collect();
        inner.table.retain_unlocked(|_| true);

        for (cachename, _size) in removed {
            store::remove_body(&cachename)?;
            store::remove_metadata(&cachename)?;
        }

        index::delete(&inner.root.join(".index"))?;
        inner.new_entries = 0;
        Ok(())
    }

    /// Run garbage collection immediately, outside the normal
    /// `DUMP_FREQUENCY` cadence.
    pub fn garbage_collect(&self) -> u64 {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let (removed, size) = {
            let removed = gc::perform_garbage_collection(&mut inner.table, &inner.policy);
            (removed, inner.table.current_size())
        };
        debug!(bytes_freed = removed, current_size = size, "ran garbage collection");
        removed
    }

    /// Flush the in-memory table to the `.index` file now.
    pub fn write_index(&self) -> CacheResult<()> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let entries: Vec<CacheEntry> = inner
            .table
            .iter()
            .map(|h| h.lock().expect("entry mutex poisoned").clone())
            .collect();
        let index_path = inner.root.join(".index");
        index::write(&index_path, entries.iter())?;
        inner.new_entries = 0;
        Ok(())
    }
}

/// Merge two header sets, new taking precedence on a name collision, and
/// emit the result ordered by header name descending. Mirrors the
/// original's `std::set<string, HeaderLess>` plus a `rbegin()/rend()` write
/// (spec §4.7, §6.3): the on-disk header order is part of the
/// cross-implementation compatibility contract, not an implementation
/// detail.
fn merge_headers(new_headers: &[String], old_headers: &[String]) -> Vec<String> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for header in new_headers.iter().chain(old_headers.iter()) {
        let key = header
            .split_once(':')
            .map(|(name, _)| name.trim().to_ascii_lowercase())
            .unwrap_or_else(|| header.clone());
        merged.entry(key).or_insert_with(|| header.clone());
    }
    merged.into_values().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fresh_cache() -> (TempDir, HttpCache) {
        let tmp = TempDir::new().unwrap();
        let cache = HttpCache::new(tmp.path(), false).unwrap();
        (tmp, cache)
    }

    #[test]
    fn test_cache_and_retrieve_response() {
        let (_tmp, cache) = fresh_cache();
        let headers = vec!["Cache-Control: max-age=3600".to_string()];
        let stored = cache
            .cache_response("http://x/a", now_secs(), &headers, "hello".as_bytes())
            .unwrap();
        assert!(stored);
        assert!(cache.is_url_in_cache("http://x/a"));
        assert!(cache.is_url_valid("http://x/a").unwrap());

        let body = cache.get_cached_response_body("http://x/a").unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_cache_response_rejects_non_http_url() {
        let (_tmp, cache) = fresh_cache();
        let stored = cache
            .cache_response("ftp://x/a", now_secs(), &[], "hi".as_bytes())
            .unwrap();
        assert!(!stored);
        assert!(!cache.is_url_in_cache("ftp://x/a"));
    }

    #[test]
    fn test_cache_response_rejects_no_store() {
        let (_tmp, cache) = fresh_cache();
        let headers = vec!["Cache-Control: no-store".to_string()];
        let stored = cache
            .cache_response("http://x/a", now_secs(), &headers, "hi".as_bytes())
            .unwrap();
        assert!(!stored);
    }

    #[test]
    fn test_expired_entry_is_not_valid() {
        let (_tmp, cache) = fresh_cache();
        let headers = vec!["Cache-Control: max-age=0".to_string()];
        cache
            .cache_response("http://x/a", now_secs(), &headers, "hi".as_bytes())
            .unwrap();
        assert!(!cache.is_url_valid("http://x/a").unwrap());
    }

    #[test]
    fn test_get_cached_response_locks_entry_until_released() {
        let (_tmp, cache) = fresh_cache();
        cache
            .cache_response("http://x/a", now_secs(), &[], "hi".as_bytes())
            .unwrap();

        let (_headers, handle) = cache.get_cached_response("http://x/a").unwrap();
        assert!(cache.purge_cache().is_err());
        cache.release_cached_response(handle).unwrap();
        assert!(cache.purge_cache().is_ok());
    }

    #[test]
    fn test_purge_cache_removes_all_entries() {
        let (_tmp, cache) = fresh_cache();
        cache
            .cache_response("http://x/a", now_secs(), &[], "hi".as_bytes())
            .unwrap();
        cache.purge_cache().unwrap();
        assert!(!cache.is_url_in_cache("http://x/a"));
    }

    #[test]
    fn test_conditional_request_headers_roundtrip() {
        let (_tmp, cache) = fresh_cache();
        let headers = vec!["ETag: \"abc\"".to_string()];
        cache
            .cache_response("http://x/a", now_secs(), &headers, "hi".as_bytes())
            .unwrap();
        let conditional = cache.get_conditional_request_headers("http://x/a").unwrap();
        assert_eq!(conditional, vec!["If-None-Match: \"abc\""]);
    }

    #[test]
    fn test_update_response_merges_headers() {
        let (_tmp, cache) = fresh_cache();
        let headers = vec![
            "ETag: \"abc\"".to_string(),
            "Content-Type: text/plain".to_string(),
        ];
        cache
            .cache_response("http://x/a", now_secs(), &headers, "hi".as_bytes())
            .unwrap();

        cache
            .update_response(
                "http://x/a",
                now_secs(),
                &["ETag: \"def\"".to_string()],
            )
            .unwrap();

        let (stored, _handle) = cache.get_cached_response("http://x/a").unwrap();
        assert!(stored.iter().any(|h| h == "ETag: \"def\""));
        assert!(stored.iter().any(|h| h == "Content-Type: text/plain"));
        assert!(!stored.iter().any(|h| h == "ETag: \"abc\""));
    }

    #[test]
    fn test_is_url_valid_missing_entry_errors() {
        let (_tmp, cache) = fresh_cache();
        assert!(cache.is_url_valid("http://nope").is_err());
    }

    #[test]
    fn test_write_index_then_reopen_restores_table() {
        let tmp = TempDir::new().unwrap();
        {
            let cache = HttpCache::new(tmp.path(), false).unwrap();
            cache
                .cache_response("http://x/a", now_secs(), &[], "hi".as_bytes())
                .unwrap();
            cache.write_index().unwrap();
        }
        let reopened = HttpCache::new(tmp.path(), false).unwrap();
        assert!(reopened.is_url_in_cache("http://x/a"));
    }
}
