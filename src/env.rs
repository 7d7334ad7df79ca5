//! Cache root resolution (spec §4.9): `DODS_CACHE`, then `TMP`, then
//! `TEMP`, then `/tmp`, with a `dods-cache/` subdirectory appended when the
//! root wasn't given explicitly.

use std::path::{Path, PathBuf};

const CACHE_ROOT_SUBDIR: &str = "dods-cache";
const CACHE_LOC_FALLBACK: &str = "/tmp";

/// Resolve the cache root directory. If `explicit` is `Some`, it is used
/// as-is (normalized to an absolute-looking path, no subdirectory
/// appended). Otherwise the first of `DODS_CACHE`, `TMP`, `TEMP` that is
/// set is used, falling back to `/tmp`, with `dods-cache/` appended.
pub fn resolve_cache_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(root) = explicit {
        return root.to_path_buf();
    }

    let base = std::env::var_os("DODS_CACHE")
        .or_else(|| std::env::var_os("TMP"))
        .or_else(|| std::env::var_os("TEMP"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CACHE_LOC_FALLBACK));

    base.join(CACHE_ROOT_SUBDIR)
}
