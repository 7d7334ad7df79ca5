//! On-disk HTTP/1.1 response cache for the DAP client library.
//!
//! # Features
//!
//! - RFC 2616 §13 freshness: `max-age`, `Expires`, heuristic
//!   `Last-Modified`-derived lifetimes, and the request-side `max-age`/
//!   `max-stale`/`min-fresh` directives
//! - Conditional revalidation via `If-None-Match` / `If-Modified-Since`
//! - A persistent, bucketed on-disk layout (`.index`, per-bucket slot
//!   directories, `.meta` sidecar files) compatible across process
//!   restarts
//! - Two-phase garbage collection: expire, then evict by ascending hit
//!   count, bounded by a configurable total-size budget
//! - Single-user process locking (`.lock`) plus an in-process registry so
//!   that an entry checked out by a caller is never evicted out from
//!   under it
//!
//! # Usage
//!
//! ```no_run
//! use dap_http_cache::HttpCache;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = HttpCache::new("/tmp/dods-cache", false)?;
//!
//! let headers = vec!["Cache-Control: max-age=3600".to_string()];
//! cache.cache_response("http://example.com/data.dods", 0, &headers, &b"..."[..])?;
//!
//! if cache.is_url_valid("http://example.com/data.dods")? {
//!     let body = cache.get_cached_response_body("http://example.com/data.dods")?;
//!     println!("{} bytes from cache", body.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cleanup;
pub mod config;
pub mod entry;
pub mod env;
pub mod error;
pub mod freshness;
pub mod gc;
pub mod hash;
pub mod index;
pub mod lock;
pub mod store;
pub mod table;

pub use cache::HttpCache;
pub use config::{CachePolicy, DisconnectedMode};
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use lock::BodyHandle;
