//! `CacheEntry` and HTTP header parsing (spec §3.1, §4.2).

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel used for a timestamp/duration field that is absent.
pub const ABSENT: i64 = -1;

/// One cached response (spec §3.1).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The exact request URL; primary key.
    pub url: String,
    /// Bucket index, `hash_url(&url)`.
    pub hash: usize,
    /// Absolute path to the body file.
    pub cachename: PathBuf,
    /// `ETag` header value. `Some("")` is a present-but-empty ETag;
    /// `None` means the header was absent.
    pub etag: Option<String>,
    /// `Last-Modified`, as Unix seconds, or [`ABSENT`].
    pub lm: i64,
    /// `Expires`, as Unix seconds, or [`ABSENT`].
    pub expires: i64,
    /// `Date`, as Unix seconds, or [`ABSENT`].
    pub date: i64,
    /// `Age`, in seconds, or [`ABSENT`].
    pub age: i64,
    /// `Cache-Control: max-age=N`, in seconds, or [`ABSENT`].
    pub max_age: i64,
    /// Body length on disk, in bytes.
    pub size: u64,
    /// Monotonic hit counter.
    pub hits: u64,
    /// Derived freshness lifetime, in seconds (spec §4.3).
    pub freshness_lifetime: i64,
    /// Derived corrected initial age, in seconds (spec §4.3).
    pub corrected_initial_age: i64,
    /// Wall-clock time (Unix seconds) the response was received.
    pub response_time: i64,
    /// `Cache-Control: must-revalidate` seen while parsing.
    pub must_revalidate: bool,
    /// Set when parsing sees `no-cache`/`no-store`; such an entry is never
    /// stored.
    pub no_cache: bool,
    /// In-use counter; the entry is busy (ineligible for removal) while > 0.
    pub locked: u32,
}

impl CacheEntry {
    /// A blank entry for `url`, with every timestamp/duration at its
    /// "absent" sentinel.
    pub fn new(url: String) -> Self {
        let hash = crate::hash::hash_url(&url);
        Self {
            url,
            hash,
            cachename: PathBuf::new(),
            etag: None,
            lm: ABSENT,
            expires: ABSENT,
            date: ABSENT,
            age: ABSENT,
            max_age: ABSENT,
            size: 0,
            hits: 0,
            freshness_lifetime: 0,
            corrected_initial_age: 0,
            response_time: 0,
            must_revalidate: false,
            no_cache: false,
            locked: 0,
        }
    }

    /// Merge an ordered sequence of `Name: Value` header lines into this
    /// entry (spec §4.2). `max_entry_size` drives the `Content-Length`
    /// oversize check, which sets `no_cache`.
    pub fn parse_headers(&mut self, headers: &[String], max_entry_size: u64) {
        for header in headers {
            let Some((name, value)) = split_header(header) else {
                continue;
            };
            match name {
                "ETag" => self.etag = Some(value.to_string()),
                "Last-Modified" => self.lm = parse_http_date(value),
                "Expires" => self.expires = parse_http_date(value),
                "Date" => self.date = parse_http_date(value),
                "Age" => self.age = value.trim().parse().unwrap_or(ABSENT),
                "Content-Length" => {
                    if let Ok(len) = value.trim().parse::<u64>() {
                        if len > max_entry_size {
                            self.no_cache = true;
                        }
                    }
                }
                "Cache-Control" => self.apply_cache_control_directives(value),
                _ => {}
            }
        }
    }

    fn apply_cache_control_directives(&mut self, value: &str) {
        for directive in value.split(',').map(str::trim) {
            if directive.eq_ignore_ascii_case("no-cache") || directive.eq_ignore_ascii_case("no-store") {
                self.no_cache = true;
            } else if directive.eq_ignore_ascii_case("must-revalidate") {
                self.must_revalidate = true;
            } else if let Some(age) = directive
                .strip_prefix("max-age=")
                .or_else(|| directive.strip_prefix("max-age ="))
            {
                if let Ok(age) = age.trim().parse::<i64>() {
                    self.max_age = age;
                }
            }
            // public, private, no-transform, proxy-revalidate, s-max-age: ignored.
        }
    }
}

/// Split a `Name: Value` header line. Returns `None` for malformed lines.
fn split_header(header: &str) -> Option<(&str, &str)> {
    let colon = header.find(':')?;
    let name = header[..colon].trim();
    let value = header[colon + 1..].trim();
    Some((name, value))
}

fn parse_http_date(value: &str) -> i64 {
    httpdate::parse_http_date(value)
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(ABSENT)
}

/// Current wall-clock time, in Unix seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Headers that apply only to a single transport hop and must never be
/// persisted to the metadata file (spec §4.2).
const HOP_BY_HOP: [&str; 6] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "Transfer-Encoding",
    "Upgrade",
];

/// Is `header` one of the hop-by-hop headers?
pub fn is_hop_by_hop_header(header: &str) -> bool {
    let Some((name, _)) = split_header(header) else {
        return false;
    };
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Filter a raw header list down to the subset that may be persisted.
pub fn strip_hop_by_hop<'a>(headers: &'a [String]) -> Vec<&'a str> {
    headers
        .iter()
        .filter(|h| !is_hop_by_hop_header(h))
        .map(String::as_str)
        .collect()
}
