//! RFC 2616 §13 freshness / revalidation engine (spec §4.3, §4.4).

use crate::config::{CachePolicy, MAX_LM_EXPIRATION_SECS};
use crate::entry::{now_secs, CacheEntry, ABSENT};

/// Compute `response_time`, `corrected_initial_age`, and `freshness_lifetime`
/// for `entry`, given the wall-clock `request_time` of when the request that
/// produced it was made (spec §4.3).
pub fn calculate_time(entry: &mut CacheEntry, request_time: i64, default_expiration: i64) {
    entry.response_time = now_secs();

    let apparent_age = (entry.response_time - entry.date).max(0);
    let corrected_received_age = apparent_age.max(entry.age);
    let response_delay = entry.response_time - request_time;
    entry.corrected_initial_age = corrected_received_age + response_delay;

    let freshness_lifetime = if entry.max_age != ABSENT {
        entry.max_age
    } else if entry.expires != ABSENT {
        entry.expires - entry.date
    } else if entry.lm != ABSENT {
        ((entry.date - entry.lm) / 10).min(MAX_LM_EXPIRATION_SECS)
    } else {
        default_expiration
    };

    entry.freshness_lifetime = freshness_lifetime.max(0);
}

/// Is `entry` usable without revalidation under the current request-side
/// directives (spec §4.3)?
pub fn is_valid(entry: &CacheEntry, policy: &CachePolicy) -> bool {
    if policy.always_validate() {
        return false;
    }
    if entry.must_revalidate {
        return false;
    }

    let resident_time = now_secs() - entry.response_time;
    let current_age = entry.corrected_initial_age + resident_time;

    if policy.request_max_age() >= 0 && current_age > policy.request_max_age() {
        return false;
    }
    if policy.request_min_fresh() >= 0
        && entry.freshness_lifetime < current_age + policy.request_min_fresh()
    {
        return false;
    }

    let max_stale = policy.request_max_stale().max(0);
    entry.freshness_lifetime + max_stale > current_age
}

/// Build the conditional-request headers for a cached entry (spec §4.4).
/// Mirrors the reference implementation: `If-None-Match` and
/// `If-Modified-Since` are independent, not mutually exclusive.
pub fn conditional_request_headers(entry: &CacheEntry) -> Vec<String> {
    let mut headers = Vec::new();

    if let Some(etag) = &entry.etag {
        if !etag.is_empty() {
            headers.push(format!("If-None-Match: {etag}"));
        }
    }

    let candidate = if entry.lm > 0 {
        Some(entry.lm)
    } else if entry.max_age > 0 {
        Some(entry.max_age)
    } else if entry.expires > 0 {
        Some(entry.expires)
    } else {
        None
    };

    if let Some(secs) = candidate {
        let date = std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs as u64);
        headers.push(format!("If-Modified-Since: {}", httpdate::fmt_http_date(date)));
    }

    headers
}
