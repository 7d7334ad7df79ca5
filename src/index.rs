//! The `.index` file: a flat ASCII snapshot of every cache entry, read once
//! at startup and rewritten periodically (spec §3.3, §4.6).

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::entry::{CacheEntry, ABSENT};
use crate::error::{CacheError, CacheResult};

const CACHE_EMPTY_ETAG: &str = "@cache@";

/// Read every entry out of `index_path`. Returns an empty vector, not an
/// error, if the file does not exist yet — a fresh cache has no index.
pub fn read(index_path: &Path) -> CacheResult<Vec<CacheEntry>> {
    let file = match File::open(index_path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(parse_line(&line)?);
    }
    Ok(entries)
}

/// Parse one `.index` line into a `CacheEntry` (spec §3.3 field order):
/// `url cachename etag lm expires size range hash hits freshness_lifetime
/// response_time corrected_initial_age must_revalidate`.
fn parse_line(line: &str) -> CacheResult<CacheEntry> {
    let mut fields = line.split_whitespace();
    let malformed = || CacheError::Internal(format!("malformed index line: {line}"));

    let url = fields.next().ok_or_else(malformed)?.to_string();
    let cachename = fields.next().ok_or_else(malformed)?.to_string();
    let etag_field = fields.next().ok_or_else(malformed)?;
    let lm: i64 = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let expires: i64 = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let size: u64 = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let _range = fields.next().ok_or_else(malformed)?; // unused, round-tripped only
    let hash: usize = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let hits: u64 = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let freshness_lifetime: i64 =
        fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let response_time: i64 =
        fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let corrected_initial_age: i64 =
        fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let must_revalidate = fields.next().ok_or_else(malformed)? == "1";

    let mut entry = CacheEntry::new(url);
    entry.hash = hash;
    entry.cachename = PathBuf::from(cachename);
    entry.etag = if etag_field == CACHE_EMPTY_ETAG {
        Some(String::new())
    } else {
        Some(etag_field.to_string())
    };
    entry.lm = lm;
    entry.expires = expires;
    entry.date = ABSENT;
    entry.age = ABSENT;
    entry.max_age = ABSENT;
    entry.size = size;
    entry.hits = hits;
    entry.freshness_lifetime = freshness_lifetime;
    entry.response_time = response_time;
    entry.corrected_initial_age = corrected_initial_age;
    entry.must_revalidate = must_revalidate;
    Ok(entry)
}

/// Overwrite `index_path` with one line per entry in `entries`, in the
/// exact field order and CRLF termination the original writer uses.
pub fn write<'a, I>(index_path: &Path, entries: I) -> CacheResult<()>
where
    I: IntoIterator<Item = &'a CacheEntry>,
{
    let mut out = File::create(index_path)?;
    for entry in entries {
        write_line(&mut out, entry)?;
    }
    out.flush()?;
    Ok(())
}

fn write_line(out: &mut File, entry: &CacheEntry) -> CacheResult<()> {
    let etag = match &entry.etag {
        Some(e) if !e.is_empty() => e.as_str(),
        _ => CACHE_EMPTY_ETAG,
    };
    let range = '0'; // not used, preserved for on-disk compatibility
    let must_revalidate = if entry.must_revalidate { '1' } else { '0' };
    write!(
        out,
        "{} {} {} {} {} {} {} {} {} {} {} {} {}\r\n",
        entry.url,
        entry.cachename.display(),
        etag,
        entry.lm,
        entry.expires,
        entry.size,
        range,
        entry.hash,
        entry.hits,
        entry.freshness_lifetime,
        entry.response_time,
        entry.corrected_initial_age,
        must_revalidate,
    )?;
    Ok(())
}

/// Delete the index file, tolerating its absence.
pub fn delete(index_path: &Path) -> CacheResult<()> {
    match fs::remove_file(index_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_entry() -> CacheEntry {
        let mut e = CacheEntry::new("http://example.com/a.dods".to_string());
        e.cachename = PathBuf::from("/tmp/dods-cache/42/dodsabc123");
        e.etag = Some("\"xyz\"".to_string());
        e.lm = 1000;
        e.expires = 2000;
        e.size = 512;
        e.hits = 3;
        e.freshness_lifetime = 3600;
        e.response_time = 500;
        e.corrected_initial_age = 10;
        e.must_revalidate = true;
        e
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".index");
        let entry = sample_entry();
        write(&path, std::iter::once(&entry)).unwrap();

        let read_back = read(&path).unwrap();
        assert_eq!(read_back.len(), 1);
        let r = &read_back[0];
        assert_eq!(r.url, entry.url);
        assert_eq!(r.cachename, entry.cachename);
        assert_eq!(r.etag, entry.etag);
        assert_eq!(r.lm, entry.lm);
        assert_eq!(r.expires, entry.expires);
        assert_eq!(r.size, entry.size);
        assert_eq!(r.hash, entry.hash);
        assert_eq!(r.hits, entry.hits);
        assert_eq!(r.freshness_lifetime, entry.freshness_lifetime);
        assert_eq!(r.response_time, entry.response_time);
        assert_eq!(r.corrected_initial_age, entry.corrected_initial_age);
        assert_eq!(r.must_revalidate, entry.must_revalidate);
    }

    #[test]
    fn test_empty_etag_uses_sentinel() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".index");
        let mut entry = sample_entry();
        entry.etag = Some(String::new());
        write(&path, std::iter::once(&entry)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains(CACHE_EMPTY_ETAG));

        let read_back = read(&path).unwrap();
        assert_eq!(read_back[0].etag, Some(String::new()));
    }

    #[test]
    fn test_missing_index_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".index");
        let entries = read(&path).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_lines_are_crlf_terminated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".index");
        write(&path, std::iter::once(&sample_entry())).unwrap();
        let raw = fs::read(&path).unwrap();
        assert!(raw.ends_with(b"\r\n"));
    }

    #[test]
    fn test_delete_tolerates_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".index");
        assert!(delete(&path).is_ok());
    }

    #[test]
    fn test_parse_malformed_line_errors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".index");
        fs::write(&path, "not enough fields\r\n").unwrap();
        assert!(read(&path).is_err());
    }

    #[test]
    fn test_write_multiple_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".index");
        let a = sample_entry();
        let mut b = sample_entry();
        b.url = "http://example.com/b.dods".to_string();
        write(&path, vec![&a, &b]).unwrap();
        let entries = read(&path).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
