//! Persistent on-disk layout: slot directories, unique body files, and
//! `.meta` header sidecar files (spec §4.5, §3.3).

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::entry::{is_hop_by_hop_header, strip_hop_by_hop};
use crate::error::{CacheError, CacheResult};

const CACHE_META: &str = ".meta";

/// Create `root/<hash>/` if it does not already exist, and return its path.
pub fn create_hash_directory(root: &Path, hash: usize) -> CacheResult<PathBuf> {
    let dir = root.join(hash.to_string());
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Create a brand-new, exclusively-owned body file inside `root/<hash>/`,
/// named `dods` followed by six random alphanumerics, mode 0600. Returns
/// its path. Mirrors `mkstemp`'s exclusivity guarantee via `create_new`.
pub fn create_body_file(root: &Path, hash: usize) -> CacheResult<PathBuf> {
    let dir = create_hash_directory(root, hash)?;

    for _ in 0..32 {
        let candidate = dir.join(format!("dods{}", random_suffix()));
        let opened = open_exclusive(&candidate);
        match opened {
            Ok(_file) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(CacheError::Internal(
        "could not allocate a unique cache body filename".to_string(),
    ))
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_exclusive(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn random_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let pid = std::process::id();
    format!("{:06x}", nanos ^ pid)
}

/// Stream `body` into the file at `cachename`, in ~1 KiB blocks (spec §4.5
/// step 6), truncating any existing content. Returns the total bytes
/// written.
pub fn write_body<R: Read>(cachename: &Path, mut body: R) -> CacheResult<u64> {
    let mut dest = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(cachename)?;
    let mut buf = [0u8; 1024];
    let mut total = 0u64;
    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dest.write_all(&buf[..n])?;
        total += n as u64;
    }
    dest.flush()?;
    Ok(total)
}

/// Read the full body at `cachename`.
pub fn read_body(cachename: &Path) -> CacheResult<Vec<u8>> {
    let mut buf = Vec::new();
    File::open(cachename)?.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Remove the body file at `cachename`, tolerating its absence.
pub fn remove_body(cachename: &Path) -> CacheResult<()> {
    match fs::remove_file(cachename) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write `headers` to `<cachename>.meta`, one per line, with hop-by-hop
/// headers filtered out (spec §4.2, §4.5).
pub fn write_metadata(cachename: &Path, headers: &[String]) -> CacheResult<()> {
    let meta_path = meta_path(cachename);
    let mut dest = File::create(&meta_path)?;
    for header in strip_hop_by_hop(headers) {
        dest.write_all(header.as_bytes())?;
        dest.write_all(b"\n")?;
    }
    Ok(())
}

/// Read the header lines from `<cachename>.meta`.
pub fn read_metadata(cachename: &Path) -> CacheResult<Vec<String>> {
    let meta_path = meta_path(cachename);
    let contents = fs::read_to_string(&meta_path)?;
    Ok(contents
        .lines()
        .filter(|l| !l.is_empty() && !is_hop_by_hop_header(l))
        .map(str::to_string)
        .collect())
}

/// Remove `<cachename>.meta`, tolerating its absence.
pub fn remove_metadata(cachename: &Path) -> CacheResult<()> {
    let meta_path = meta_path(cachename);
    match fs::remove_file(meta_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn meta_path(cachename: &Path) -> PathBuf {
    let mut name = cachename.as_os_str().to_owned();
    name.push(CACHE_META);
    PathBuf::from(name)
}
