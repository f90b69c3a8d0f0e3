//! Lock markers for pending claims.
//!
//! A marker's existence means "someone is computing this prefix". It is
//! created with `create_new`, so exactly one claimer wins. The file's
//! modification time is the lease: the owner rewrites it periodically, and a
//! marker not renewed within the lease TTL (or whose owner process is gone)
//! no longer blocks anyone.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::persist::unix_now;

/// Contents of a lock marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    /// Process that owns the claim.
    pub pid: u32,
    /// Random token identifying this particular claim.
    pub token: String,
    /// Unix timestamp of the claim.
    pub claimed_at: u64,
    /// Contact endpoint of the running computation, once published.
    pub contact: Option<SocketAddr>,
}

impl LockMarker {
    /// A fresh marker owned by the current process.
    pub fn new() -> Self {
        Self {
            pid: std::process::id(),
            token: uuid::Uuid::new_v4().simple().to_string(),
            claimed_at: unix_now(),
            contact: None,
        }
    }
}

impl Default for LockMarker {
    fn default() -> Self {
        Self::new()
    }
}

/// What a reader sees when it inspects a marker file.
#[derive(Debug, Clone)]
pub struct MarkerInfo {
    /// Parsed contents; `None` while the winner is still writing them.
    pub marker: Option<LockMarker>,
    /// Time since the lease was last renewed.
    pub age: Duration,
}

impl MarkerInfo {
    /// Whether the claim no longer blocks other claimers.
    pub fn is_stale(&self, lease_ttl: Duration) -> bool {
        if self.age > lease_ttl {
            return true;
        }
        match &self.marker {
            Some(marker) => !process_alive(marker.pid),
            None => false,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.marker.as_ref().map(|m| m.token.as_str())
    }
}

/// Create the marker if no marker exists.
///
/// Returns `Ok(false)` when another claim already holds the slot.
pub fn create_exclusive(path: &Path, marker: &LockMarker) -> io::Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    file.write_all(&encode(marker)?)?;
    Ok(true)
}

/// Replace the marker contents and renew its lease.
pub fn rewrite(path: &Path, marker: &LockMarker) -> io::Result<()> {
    let temp_path = path.with_extension(format!("{}.tmp", marker.token));
    fs::write(&temp_path, encode(marker)?)?;
    fs::rename(&temp_path, path)
}

/// Inspect the marker at `path`; `Ok(None)` if there is none.
pub fn read(path: &Path) -> io::Result<Option<MarkerInfo>> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let age = metadata
        .modified()
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .unwrap_or(Duration::ZERO);

    let marker = match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).ok(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    Ok(Some(MarkerInfo { marker, age }))
}

/// Remove the marker, tolerating its absence.
pub fn remove(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn encode(marker: &LockMarker) -> io::Result<Vec<u8>> {
    serde_json::to_vec(marker).map_err(io::Error::other)
}

/// Whether `pid` names a live process on this host.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // SAFETY: signal 0 performs the permission and existence check only.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc.lock");

        assert!(create_exclusive(&path, &LockMarker::new()).unwrap());
        assert!(!create_exclusive(&path, &LockMarker::new()).unwrap());
    }

    #[test]
    fn test_read_back_and_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc.lock");

        let mut marker = LockMarker::new();
        create_exclusive(&path, &marker).unwrap();

        let info = read(&path).unwrap().unwrap();
        assert_eq!(info.marker.as_ref(), Some(&marker));
        assert!(!info.is_stale(Duration::from_secs(30)));

        marker.contact = Some("127.0.0.1:4000".parse().unwrap());
        rewrite(&path, &marker).unwrap();
        let info = read(&path).unwrap().unwrap();
        assert_eq!(info.marker.unwrap().contact, marker.contact);
    }

    #[test]
    fn test_expired_lease_is_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        create_exclusive(&path, &LockMarker::new()).unwrap();

        let old = SystemTime::now() - Duration::from_secs(120);
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(old).unwrap();
        drop(file);

        let info = read(&path).unwrap().unwrap();
        assert!(info.is_stale(Duration::from_secs(30)));
        assert!(!info.is_stale(Duration::from_secs(600)));
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_owner_is_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc.lock");

        let mut marker = LockMarker::new();
        marker.pid = 0;
        create_exclusive(&path, &marker).unwrap();

        let info = read(&path).unwrap().unwrap();
        assert!(info.is_stale(Duration::from_secs(30)));
    }

    #[test]
    fn test_unparsable_marker_is_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        fs::write(&path, b"").unwrap();

        let info = read(&path).unwrap().unwrap();
        assert!(info.marker.is_none());
        assert!(!info.is_stale(Duration::from_secs(30)));
    }

    #[test]
    fn test_missing_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        assert!(read(&path).unwrap().is_none());
        remove(&path).unwrap();
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }
}
