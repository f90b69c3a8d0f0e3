//! The coordination map.
//!
//! Serializes concurrent claims for a (dataset identity, query prefix) slot
//! into a single winner, across threads and OS processes alike. All
//! mutations run under an exclusive `fs2` lock on the corpus's `map.lock`;
//! reads are lock-free because every file they touch is replaced atomically.

use std::fs::{self, File, OpenOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use fs2::FileExt;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::paths::CorpusDirs;
use crate::query::{DatasetIdentity, Operation};

use super::key::PrefixKey;
use super::marker::{self, LockMarker, MarkerInfo};
use super::persist::{MapEntry, MapPersistence, MapSnapshot};

/// A computation someone else is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingClaim {
    /// Owner process, if the marker could be read.
    pub pid: Option<u32>,
    /// Where to poll the computation; `None` until the owner publishes it.
    pub contact: Option<SocketAddr>,
    /// Time since the owner last renewed its lease.
    pub lease_age: Duration,
}

impl From<MarkerInfo> for PendingClaim {
    fn from(info: MarkerInfo) -> Self {
        Self {
            pid: info.marker.as_ref().map(|m| m.pid),
            contact: info.marker.and_then(|m| m.contact),
            lease_age: info.age,
        }
    }
}

/// A committed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub size: u64,
    pub full_size: u64,
    pub cache_file: PathBuf,
    pub committed_at: u64,
}

impl CachedEntry {
    fn from_entry(dirs: &CorpusDirs, entry: &MapEntry) -> Self {
        Self {
            size: entry.size,
            full_size: entry.full_size,
            cache_file: dirs.corpus_dir.join(&entry.cache_file),
            committed_at: entry.committed_at,
        }
    }
}

/// State of a slot as seen by a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimState {
    /// Nothing cached and nobody computing.
    Missing,
    /// A live computation holds the slot.
    Pending(PendingClaim),
    /// Computed and persisted.
    Done(CachedEntry),
}

impl ClaimState {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// Result of a claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The caller holds the slot and must compute.
    Won(ClaimGuard),
    /// Another computation holds the slot; attach to it.
    Pending(PendingClaim),
    /// Already computed; read it.
    Done(CachedEntry),
}

/// File-backed registry of claimed and committed prefixes.
#[derive(Debug, Clone)]
pub struct CoordinationMap {
    config: CacheConfig,
}

impl CoordinationMap {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Directories of the identity's corpus, created on demand.
    pub fn dirs(&self, identity: &DatasetIdentity) -> Result<CorpusDirs> {
        CorpusDirs::new(&self.config.cache_root, identity.corpus())
    }

    /// Try to become the single computation for `ops` on `identity`.
    ///
    /// Stale claims (expired lease, dead owner) are removed and competed for
    /// again; a committed entry whose cache file vanished is dropped.
    pub fn claim(&self, identity: &DatasetIdentity, ops: &[Operation]) -> Result<ClaimOutcome> {
        let dirs = self.dirs(identity)?;
        let key = PrefixKey::new(identity, ops);
        let _lock = MapLock::acquire(&dirs)?;

        let mut snapshot = MapPersistence::load(&dirs.map_file())?;
        if let Some(entry) = snapshot.find(&key) {
            let cached = CachedEntry::from_entry(&dirs, entry);
            if cached.cache_file.exists() {
                tracing::debug!("Claim for {} hit committed entry", key);
                return Ok(ClaimOutcome::Done(cached));
            }
            tracing::warn!("Dropping map entry for {}: cache file missing", key);
            snapshot.remove(key.digest());
            MapPersistence::save(&dirs.map_file(), &snapshot)?;
        }

        let marker_path = dirs.lock_marker(key.digest());
        let marker = LockMarker::new();

        // Creation only races with other holders of the map lock, so a
        // second round is only ever needed after removing a stale marker.
        for _ in 0..2 {
            if marker::create_exclusive(&marker_path, &marker)? {
                tracing::debug!("Claimed {} (token {})", key, marker.token);
                return Ok(ClaimOutcome::Won(ClaimGuard::new(dirs, key, marker)));
            }

            match marker::read(&marker_path)? {
                None => continue,
                Some(info) if info.is_stale(self.config.lease_ttl) => {
                    tracing::warn!(
                        "Removing stale claim for {} (lease age {:?}, owner {:?})",
                        key,
                        info.age,
                        info.marker.as_ref().map(|m| m.pid)
                    );
                    marker::remove(&marker_path)?;
                }
                Some(info) => {
                    tracing::debug!("Claim for {} is pending elsewhere", key);
                    return Ok(ClaimOutcome::Pending(info.into()));
                }
            }
        }

        Err(Error::ClaimContended(key.to_string()))
    }

    /// Non-blocking read of a slot's state; never triggers computation.
    pub fn lookup(&self, identity: &DatasetIdentity, ops: &[Operation]) -> Result<ClaimState> {
        let dirs = self.dirs(identity)?;
        let key = PrefixKey::new(identity, ops);

        // Marker before map: commit writes the map before removing the marker.
        let marker = marker::read(&dirs.lock_marker(key.digest()))?;
        let snapshot = MapPersistence::load(&dirs.map_file())?;

        Ok(self.state_of(&dirs, &snapshot, &key, marker))
    }

    /// Longest non-empty prefix of `ops` that is committed or being computed.
    pub fn longest_prefix(
        &self,
        identity: &DatasetIdentity,
        ops: &[Operation],
    ) -> Result<Option<(usize, ClaimState)>> {
        if ops.is_empty() {
            return Ok(None);
        }
        let dirs = self.dirs(identity)?;

        let keys: Vec<PrefixKey> = (1..=ops.len())
            .map(|len| PrefixKey::new(identity, &ops[..len]))
            .collect();
        let markers = keys
            .iter()
            .map(|key| marker::read(&dirs.lock_marker(key.digest())))
            .collect::<std::io::Result<Vec<_>>>()?;
        let snapshot = MapPersistence::load(&dirs.map_file())?;

        for (key, marker) in keys.iter().zip(markers).rev() {
            let state = self.state_of(&dirs, &snapshot, key, marker);
            if !state.is_missing() {
                return Ok(Some((key.len(), state)));
            }
        }
        Ok(None)
    }

    /// Drop a committed entry and its cache file (e.g. it failed to load).
    ///
    /// A live claim on the slot is left alone.
    pub fn invalidate(&self, identity: &DatasetIdentity, ops: &[Operation]) -> Result<()> {
        let dirs = self.dirs(identity)?;
        let key = PrefixKey::new(identity, ops);
        let _lock = MapLock::acquire(&dirs)?;

        let mut snapshot = MapPersistence::load(&dirs.map_file())?;
        if let Some(entry) = snapshot.remove(key.digest()) {
            remove_if_present(&dirs.corpus_dir.join(&entry.cache_file))?;
            MapPersistence::save(&dirs.map_file(), &snapshot)?;
            tracing::info!("Invalidated cache entry for {}", key);
        }
        Ok(())
    }

    /// Remove every committed entry and claim marker of the corpus.
    pub fn clear(&self, identity: &DatasetIdentity) -> Result<()> {
        let dirs = self.dirs(identity)?;
        let _lock = MapLock::acquire(&dirs)?;
        dirs.clean()?;
        tracing::info!("Cleared cache of corpus {}", identity.corpus());
        Ok(())
    }

    fn state_of(
        &self,
        dirs: &CorpusDirs,
        snapshot: &MapSnapshot,
        key: &PrefixKey,
        marker: Option<MarkerInfo>,
    ) -> ClaimState {
        if let Some(entry) = snapshot.find(key) {
            let cached = CachedEntry::from_entry(dirs, entry);
            if cached.cache_file.exists() {
                return ClaimState::Done(cached);
            }
        }
        match marker {
            Some(info) if !info.is_stale(self.config.lease_ttl) => ClaimState::Pending(info.into()),
            _ => ClaimState::Missing,
        }
    }
}

/// Exclusive right to compute one slot.
///
/// Dropping the guard without [`commit`](Self::commit) releases the claim,
/// so failures and panics never leave a pending marker behind.
#[derive(Debug)]
pub struct ClaimGuard {
    dirs: CorpusDirs,
    key: PrefixKey,
    marker: LockMarker,
    settled: bool,
}

impl ClaimGuard {
    fn new(dirs: CorpusDirs, key: PrefixKey, marker: LockMarker) -> Self {
        Self {
            dirs,
            key,
            marker,
            settled: false,
        }
    }

    pub fn key(&self) -> &PrefixKey {
        &self.key
    }

    pub fn dirs(&self) -> &CorpusDirs {
        &self.dirs
    }

    /// Where the committed concordance will live.
    pub fn cache_file(&self) -> PathBuf {
        self.dirs.cache_file(self.key.digest())
    }

    /// Where the result must be saved before [`commit`](Self::commit).
    pub fn staging_file(&self) -> PathBuf {
        self.cache_file()
            .with_extension(format!("{}.part", self.marker.token))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dirs.lock_marker(self.key.digest())
    }

    /// Advertise the computation's contact endpoint to attaching readers.
    ///
    /// Returns `Ok(false)` if the claim was lost to a stale-claim takeover.
    pub fn publish_contact(&mut self, contact: SocketAddr) -> Result<bool> {
        self.marker.contact = Some(contact);
        self.renew()
    }

    /// Renew the lease.
    ///
    /// Returns `Ok(false)` if the claim was lost to a stale-claim takeover.
    pub fn heartbeat(&mut self) -> Result<bool> {
        self.renew()
    }

    /// Whether the marker on disk is still this claim's.
    pub fn is_owned(&self) -> Result<bool> {
        let info = marker::read(&self.lock_path())?;
        Ok(info.as_ref().and_then(MarkerInfo::token) == Some(self.marker.token.as_str()))
    }

    fn renew(&mut self) -> Result<bool> {
        let _lock = MapLock::acquire(&self.dirs)?;
        if !self.is_owned()? {
            tracing::warn!("Lost claim for {}", self.key);
            return Ok(false);
        }
        marker::rewrite(&self.lock_path(), &self.marker)?;
        Ok(true)
    }

    /// Publish the staged result as the slot's final state.
    ///
    /// Moves [`staging_file`](Self::staging_file) into place, records the
    /// entry in the map and removes the marker. Returns `Ok(false)` (and
    /// discards the staged file) if the claim was lost meanwhile.
    pub fn commit(mut self, size: u64, full_size: u64) -> Result<bool> {
        let _lock = MapLock::acquire(&self.dirs)?;

        if !self.is_owned()? {
            tracing::warn!("Not committing {}: claim was taken over", self.key);
            remove_if_present(&self.staging_file())?;
            self.settled = true;
            return Ok(false);
        }

        let cache_file = self.cache_file();
        fs::rename(self.staging_file(), &cache_file)?;

        let file_name = cache_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut snapshot = MapPersistence::load(&self.dirs.map_file())?;
        snapshot.upsert(MapEntry::new(&self.key, size, full_size, file_name));
        MapPersistence::save(&self.dirs.map_file(), &snapshot)?;

        marker::remove(&self.lock_path())?;
        self.settled = true;

        tracing::info!("Committed {} (size {}, full size {})", self.key, size, full_size);
        Ok(true)
    }

    /// Give the slot up without a result.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.settled {
            return Ok(());
        }
        self.settled = true;

        let _lock = MapLock::acquire(&self.dirs)?;
        remove_if_present(&self.staging_file())?;
        if !self.is_owned()? {
            tracing::debug!("Release of {}: claim already taken over", self.key);
            return Ok(());
        }
        marker::remove(&self.lock_path())?;
        tracing::debug!("Released claim for {}", self.key);
        Ok(())
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!("Failed to release claim for {}: {}", self.key, e);
        }
    }
}

/// Held for the duration of a map mutation.
struct MapLock {
    _file: File,
}

impl MapLock {
    fn acquire(dirs: &CorpusDirs) -> Result<Self> {
        let path = dirs.map_lock_file();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive().map_err(|e| {
            Error::Coordination(format!("failed to lock {}: {}", path.display(), e))
        })?;
        Ok(Self { _file: file })
    }
}

fn remove_if_present(path: &std::path::Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
