//! Attaching to a computation someone else owns.

use std::fs;
use std::path::Path;
use std::thread;

use crate::coord::{CachedEntry, ClaimState, PendingClaim, PrefixKey};
use crate::engine::QueryExecutor;
use crate::error::{Error, Result};
use crate::ipc::WorkerClient;
use crate::paths::CorpusDirs;
use crate::pipeline::Concordance;
use crate::query::{DatasetIdentity, Operation};

use super::Compute;

/// How much of a result the caller needs before it can proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinSize {
    /// The finished result.
    Complete,
    /// At least this many hits (or the finished result, if smaller).
    AtLeast(u64),
}

impl MinSize {
    pub fn is_satisfied(self, size: u64, finished: bool) -> bool {
        match self {
            Self::Complete => finished,
            Self::AtLeast(min) => finished || size >= min,
        }
    }
}

impl<E: QueryExecutor> Compute<E> {
    /// Obtain the result of a slot that is committed or being computed.
    ///
    /// Polls a running computation until `min_size` is reached, then loads
    /// a snapshot of it. Returns `Ok(None)` once the slot is free again
    /// (its owner failed, or its cache file was unreadable): the caller
    /// should compete for it.
    pub(crate) fn attach(
        &self,
        identity: &DatasetIdentity,
        prefix: &[Operation],
        min_size: MinSize,
    ) -> Result<Option<Concordance<E::ResultSet>>> {
        let config = self.map.config();
        let dirs = self.map.dirs(identity)?;
        let key = PrefixKey::new(identity, prefix);

        loop {
            match self.map.lookup(identity, prefix)? {
                ClaimState::Missing => {
                    tracing::debug!("Slot {} is free again", key);
                    return Ok(None);
                }
                ClaimState::Done(entry) => {
                    return Ok(self
                        .load_cached(identity, prefix, &entry)?
                        .map(|conc| Concordance::new(conc, None)));
                }
                ClaimState::Pending(PendingClaim {
                    contact: Some(addr),
                    ..
                }) => {
                    let client = WorkerClient::new(addr, config.io_timeout);
                    match self.poll(&client, &dirs, &key, identity, min_size) {
                        Ok(Some(conc)) => return Ok(Some(Concordance::new(conc, Some(addr)))),
                        Ok(None) => {}
                        // Gone between lookup and poll; the map tells what happened.
                        Err(Error::Ipc(e)) => tracing::debug!("Worker for {} unreachable: {}", key, e),
                        Err(e) => return Err(e),
                    }
                }
                ClaimState::Pending(PendingClaim { contact: None, .. }) => {}
            }
            thread::sleep(config.poll_interval);
        }
    }

    /// Load a committed entry, dropping it if the engine cannot read it.
    pub(crate) fn load_cached(
        &self,
        identity: &DatasetIdentity,
        prefix: &[Operation],
        entry: &CachedEntry,
    ) -> Result<Option<E::ResultSet>> {
        match self.executor.load(identity, &entry.cache_file) {
            Ok(conc) => {
                tracing::debug!("Loaded cached concordance {}", entry.cache_file.display());
                Ok(Some(conc))
            }
            Err(e) => {
                tracing::warn!(
                    "Dropping unreadable cache file {}: {}",
                    entry.cache_file.display(),
                    e
                );
                self.map.invalidate(identity, prefix)?;
                Ok(None)
            }
        }
    }

    fn poll(
        &self,
        client: &WorkerClient,
        dirs: &CorpusDirs,
        key: &PrefixKey,
        identity: &DatasetIdentity,
        min_size: MinSize,
    ) -> Result<Option<E::ResultSet>> {
        let sizes = client.sizes()?;
        if !min_size.is_satisfied(sizes.size, sizes.finished) {
            return Ok(None);
        }

        let snapshot = client.snapshot()?;
        if !dirs.is_snapshot_file(&snapshot.path) {
            return Err(Error::Coordination(format!(
                "worker for {} offered a snapshot outside {}: {}",
                key,
                dirs.run_dir.display(),
                snapshot.path.display()
            )));
        }

        let result = self.load_snapshot(identity, &snapshot.path);
        match fs::remove_file(&snapshot.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                tracing::warn!("Failed to remove snapshot {}: {}", snapshot.path.display(), e)
            }
            _ => {}
        }
        result.map(Some)
    }

    fn load_snapshot(&self, identity: &DatasetIdentity, path: &Path) -> Result<E::ResultSet> {
        self.executor
            .load(identity, path)
            .map_err(|source| Error::CacheLoad {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_size() {
        assert!(!MinSize::Complete.is_satisfied(1000, false));
        assert!(MinSize::Complete.is_satisfied(0, true));
        assert!(MinSize::AtLeast(20).is_satisfied(20, false));
        assert!(!MinSize::AtLeast(20).is_satisfied(19, false));
        assert!(MinSize::AtLeast(20).is_satisfied(3, true));
    }
}
