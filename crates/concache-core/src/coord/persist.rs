//! Map file persistence using rkyv.
//!
//! The map file records every committed prefix of a corpus: its digest, the
//! operations and content hash it was computed for, the achieved sizes and
//! the cache file holding the concordance.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::error::{Error, Result};

use super::key::PrefixKey;

/// Current map format version.
///
/// Increment this when the format changes in an incompatible way. Maps with
/// another version are treated as empty and rewritten on the next commit.
pub const MAP_VERSION: u32 = 1;

/// Contents of one corpus map file.
#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
pub struct MapSnapshot {
    /// Map format version.
    pub version: u32,

    /// Committed prefixes.
    pub entries: Vec<MapEntry>,
}

/// One committed prefix.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    /// Digest of (content hash, operations).
    pub digest: String,

    /// Content hash of the dataset the prefix was computed against.
    pub content_hash: String,

    /// Operations in wire form.
    pub operations: Vec<String>,

    /// Final size.
    pub size: u64,

    /// Size before sampling or limits.
    pub full_size: u64,

    /// Cache file name, relative to the corpus directory.
    pub cache_file: String,

    /// Unix timestamp of the commit.
    pub committed_at: u64,
}

impl Default for MapSnapshot {
    fn default() -> Self {
        Self {
            version: MAP_VERSION,
            entries: Vec::new(),
        }
    }
}

impl MapSnapshot {
    /// Entry for `key`, if committed for exactly this prefix.
    pub fn find(&self, key: &PrefixKey) -> Option<&MapEntry> {
        self.entries.iter().find(|e| e.matches(key))
    }

    /// Insert or replace the entry with the same digest.
    pub fn upsert(&mut self, entry: MapEntry) {
        match self.entries.iter_mut().find(|e| e.digest == entry.digest) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Remove the entry with this digest.
    pub fn remove(&mut self, digest: &str) -> Option<MapEntry> {
        let idx = self.entries.iter().position(|e| e.digest == digest)?;
        Some(self.entries.swap_remove(idx))
    }
}

impl MapEntry {
    pub fn new(key: &PrefixKey, size: u64, full_size: u64, cache_file: String) -> Self {
        Self {
            digest: key.digest().to_string(),
            content_hash: key.identity().content_hash().to_string(),
            operations: key.operations().to_vec(),
            size,
            full_size,
            cache_file,
            committed_at: unix_now(),
        }
    }

    /// Same digest, and really the same prefix.
    pub fn matches(&self, key: &PrefixKey) -> bool {
        self.digest == key.digest()
            && self.content_hash == key.identity().content_hash()
            && self.operations == key.operations()
    }
}

/// Map file operations.
pub struct MapPersistence;

impl MapPersistence {
    /// Write a snapshot atomically (temp file, then rename).
    ///
    /// Callers must hold the corpus map lock.
    pub fn save(path: &Path, snapshot: &MapSnapshot) -> Result<()> {
        let bytes = rkyv::to_bytes::<rancor::Error>(snapshot)
            .map_err(|e| Error::Serialization(format!("failed to encode map: {}", e)))?;

        let temp_path = path.with_extension("map.tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        fs::rename(&temp_path, path)?;

        tracing::debug!(
            "Saved map {}: {} entries, {} bytes",
            path.display(),
            snapshot.entries.len(),
            bytes.len()
        );

        Ok(())
    }

    /// Read the map file.
    ///
    /// A missing file is an empty map. So is a file of another format
    /// version or one that fails validation; both are logged.
    pub fn load(path: &Path) -> Result<MapSnapshot> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MapSnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut bytes = AlignedVec::<16>::with_capacity(raw.len());
        bytes.extend_from_slice(&raw);

        let archived = match rkyv::access::<ArchivedMapSnapshot, rancor::Error>(&bytes) {
            Ok(archived) => archived,
            Err(e) => {
                tracing::warn!("Ignoring unreadable map {}: {}", path.display(), e);
                return Ok(MapSnapshot::default());
            }
        };

        let found_version: u32 = archived.version.into();
        if found_version != MAP_VERSION {
            tracing::warn!(
                "Ignoring map {}: format version {} (expected {})",
                path.display(),
                found_version,
                MAP_VERSION
            );
            return Ok(MapSnapshot::default());
        }

        rkyv::deserialize::<MapSnapshot, rancor::Error>(archived)
            .map_err(|e| Error::Deserialization(format!("failed to decode map: {}", e)))
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
