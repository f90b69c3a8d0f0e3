//! Corpus cache directory management.
//!
//! Every process sharing a cache root must agree on where a corpus keeps its
//! map, lock markers and cached concordances.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// File name of the coordination map inside a corpus directory.
pub const MAP_FILE: &str = "concordances.map";

/// File name of the lock serializing map mutations.
pub const MAP_LOCK_FILE: &str = "map.lock";

/// Directory structure for one corpus under the cache root:
///
/// ```text
/// <root>/<corpus>/
/// ├── concordances.map   # committed entries
/// ├── map.lock           # mutation lock
/// ├── <digest>.conc      # cached concordances
/// └── run/
///     ├── <digest>.lock  # pending claims
///     ├── <digest>.log   # background worker logs
///     └── *.snap         # transient snapshots
/// ```
#[derive(Debug, Clone)]
pub struct CorpusDirs {
    /// The corpus directory itself.
    pub corpus_dir: PathBuf,

    /// Directory for lock markers and transient snapshots.
    pub run_dir: PathBuf,
}

impl CorpusDirs {
    /// Resolve (and create) the directories for `corpus` under `cache_root`.
    ///
    /// Corpus names may contain `/` to nest directories, but no empty, `.`
    /// or `..` components.
    ///
    /// # Errors
    /// Returns an error if the name is unusable or directory creation fails.
    pub fn new(cache_root: &Path, corpus: &str) -> Result<Self> {
        let relative = Self::corpus_path(corpus)?;
        let corpus_dir = cache_root.join(relative);
        let run_dir = corpus_dir.join("run");

        fs::create_dir_all(&run_dir)?;

        Ok(Self {
            corpus_dir,
            run_dir,
        })
    }

    fn corpus_path(corpus: &str) -> Result<PathBuf> {
        if corpus.is_empty() {
            return Err(Error::InvalidIdentity("empty corpus name".to_string()));
        }
        let path = PathBuf::from(corpus);
        for component in corpus.split(['/', '\\']) {
            if component.is_empty() || component == "." || component == ".." {
                return Err(Error::InvalidIdentity(format!(
                    "corpus name {:?} has an unusable path component",
                    corpus
                )));
            }
        }
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidIdentity(format!(
                "corpus name {:?} is not a relative path",
                corpus
            )));
        }
        Ok(path)
    }

    pub fn map_file(&self) -> PathBuf {
        self.corpus_dir.join(MAP_FILE)
    }

    pub fn map_lock_file(&self) -> PathBuf {
        self.corpus_dir.join(MAP_LOCK_FILE)
    }

    /// Cached concordance for a prefix digest.
    pub fn cache_file(&self, digest: &str) -> PathBuf {
        self.corpus_dir.join(format!("{}.conc", digest))
    }

    /// Lock marker for a prefix digest.
    pub fn lock_marker(&self, digest: &str) -> PathBuf {
        self.run_dir.join(format!("{}.lock", digest))
    }

    /// Fresh path for a transient snapshot of a running computation.
    pub fn snapshot_file(&self, digest: &str) -> PathBuf {
        self.run_dir
            .join(format!("{}-{}.snap", digest, uuid::Uuid::new_v4().simple()))
    }

    /// Whether `path` names a snapshot file directly inside the run directory.
    pub fn is_snapshot_file(&self, path: &Path) -> bool {
        let is_snap = path.extension().is_some_and(|e| e == "snap");
        let parent = path.parent().and_then(|p| fs::canonicalize(p).ok());
        let run_dir = fs::canonicalize(&self.run_dir).ok();
        is_snap && parent.is_some() && parent == run_dir
    }

    /// Log file of the background worker computing a prefix digest.
    pub fn worker_log(&self, digest: &str) -> PathBuf {
        self.run_dir.join(format!("{}.log", digest))
    }

    /// Remove every cached concordance, marker and the map itself.
    ///
    /// Recreates the empty structure afterwards.
    pub fn clean(&self) -> Result<()> {
        if self.corpus_dir.exists() {
            for entry in fs::read_dir(&self.corpus_dir)? {
                let path = entry?.path();
                let is_cache_state = path.is_file()
                    && (path.extension().is_some_and(|e| e == "conc")
                        || path.file_name().is_some_and(|n| n == MAP_FILE));
                if is_cache_state {
                    fs::remove_file(&path)?;
                }
            }
            if self.run_dir.exists() {
                fs::remove_dir_all(&self.run_dir)?;
            }
        }

        fs::create_dir_all(&self.run_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_structure() {
        let temp = TempDir::new().expect("Failed to create temp dir");

        let dirs = CorpusDirs::new(temp.path(), "bnc").expect("Failed to create dirs");

        assert!(dirs.corpus_dir.ends_with("bnc"));
        assert!(dirs.run_dir.exists());
        assert_eq!(dirs.map_file(), temp.path().join("bnc").join(MAP_FILE));
        assert_eq!(
            dirs.lock_marker("00ff"),
            temp.path().join("bnc").join("run").join("00ff.lock")
        );
    }

    #[test]
    fn test_snapshot_files_stay_in_run_dir() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = CorpusDirs::new(temp.path(), "bnc").expect("Failed to create dirs");

        assert!(dirs.is_snapshot_file(&dirs.snapshot_file("00ff")));
        assert!(!dirs.is_snapshot_file(&dirs.run_dir.join("00ff.lock")));
        assert!(!dirs.is_snapshot_file(&dirs.corpus_dir.join("x.snap")));
        assert!(!dirs.is_snapshot_file(&dirs.run_dir.join("..").join("x.snap")));
        assert!(!dirs.is_snapshot_file(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_nested_corpus_name() {
        let temp = TempDir::new().expect("Failed to create temp dir");

        let dirs = CorpusDirs::new(temp.path(), "preloaded/bnc2").expect("Failed to create dirs");
        assert!(dirs.corpus_dir.ends_with("preloaded/bnc2"));
    }

    #[test]
    fn test_rejects_escaping_names() {
        let temp = TempDir::new().expect("Failed to create temp dir");

        for name in ["", "..", "a/../b", "/etc", "a//b", "./a"] {
            assert!(
                matches!(CorpusDirs::new(temp.path(), name), Err(Error::InvalidIdentity(_))),
                "{:?} accepted",
                name
            );
        }
    }

    #[test]
    fn test_snapshot_files_are_unique() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = CorpusDirs::new(temp.path(), "bnc").unwrap();

        assert_ne!(dirs.snapshot_file("ab"), dirs.snapshot_file("ab"));
    }

    #[test]
    fn test_clean() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = CorpusDirs::new(temp.path(), "bnc").unwrap();

        let cached = dirs.cache_file("abc");
        let marker = dirs.lock_marker("abc");
        fs::write(&cached, "x").unwrap();
        fs::write(&marker, "x").unwrap();
        fs::write(dirs.map_file(), "x").unwrap();

        dirs.clean().expect("Failed to clean");
        assert!(!cached.exists());
        assert!(!marker.exists());
        assert!(!dirs.map_file().exists());

        // But directories should be recreated
        assert!(dirs.run_dir.exists());
    }
}
