//! Seam to the corpus engine.
//!
//! The orchestrator never interprets operations itself. It hands them to a
//! [`QueryExecutor`], drives the resulting [`ResultSet`] to completion one
//! [`advance`](ResultSet::advance) at a time, and persists it with
//! [`save`](ResultSet::save) / [`load`](QueryExecutor::load).

use std::path::Path;

use crate::error::EngineResult;
use crate::query::{DatasetIdentity, Operation};

/// Sampling hints for the first operation of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sampling {
    /// Requested sample size (0 means no sampling).
    pub sample_size: u64,
    /// Known full size of the base concordance, for online samples.
    pub full_size: Option<u64>,
}

/// Engine entry point: creates and restores result sets.
pub trait QueryExecutor: Send + Sync + 'static {
    /// Engine-owned concordance handle.
    type ResultSet: ResultSet;

    /// Start computing the first operation of a query.
    ///
    /// The returned set may still be growing; the caller drives it with
    /// [`ResultSet::advance`].
    fn apply_first(
        &self,
        identity: &DatasetIdentity,
        op: &Operation,
        sampling: Sampling,
    ) -> EngineResult<Self::ResultSet>;

    /// Restore a result set written by [`ResultSet::save`].
    fn load(&self, identity: &DatasetIdentity, path: &Path) -> EngineResult<Self::ResultSet>;

    /// Number of positions searched, for hits-per-million figures.
    fn search_size(&self, _identity: &DatasetIdentity) -> Option<u64> {
        None
    }
}

/// A (possibly still growing) concordance.
pub trait ResultSet: Send + 'static {
    /// Current number of hits; never decreases while computing.
    fn size(&self) -> u64;

    /// Size before sampling or limits were applied.
    fn full_size(&self) -> u64;

    /// Whether computation has completed.
    fn finished(&self) -> bool;

    /// Perform one bounded step of computation.
    ///
    /// Called repeatedly until [`finished`](ResultSet::finished) holds; must
    /// be a no-op once finished.
    fn advance(&mut self) -> EngineResult<()>;

    /// Apply a subsequent operation to the finished set in place.
    fn apply(&mut self, op: &Operation) -> EngineResult<()>;

    /// Write the current state to `path`.
    fn save(&self, path: &Path) -> EngineResult<()>;
}
