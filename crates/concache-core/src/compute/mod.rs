//! Computing the first operation of a query.
//!
//! Two paths share one [`Compute`] context: [`Compute::compute_sync`] drives
//! the executor inline, [`Compute::compute_async`] hands the work to a
//! background worker and returns as soon as enough of the result exists.
//! Either way, a caller that finds the slot already claimed attaches to the
//! running computation instead of starting a second one.
//!
//! With a [`WorkerCommand`] configured, background workers are separate
//! processes and outlive their caller; otherwise they are threads of the
//! calling process.

mod attach;
mod driver;
mod launch;
mod sync;
mod worker;

use std::slice;
use std::sync::Arc;

use crate::coord::{ClaimState, CoordinationMap};
use crate::engine::{QueryExecutor, Sampling};
use crate::error::{Error, Result};
use crate::query::{DatasetIdentity, Operation};

pub use attach::MinSize;
pub use launch::WorkerCommand;

/// Executor and coordination map shared by both compute paths.
pub(crate) struct Compute<E: QueryExecutor> {
    executor: Arc<E>,
    map: CoordinationMap,
    launcher: Option<Arc<WorkerCommand>>,
}

impl<E: QueryExecutor> Clone for Compute<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            map: self.map.clone(),
            launcher: self.launcher.clone(),
        }
    }
}

impl<E: QueryExecutor> Compute<E> {
    pub(crate) fn new(executor: Arc<E>, map: CoordinationMap) -> Self {
        Self {
            executor,
            map,
            launcher: None,
        }
    }

    /// Run background workers as processes started by `command`.
    pub(crate) fn set_launcher(&mut self, command: WorkerCommand) {
        self.launcher = Some(Arc::new(command));
    }

    pub(crate) fn executor(&self) -> &E {
        &self.executor
    }

    pub(crate) fn map(&self) -> &CoordinationMap {
        &self.map
    }

    /// Sampling hints for `op`.
    ///
    /// An online sample needs the full size of the operation it samples: read
    /// from the cache when available, otherwise computed first. Without
    /// `cache` the base is neither looked up nor stored.
    fn sampling(
        &self,
        identity: &DatasetIdentity,
        op: &Operation,
        sample_size: u64,
        cache: bool,
    ) -> Result<Sampling> {
        let Some(base) = op.sample_base()? else {
            return Ok(Sampling {
                sample_size,
                full_size: None,
            });
        };

        let cache_base = cache && !base.is_volatile();
        let cached = if cache_base {
            match self.map.lookup(identity, slice::from_ref(&base))? {
                ClaimState::Done(entry) => Some(entry.full_size),
                _ => None,
            }
        } else {
            None
        };
        let full_size = match cached {
            Some(full_size) => full_size,
            None => {
                tracing::debug!("Computing {} to size the online sample {}", base, op);
                self.compute_sync(identity, &base, 0, cache_base)?.full_size()
            }
        };

        Ok(Sampling {
            sample_size,
            full_size: Some(full_size),
        })
    }

    fn apply_first(&self, identity: &DatasetIdentity, op: &Operation, sampling: Sampling) -> Result<E::ResultSet> {
        self.executor
            .apply_first(identity, op, sampling)
            .map_err(|e| Error::computation(op, e))
    }
}
