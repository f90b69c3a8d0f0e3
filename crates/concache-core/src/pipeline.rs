//! The pipeline orchestrator: the caller-facing entry point.
//!
//! A query is split into the longest prefix already cached (or being
//! computed) and the operations still to apply. The first operation goes
//! through the synchronous or asynchronous compute path; each later one is
//! applied in place and, while the query is still cacheable, committed as a
//! prefix of its own so other queries sharing it can start from there.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::compute::{Compute, MinSize, WorkerCommand};
use crate::config::CacheConfig;
use crate::coord::{ClaimOutcome, ClaimState, CoordinationMap};
use crate::engine::{QueryExecutor, ResultSet};
use crate::error::{Error, Result};
use crate::ipc::WorkerClient;
use crate::query::{DatasetIdentity, Operation, Query};

/// Per-request options of [`ConcordanceService::get_concordance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcordanceOptions {
    /// Compute a single-operation query in the background.
    pub asynchronous: bool,
    /// Read from and write to the cache. Without it, nothing is claimed.
    pub cache: bool,
    /// Hits needed before returning; `None` picks [`default_min_size`](Self::default_min_size).
    pub min_size: Option<MinSize>,
    /// Sample-size hint for the first operation (0 for none).
    pub sample_size: u64,
    /// First page the caller is going to show (1-based).
    pub from_page: u64,
    /// Lines per page.
    pub page_size: u64,
}

impl Default for ConcordanceOptions {
    fn default() -> Self {
        Self {
            asynchronous: false,
            cache: true,
            min_size: None,
            sample_size: 0,
            from_page: 1,
            page_size: 20,
        }
    }
}

impl ConcordanceOptions {
    /// Whether the asynchronous path may actually be used.
    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous && self.cache
    }

    /// Minimum size when the caller did not set one.
    ///
    /// Later operations need the whole result, and so does anyone waiting
    /// synchronously; otherwise enough for the requested page suffices.
    pub fn default_min_size(&self, query_len: usize) -> MinSize {
        if query_len > 1 || !self.is_asynchronous() {
            MinSize::Complete
        } else {
            MinSize::AtLeast(self.from_page.max(1).saturating_mul(self.page_size))
        }
    }
}

/// A result set returned to the caller.
#[derive(Debug)]
pub struct Concordance<R> {
    result: R,
    contact: Option<SocketAddr>,
}

impl<R: ResultSet> Concordance<R> {
    pub(crate) fn new(result: R, contact: Option<SocketAddr>) -> Self {
        Self { result, contact }
    }

    pub fn result(&self) -> &R {
        &self.result
    }

    pub fn into_result(self) -> R {
        self.result
    }

    /// Endpoint of the computation still growing this result, if any.
    ///
    /// Pass it to [`ConcordanceService::concordance_sizes`] to follow progress.
    pub fn contact(&self) -> Option<SocketAddr> {
        self.contact
    }

    pub fn size(&self) -> u64 {
        self.result.size()
    }

    pub fn full_size(&self) -> u64 {
        self.result.full_size()
    }

    pub fn finished(&self) -> bool {
        self.result.finished()
    }

    pub fn sizes(&self) -> ConcordanceSizes {
        ConcordanceSizes::new(self.finished(), self.size(), self.full_size())
    }

    fn apply(&mut self, op: &Operation) -> Result<()> {
        self.result.apply(op).map_err(|e| Error::computation(op, e))?;
        // The result no longer matches what the worker is computing.
        self.contact = None;
        Ok(())
    }
}

/// Progress figures of a concordance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConcordanceSizes {
    pub finished: bool,
    pub size: u64,
    pub full_size: u64,
    /// Hits per million searched positions, when the search size is known.
    pub relative_size: Option<f64>,
}

impl ConcordanceSizes {
    pub fn new(finished: bool, size: u64, full_size: u64) -> Self {
        Self {
            finished,
            size,
            full_size,
            relative_size: None,
        }
    }

    /// What a failed query reports: finished, with nothing in it.
    pub fn failed() -> Self {
        Self::new(true, 0, 0)
    }

    /// Fill in the relative size against `search_size` positions.
    pub fn with_search_size(mut self, search_size: Option<u64>) -> Self {
        self.relative_size = search_size
            .filter(|&n| n > 0)
            .map(|n| 1_000_000.0 * self.full_size as f64 / n as f64);
        self
    }
}

/// Caching concordance service over a [`QueryExecutor`].
///
/// Cheap to clone; clones share the executor and the cache.
pub struct ConcordanceService<E: QueryExecutor> {
    compute: Compute<E>,
}

impl<E: QueryExecutor> Clone for ConcordanceService<E> {
    fn clone(&self) -> Self {
        Self {
            compute: self.compute.clone(),
        }
    }
}

impl<E: QueryExecutor> ConcordanceService<E> {
    pub fn new(executor: E, config: CacheConfig) -> Self {
        Self::with_shared(Arc::new(executor), config)
    }

    pub fn with_shared(executor: Arc<E>, config: CacheConfig) -> Self {
        Self {
            compute: Compute::new(executor, CoordinationMap::new(config)),
        }
    }

    /// Run background workers as processes started by `command`, so they
    /// outlive the caller. Without it they are threads of this process.
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.compute.set_launcher(command);
        self
    }

    /// Body of a worker process: read one request from `input`, report the
    /// handshake on `output`, then compute and commit.
    ///
    /// `identity` is the dataset this process loaded. Blocks until the
    /// computation has ended.
    pub fn serve_worker<R: Read, W: Write>(
        &self,
        identity: &DatasetIdentity,
        input: R,
        output: W,
    ) -> Result<()> {
        self.compute.serve_worker(identity, input, output)
    }

    pub fn executor(&self) -> &E {
        self.compute.executor()
    }

    pub fn map(&self) -> &CoordinationMap {
        self.compute.map()
    }

    pub fn config(&self) -> &CacheConfig {
        self.compute.map().config()
    }

    /// Compute (or fetch) the concordance of `query` on `identity`.
    ///
    /// # Errors
    /// [`Error::Computation`] when the executor fails on an operation;
    /// the claim of the failing prefix is released first.
    pub fn get_concordance(
        &self,
        identity: &DatasetIdentity,
        query: &Query,
        options: &ConcordanceOptions,
    ) -> Result<Concordance<E::ResultSet>> {
        let min_size = options
            .min_size
            .unwrap_or_else(|| options.default_min_size(query.len()));
        let cacheable_len = if options.cache { query.cacheable_len() } else { 0 };

        let (mut conc, done) = match self.resume(identity, query, cacheable_len)? {
            Some(resumed) => resumed,
            None => (self.compute_first(identity, query, options, min_size, cacheable_len > 0)?, 1),
        };

        let mut cacheable = done <= cacheable_len;
        for (i, op) in query.iter().enumerate().skip(done) {
            conc.apply(op)?;
            cacheable &= !op.is_volatile();
            if cacheable {
                self.store_prefix(identity, query.prefix(i + 1), conc.result());
            }
        }

        Ok(conc)
    }

    /// Pick up the longest committed or in-progress prefix.
    ///
    /// A first operation still being computed is left to the compute paths,
    /// which attach to it with the caller's minimum size.
    fn resume(
        &self,
        identity: &DatasetIdentity,
        query: &Query,
        cacheable_len: usize,
    ) -> Result<Option<(Concordance<E::ResultSet>, usize)>> {
        let attempts = self.config().claim_attempts.max(1);
        for _ in 0..attempts {
            let Some((len, state)) = self.map().longest_prefix(identity, query.prefix(cacheable_len))?
            else {
                return Ok(None);
            };
            let prefix = query.prefix(len);
            let conc = match state {
                ClaimState::Done(entry) => self
                    .compute
                    .load_cached(identity, prefix, &entry)?
                    .map(|conc| Concordance::new(conc, None)),
                _ if len < 2 => return Ok(None),
                _ => self.compute.attach(identity, prefix, MinSize::Complete)?,
            };
            if let Some(conc) = conc {
                tracing::debug!("Reusing {} cached operations of {} for {}", len, query.len(), identity);
                return Ok(Some((conc, len)));
            }
        }
        Ok(None)
    }

    fn compute_first(
        &self,
        identity: &DatasetIdentity,
        query: &Query,
        options: &ConcordanceOptions,
        min_size: MinSize,
        cache: bool,
    ) -> Result<Concordance<E::ResultSet>> {
        let op = &query[0];
        if cache && options.is_asynchronous() && query.len() == 1 {
            self.compute
                .compute_async(identity, op, options.sample_size, min_size)
        } else {
            self.compute
                .compute_sync(identity, op, options.sample_size, cache)
        }
    }

    /// Commit `conc` as the result of `prefix`, unless someone already has.
    ///
    /// Failures only cost the cache entry and are logged.
    fn store_prefix(&self, identity: &DatasetIdentity, prefix: &[Operation], conc: &E::ResultSet) {
        let guard = match self.map().claim(identity, prefix) {
            Ok(ClaimOutcome::Won(guard)) => guard,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!("Not caching prefix of {} operations: {}", prefix.len(), e);
                return;
            }
        };

        let staging = guard.staging_file();
        let key = guard.key().clone();
        let stored = conc
            .save(&staging)
            .map_err(|e| Error::Coordination(format!("failed to save {}: {}", staging.display(), e)))
            .and_then(|()| guard.commit(conc.size(), conc.full_size()));
        if let Err(e) = stored {
            tracing::warn!("Not caching {}: {}", key, e);
        }
    }

    /// Progress of `query` without starting any computation.
    ///
    /// `contact` is the endpoint returned with an asynchronous result; when
    /// it still answers, its figures are the freshest. Returns `Ok(None)`
    /// when the query is neither cached nor being computed.
    pub fn concordance_sizes(
        &self,
        identity: &DatasetIdentity,
        query: &Query,
        contact: Option<SocketAddr>,
    ) -> Result<Option<ConcordanceSizes>> {
        let io_timeout = self.config().io_timeout;
        let search_size = self.executor().search_size(identity);

        if let Some(addr) = contact {
            match WorkerClient::new(addr, io_timeout).sizes() {
                Ok(s) => {
                    return Ok(Some(
                        ConcordanceSizes::new(s.finished, s.size, s.full_size)
                            .with_search_size(search_size),
                    ));
                }
                Err(e) => tracing::debug!("Contact {} gone, using the cache: {}", addr, e),
            }
        }

        // Two rounds: a worker may commit between the lookup and the poll.
        for _ in 0..2 {
            let sizes = match self.map().lookup(identity, query)? {
                ClaimState::Missing => return Ok(None),
                ClaimState::Done(entry) => ConcordanceSizes::new(true, entry.size, entry.full_size),
                ClaimState::Pending(pending) => match pending.contact {
                    None => ConcordanceSizes::new(false, 0, 0),
                    Some(addr) => match WorkerClient::new(addr, io_timeout).sizes() {
                        Ok(s) => ConcordanceSizes::new(s.finished, s.size, s.full_size),
                        Err(_) => continue,
                    },
                },
            };
            return Ok(Some(sizes.with_search_size(search_size)));
        }
        Ok(Some(ConcordanceSizes::new(false, 0, 0).with_search_size(search_size)))
    }

    /// Drop every cached concordance of the identity's corpus.
    pub fn clear(&self, identity: &DatasetIdentity) -> Result<()> {
        self.map().clear(identity)
    }
}
