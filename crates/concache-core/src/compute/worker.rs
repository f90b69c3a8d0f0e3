//! Asynchronous compute path.
//!
//! The worker claims the slot, reports back once and then computes on its
//! own. The caller only waits for that handshake and for as much of the
//! result as it asked for; the worker keeps going (and commits) even if the
//! caller is gone.

use std::net::SocketAddr;
use std::slice;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread;

use crate::coord::{ClaimOutcome, PrefixKey};
use crate::engine::{QueryExecutor, ResultSet, Sampling};
use crate::error::{Error, Result};
use crate::pipeline::Concordance;
use crate::query::{DatasetIdentity, Operation};

use super::Compute;
use super::attach::MinSize;

/// First and only message from a worker to its caller.
#[derive(Debug)]
pub(super) enum Handshake {
    /// The worker won the claim and is computing.
    Started { contact: SocketAddr },
    /// Someone else is computing; the worker exited.
    Attached { contact: Option<SocketAddr> },
    /// Already committed; the worker exited.
    Cached { size: u64 },
    /// The worker could not start; nothing is claimed.
    Failed(Error),
    /// A worker process could not start; the reason only survives as text.
    Declined(String),
}

/// Where a worker sends its handshake.
pub(super) trait HandshakeSink {
    fn report(&mut self, handshake: Handshake);
}

impl HandshakeSink for SyncSender<Handshake> {
    fn report(&mut self, handshake: Handshake) {
        // The caller may have timed out and gone.
        let _ = self.send(handshake);
    }
}

impl<E: QueryExecutor> Compute<E> {
    /// Compute `op` in a background worker.
    ///
    /// Returns once the worker has reported back and the result holds at
    /// least `min_size` hits. If the worker fails after the handshake, the
    /// slot is computed synchronously, which surfaces the real error.
    pub(crate) fn compute_async(
        &self,
        identity: &DatasetIdentity,
        op: &Operation,
        sample_size: u64,
        min_size: MinSize,
    ) -> Result<Concordance<E::ResultSet>> {
        let sampling = self.sampling(identity, op, sample_size, true)?;
        let prefix = slice::from_ref(op);
        let key = PrefixKey::new(identity, prefix);

        let handshake = match self.launcher.as_deref() {
            Some(command) => self.launch_process(command, identity, op, sampling, &key)?,
            None => self.launch_thread(identity, op, sampling, &key)?,
        };

        match handshake {
            Handshake::Started { contact } => {
                tracing::info!("Started background computation of {} (contact {})", key, contact)
            }
            Handshake::Attached { contact } => {
                tracing::debug!("{} is already being computed (contact {:?})", key, contact)
            }
            Handshake::Cached { size } => tracing::debug!("{} is cached with size {}", key, size),
            Handshake::Failed(e) => return Err(e),
            Handshake::Declined(reason) => {
                tracing::warn!("Worker for {} did not start ({}); computing inline", key, reason);
                return self.compute_sync_with(identity, op, sampling, true);
            }
        }

        match self.attach(identity, prefix, min_size)? {
            Some(conc) => Ok(conc),
            None => {
                tracing::warn!("Worker for {} ended without a result; computing inline", key);
                self.compute_sync_with(identity, op, sampling, true)
            }
        }
    }

    /// Start a worker thread and wait for its handshake.
    fn launch_thread(
        &self,
        identity: &DatasetIdentity,
        op: &Operation,
        sampling: Sampling,
        key: &PrefixKey,
    ) -> Result<Handshake> {
        let (tx, rx) = mpsc::sync_channel(1);
        let worker = self.clone();
        let worker_identity = identity.clone();
        let worker_op = op.clone();
        thread::Builder::new()
            .name(format!("concache-worker-{}", key.digest()))
            .spawn(move || worker.run_worker(&worker_identity, &worker_op, sampling, tx))
            .map_err(|e| Error::Handshake(format!("failed to spawn worker: {}", e)))?;

        let timeout = self.map.config().handshake_timeout;
        match rx.recv_timeout(timeout) {
            Ok(handshake) => Ok(handshake),
            Err(RecvTimeoutError::Timeout) => Err(Error::Handshake(format!(
                "no answer from worker for {} within {:?}",
                key, timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Handshake(format!(
                "worker for {} exited before reporting",
                key
            ))),
        }
    }

    /// Claim, report, compute and commit `op`.
    ///
    /// Runs until the computation ends; the handshake is sent as soon as the
    /// outcome of the claim is known.
    pub(super) fn run_worker(
        &self,
        identity: &DatasetIdentity,
        op: &Operation,
        sampling: Sampling,
        mut handshake: impl HandshakeSink,
    ) {
        let prefix = slice::from_ref(op);
        let guard = match self.map.claim(identity, prefix) {
            Ok(ClaimOutcome::Won(guard)) => guard,
            Ok(ClaimOutcome::Pending(pending)) => {
                handshake.report(Handshake::Attached {
                    contact: pending.contact,
                });
                return;
            }
            Ok(ClaimOutcome::Done(entry)) => {
                handshake.report(Handshake::Cached { size: entry.size });
                return;
            }
            Err(e) => {
                handshake.report(Handshake::Failed(e));
                return;
            }
        };

        let key = guard.key().clone();
        // On failure the guard is already dropped (released) when the
        // caller hears about it.
        let claimed = match self.start_claimed(identity, op, sampling, guard) {
            Ok(claimed) => claimed,
            Err(e) => {
                handshake.report(Handshake::Failed(e));
                return;
            }
        };

        handshake.report(Handshake::Started {
            contact: claimed.endpoint.addr(),
        });
        drop(handshake);

        match claimed.complete(op, self.map.config().heartbeat_interval) {
            Ok(conc) => tracing::info!(
                "Background computation of {} finished with {} hits",
                key,
                conc.size()
            ),
            Err(e) => tracing::error!("Background computation of {} failed: {}", key, e),
        }
    }
}
