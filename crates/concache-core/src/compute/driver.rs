//! The compute loop shared by the synchronous winner and the background worker.

use std::time::{Duration, Instant};

use crate::coord::ClaimGuard;
use crate::engine::ResultSet;
use crate::error::{Error, Result};
use crate::ipc::ContactEndpoint;
use crate::query::Operation;

/// A claimed computation: its result set, endpoint and claim.
pub(super) struct Claimed<R> {
    pub conc: R,
    pub endpoint: ContactEndpoint,
    pub guard: ClaimGuard,
}

impl<R: ResultSet> Claimed<R> {
    /// Drive to completion, then persist and commit.
    ///
    /// Any error drops the guard, which releases the claim.
    pub fn complete(mut self, op: &Operation, heartbeat: Duration) -> Result<R> {
        drive(
            &mut self.conc,
            op,
            Some(&self.endpoint),
            Some(&mut self.guard),
            heartbeat,
        )?;
        persist(&self.conc, self.guard)?;
        Ok(self.conc)
    }
}

/// Advance `conc` until it is finished.
///
/// Between steps, answers pending polls on `endpoint` and renews the lease of
/// `guard` every `heartbeat`.
pub(super) fn drive<R: ResultSet>(
    conc: &mut R,
    op: &Operation,
    endpoint: Option<&ContactEndpoint>,
    mut guard: Option<&mut ClaimGuard>,
    heartbeat: Duration,
) -> Result<()> {
    let mut last_beat = Instant::now();

    while !conc.finished() {
        conc.advance().map_err(|e| Error::computation(op, e))?;

        if let Some(endpoint) = endpoint {
            endpoint.serve_pending(&*conc);
        }

        if last_beat.elapsed() >= heartbeat {
            last_beat = Instant::now();
            if let Some(guard) = guard.as_deref_mut() {
                match guard.heartbeat() {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!("Computing {} without a claim; it will not be cached", guard.key())
                    }
                    Err(e) => tracing::warn!("Lease renewal for {} failed: {}", guard.key(), e),
                }
            }
        }
    }

    // Let pollers that queued during the last step see the finished state.
    if let Some(endpoint) = endpoint {
        endpoint.serve_pending(&*conc);
    }
    Ok(())
}

/// Save the finished result to the guard's staging file and commit it.
pub(super) fn persist<R: ResultSet>(conc: &R, guard: ClaimGuard) -> Result<()> {
    let staging = guard.staging_file();
    conc.save(&staging).map_err(|e| {
        Error::Coordination(format!("failed to save {}: {}", staging.display(), e))
    })?;

    if !guard.commit(conc.size(), conc.full_size())? {
        tracing::warn!("Result was computed but not cached: claim was taken over");
    }
    Ok(())
}
