//! Synchronous compute path.

use std::slice;

use crate::coord::{ClaimGuard, ClaimOutcome, PrefixKey};
use crate::engine::{QueryExecutor, Sampling};
use crate::error::{Error, Result};
use crate::ipc::ContactEndpoint;
use crate::pipeline::Concordance;
use crate::query::{DatasetIdentity, Operation};

use super::Compute;
use super::attach::MinSize;
use super::driver::{self, Claimed};

impl<E: QueryExecutor> Compute<E> {
    /// Compute `op` as the first operation of a query, inline.
    ///
    /// With `cache`, the slot is claimed first: a pending computation is
    /// attached to and a committed one is loaded. A failed computation
    /// releases its claim before the error propagates.
    pub(crate) fn compute_sync(
        &self,
        identity: &DatasetIdentity,
        op: &Operation,
        sample_size: u64,
        cache: bool,
    ) -> Result<Concordance<E::ResultSet>> {
        let sampling = self.sampling(identity, op, sample_size, cache)?;
        self.compute_sync_with(identity, op, sampling, cache)
    }

    pub(super) fn compute_sync_with(
        &self,
        identity: &DatasetIdentity,
        op: &Operation,
        sampling: Sampling,
        cache: bool,
    ) -> Result<Concordance<E::ResultSet>> {
        let heartbeat = self.map.config().heartbeat_interval;

        if !cache {
            let mut conc = self.apply_first(identity, op, sampling)?;
            driver::drive(&mut conc, op, None, None, heartbeat)?;
            return Ok(Concordance::new(conc, None));
        }

        let prefix = slice::from_ref(op);
        let attempts = self.map.config().claim_attempts.max(1);
        for attempt in 1..=attempts {
            match self.map.claim(identity, prefix)? {
                ClaimOutcome::Won(guard) => {
                    let claimed = self.start_claimed(identity, op, sampling, guard)?;
                    let conc = claimed.complete(op, heartbeat)?;
                    return Ok(Concordance::new(conc, None));
                }
                ClaimOutcome::Pending(_) | ClaimOutcome::Done(_) => {
                    if let Some(conc) = self.attach(identity, prefix, MinSize::Complete)? {
                        return Ok(conc);
                    }
                    tracing::debug!("Attempt {} for {} found the slot free again", attempt, op);
                }
            }
        }

        Err(Error::ClaimContended(PrefixKey::new(identity, prefix).to_string()))
    }

    /// Open the contact endpoint, advertise it and start the executor.
    ///
    /// On error the guard is dropped, which releases the claim.
    pub(super) fn start_claimed(
        &self,
        identity: &DatasetIdentity,
        op: &Operation,
        sampling: Sampling,
        mut guard: ClaimGuard,
    ) -> Result<Claimed<E::ResultSet>> {
        let endpoint = ContactEndpoint::bind(
            self.map.config().io_timeout,
            guard.dirs().clone(),
            guard.key().digest(),
        )?;
        if !guard.publish_contact(endpoint.addr())? {
            tracing::warn!("Claim for {} was taken over before computing", guard.key());
        }

        let conc = self.apply_first(identity, op, sampling)?;
        tracing::debug!("Computing {} for {} (contact {})", op, identity, endpoint.addr());

        Ok(Claimed {
            conc,
            endpoint,
            guard,
        })
    }
}
