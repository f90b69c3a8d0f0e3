//! Cross-process coordination of concordance computations.
//!
//! This module provides the file-backed map that grants at most one
//! computation per (dataset identity, query prefix), records committed
//! results, and lets readers find work already done or in progress.

mod key;
mod map;
pub mod marker;
mod persist;

pub use key::PrefixKey;
pub use map::{CachedEntry, ClaimGuard, ClaimOutcome, ClaimState, CoordinationMap, PendingClaim};
pub use persist::{MAP_VERSION, MapEntry, MapPersistence, MapSnapshot};
