//! Computation and result caching for concordance queries.
//!
//! This crate provides:
//! - Query model with a static opcode classification table
//! - File-backed coordination map granting at most one computation per
//!   (dataset identity, query prefix), across threads and processes
//! - Synchronous and asynchronous compute paths; background workers run as
//!   detached processes when a [`WorkerCommand`] is configured
//! - Pipeline orchestrator reusing the longest cached prefix of a query
//! - Progress polling of running computations over a loopback endpoint

mod compute;
pub mod config;
pub mod coord;
mod describe;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod paths;
mod pipeline;
pub mod query;

pub use compute::{MinSize, WorkerCommand};
pub use config::CacheConfig;
pub use coord::{CachedEntry, ClaimGuard, ClaimOutcome, ClaimState, CoordinationMap, PendingClaim, PrefixKey};
pub use describe::OperationSummary;
pub use engine::{QueryExecutor, ResultSet, Sampling};
pub use error::{EngineError, EngineResult, Error, Result};
pub use paths::CorpusDirs;
pub use pipeline::{Concordance, ConcordanceOptions, ConcordanceService, ConcordanceSizes};
pub use query::{DatasetIdentity, OPCODES, Opcode, OpcodeInfo, Operation, Query};
