//! Communication with running computations.
//!
//! A computation that holds a claim exposes a small loopback endpoint so
//! other callers (in this process or another) can poll its progress and
//! obtain snapshots while it is still running.

mod client;
mod endpoint;
pub mod protocol;

pub use client::{WorkerClient, WorkerSizes, WorkerSnapshot};
pub use endpoint::ContactEndpoint;
pub use protocol::{
    StatusRequest, StatusResponse, WorkerHandshake, WorkerRequest, read_message, write_message,
};
