//! Client side of the contact endpoint.

use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

use super::protocol::{StatusRequest, StatusResponse, read_message, write_message};

/// Progress of a running computation as reported by its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSizes {
    pub size: u64,
    pub full_size: u64,
    pub finished: bool,
}

/// A snapshot written by a running computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    /// File chosen by the computation; the requester loads and removes it.
    pub path: PathBuf,
    pub sizes: WorkerSizes,
}

/// Handle for polling a computation through its contact endpoint.
///
/// Each call opens a fresh connection; the computation may go away between
/// calls (it finished and committed), which callers see as [`Error::Ipc`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl WorkerClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Check that the computation is alive.
    pub fn ping(&self) -> Result<()> {
        match self.request(&StatusRequest::Ping)? {
            StatusResponse::Pong => Ok(()),
            other => Err(unexpected("ping", other)),
        }
    }

    /// Current sizes and finished flag.
    pub fn sizes(&self) -> Result<WorkerSizes> {
        match self.request(&StatusRequest::Sizes)? {
            StatusResponse::Sizes {
                size,
                full_size,
                finished,
            } => Ok(WorkerSizes {
                size,
                full_size,
                finished,
            }),
            other => Err(unexpected("sizes", other)),
        }
    }

    /// Ask the computation to save its current state to a snapshot file.
    pub fn snapshot(&self) -> Result<WorkerSnapshot> {
        match self.request(&StatusRequest::Snapshot)? {
            StatusResponse::Snapshot {
                path,
                size,
                full_size,
                finished,
            } => Ok(WorkerSnapshot {
                path: PathBuf::from(path),
                sizes: WorkerSizes {
                    size,
                    full_size,
                    finished,
                },
            }),
            other => Err(unexpected("snapshot", other)),
        }
    }

    fn request(&self, request: &StatusRequest) -> Result<StatusResponse> {
        let mut stream = TcpStream::connect_timeout(&self.addr, self.timeout)
            .map_err(|e| Error::Ipc(format!("Failed to reach worker at {}: {}", self.addr, e)))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        write_message(&mut stream, request)?;
        read_message(&mut stream)
    }
}

fn unexpected(what: &str, response: StatusResponse) -> Error {
    match response {
        StatusResponse::Error { message } => Error::Ipc(format!("worker failed {}: {}", what, message)),
        other => Error::Ipc(format!("Unexpected response to {}: {:?}", what, other)),
    }
}
