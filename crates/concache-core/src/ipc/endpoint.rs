//! Contact endpoint exposed by a running computation.
//!
//! The computing thread owns the result set, so it serves requests itself:
//! between two computation steps it accepts whatever connections are
//! waiting, answers each one, and goes back to computing. Snapshots are only
//! ever written to fresh files in the corpus run directory.

use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use crate::engine::ResultSet;
use crate::error::{Error, Result};
use crate::paths::CorpusDirs;

use super::protocol::{StatusRequest, StatusResponse, read_message, write_message};

/// Loopback listener answering progress polls for one computation.
pub struct ContactEndpoint {
    listener: TcpListener,
    addr: SocketAddr,
    io_timeout: Duration,
    dirs: CorpusDirs,
    digest: String,
}

impl ContactEndpoint {
    /// Bind an ephemeral loopback port for the computation of `digest`.
    pub fn bind(io_timeout: Duration, dirs: CorpusDirs, digest: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(|e| Error::Ipc(format!("Failed to bind contact endpoint: {}", e)))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        tracing::debug!("Contact endpoint listening on {}", addr);

        Ok(Self {
            listener,
            addr,
            io_timeout,
            dirs,
            digest: digest.into(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Answer every connection already waiting, without blocking for new ones.
    ///
    /// Returns the number of requests served. Failures of individual
    /// connections are logged; they never affect the computation.
    pub fn serve_pending<R: ResultSet>(&self, conc: &R) -> usize {
        let mut served = 0;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.handle(stream, conc) {
                        tracing::debug!("Status request from {} failed: {}", peer, e);
                    }
                    served += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Contact endpoint {} accept failed: {}", self.addr, e);
                    break;
                }
            }
        }
        served
    }

    fn handle<R: ResultSet>(&self, mut stream: TcpStream, conc: &R) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;

        let request: StatusRequest = read_message(&mut stream)?;
        let response = self.respond(request, conc);
        write_message(&mut stream, &response)
    }

    fn respond<R: ResultSet>(&self, request: StatusRequest, conc: &R) -> StatusResponse {
        match request {
            StatusRequest::Ping => StatusResponse::Pong,
            StatusRequest::Sizes => StatusResponse::Sizes {
                size: conc.size(),
                full_size: conc.full_size(),
                finished: conc.finished(),
            },
            StatusRequest::Snapshot => {
                // Sample before saving so the report never exceeds the file.
                let size = conc.size();
                let full_size = conc.full_size();
                let finished = conc.finished();
                let path = self.dirs.snapshot_file(&self.digest);
                match conc.save(&path) {
                    Ok(()) => StatusResponse::Snapshot {
                        path: path.to_string_lossy().into_owned(),
                        size,
                        full_size,
                        finished,
                    },
                    Err(e) => {
                        let _ = fs::remove_file(&path);
                        StatusResponse::Error {
                            message: format!("snapshot failed: {}", e),
                        }
                    }
                }
            }
        }
    }
}
