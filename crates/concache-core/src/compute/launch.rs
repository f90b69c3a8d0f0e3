//! Background workers as detached processes.
//!
//! The caller starts the configured worker command with piped stdin and
//! stdout, writes one [`WorkerRequest`] and reads one [`WorkerHandshake`]
//! back. The worker runs in its own process group and owns the claim, so it
//! keeps computing (and commits) after the caller exits or is interrupted.
//! Its stderr goes to a log file in the corpus run directory.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

use crate::coord::PrefixKey;
use crate::engine::{QueryExecutor, Sampling};
use crate::error::{Error, Result};
use crate::ipc::{WorkerHandshake, WorkerRequest, read_message, write_message};
use crate::query::{DatasetIdentity, Operation};

use super::Compute;
use super::worker::{Handshake, HandshakeSink};

/// How to start a worker process.
///
/// The process must read a [`WorkerRequest`] from stdin and hand it to
/// [`ConcordanceService::serve_worker`](crate::ConcordanceService::serve_worker)
/// together with stdout.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Terminal signals aimed at the caller's group miss the worker.
            command.process_group(0);
        }
        command
    }
}

/// Handshake written to a worker process's stdout.
struct PipeHandshake<W: Write> {
    writer: W,
}

impl<W: Write> HandshakeSink for PipeHandshake<W> {
    fn report(&mut self, handshake: Handshake) {
        let message = match handshake {
            Handshake::Started { contact } => WorkerHandshake::Started {
                contact: contact.to_string(),
            },
            Handshake::Attached { contact } => WorkerHandshake::Attached {
                contact: contact.map(|c| c.to_string()),
            },
            Handshake::Cached { size } => WorkerHandshake::Cached { size },
            Handshake::Failed(e) => WorkerHandshake::Failed {
                message: e.to_string(),
            },
            Handshake::Declined(message) => WorkerHandshake::Failed { message },
        };
        if let Err(e) = write_message(&mut self.writer, &message) {
            tracing::warn!("Failed to send worker handshake: {}", e);
        }
    }
}

fn parse_contact(contact: &str) -> Result<SocketAddr> {
    contact
        .parse()
        .map_err(|_| Error::Handshake(format!("worker sent a bad contact {:?}", contact)))
}

impl TryFrom<WorkerHandshake> for Handshake {
    type Error = Error;

    fn try_from(message: WorkerHandshake) -> Result<Self> {
        Ok(match message {
            WorkerHandshake::Started { contact } => Handshake::Started {
                contact: parse_contact(&contact)?,
            },
            WorkerHandshake::Attached { contact } => Handshake::Attached {
                contact: contact.as_deref().map(parse_contact).transpose()?,
            },
            WorkerHandshake::Cached { size } => Handshake::Cached { size },
            WorkerHandshake::Failed { message } => Handshake::Declined(message),
        })
    }
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Collect the worker's exit status in the background so it leaves no zombie
/// behind in a long-running caller.
fn reap(mut child: Child) {
    let spawned = thread::Builder::new()
        .name("concache-reaper".to_string())
        .spawn(move || {
            let _ = child.wait();
        });
    if let Err(e) = spawned {
        tracing::debug!("Not reaping worker process: {}", e);
    }
}

impl<E: QueryExecutor> Compute<E> {
    /// Start a worker process and wait for its handshake.
    pub(super) fn launch_process(
        &self,
        command: &WorkerCommand,
        identity: &DatasetIdentity,
        op: &Operation,
        sampling: Sampling,
        key: &PrefixKey,
    ) -> Result<Handshake> {
        let dirs = self.map.dirs(identity)?;
        let log = File::create(dirs.worker_log(key.digest()))?;

        let mut child = command
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|e| {
                Error::Handshake(format!(
                    "Failed to spawn worker process '{}': {}",
                    command.program().display(),
                    e
                ))
            })?;
        tracing::debug!("Worker process {} started for {}", child.id(), key);

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            stop(child);
            return Err(Error::Handshake("worker process has no pipes".to_string()));
        };

        let request = WorkerRequest {
            corpus: identity.corpus().to_string(),
            content_hash: identity.content_hash().to_string(),
            operation: op.to_string(),
            sample_size: sampling.sample_size,
            full_size: sampling.full_size,
        };
        let mut stdin = BufWriter::new(stdin);
        if let Err(e) = write_message(&mut stdin, &request) {
            stop(child);
            return Err(Error::Handshake(format!("failed to send work to worker: {}", e)));
        }
        drop(stdin);

        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name(format!("concache-handshake-{}", key.digest()))
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                let _ = tx.send(read_message::<_, WorkerHandshake>(&mut reader));
            })
            .map_err(|e| Error::Handshake(format!("failed to read worker handshake: {}", e)))?;

        let timeout = self.map.config().handshake_timeout;
        match rx.recv_timeout(timeout) {
            Ok(Ok(message)) => {
                reap(child);
                Handshake::try_from(message)
            }
            Ok(Err(e)) => {
                stop(child);
                Err(Error::Handshake(format!(
                    "worker for {} exited before reporting: {}",
                    key, e
                )))
            }
            Err(RecvTimeoutError::Timeout) => {
                stop(child);
                Err(Error::Handshake(format!(
                    "no answer from worker for {} within {:?}",
                    key, timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                stop(child);
                Err(Error::Handshake(format!(
                    "worker for {} exited before reporting",
                    key
                )))
            }
        }
    }

    /// Worker process side: read one request, then claim and compute it.
    ///
    /// `identity` is the dataset the host process loaded; a request for any
    /// other identity is refused. Returns once the computation has ended.
    pub(crate) fn serve_worker<R: Read, W: Write>(
        &self,
        identity: &DatasetIdentity,
        mut input: R,
        output: W,
    ) -> Result<()> {
        let request: WorkerRequest = read_message(&mut input)?;
        let mut handshake = PipeHandshake { writer: output };

        let requested = DatasetIdentity::new(request.corpus, request.content_hash);
        if &requested != identity {
            let error = Error::InvalidIdentity(format!(
                "worker loaded {} but was asked for {}",
                identity, requested
            ));
            tracing::warn!("{}", error);
            handshake.report(Handshake::Failed(error));
            return Ok(());
        }

        let op = match Operation::parse(&request.operation) {
            Ok(op) => op,
            Err(e) => {
                handshake.report(Handshake::Failed(e));
                return Ok(());
            }
        };
        let sampling = Sampling {
            sample_size: request.sample_size,
            full_size: request.full_size,
        };

        tracing::info!("Worker {} computing {} for {}", std::process::id(), op, identity);
        self.run_worker(identity, &op, sampling, handshake);
        Ok(())
    }
}
