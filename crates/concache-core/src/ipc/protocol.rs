//! Messages spoken with computations and background workers.
//!
//! Uses length-prefixed rkyv messages. Format: 4-byte length (u32 LE) +
//! rkyv-encoded message. Status requests travel over a contact endpoint, one
//! request and one response per connection; a background worker receives
//! one [`WorkerRequest`] on stdin and answers with one [`WorkerHandshake`] on
//! stdout.

use std::io::{Read, Write};

use rkyv::api::high::{HighDeserializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::error::{Error, Result};

/// Largest message accepted from the wire.
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Request sent by a poller to a running computation.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum StatusRequest {
    /// Check that the computation is alive.
    Ping,

    /// Current sizes and finished flag.
    Sizes,

    /// Save the current state of the result set to a fresh snapshot file.
    Snapshot,
}

/// Response sent by a running computation.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum StatusResponse {
    /// Response to Ping.
    Pong,

    /// Progress report.
    Sizes {
        size: u64,
        full_size: u64,
        finished: bool,
    },

    /// The snapshot was written.
    Snapshot {
        /// Snapshot file inside the corpus run directory. The requester
        /// loads it and removes it.
        path: String,
        /// Size captured in the snapshot.
        size: u64,
        full_size: u64,
        /// Whether the snapshot holds the complete result.
        finished: bool,
    },

    /// The request could not be served.
    Error {
        /// Error message.
        message: String,
    },
}

/// Work handed to a background worker process.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub corpus: String,
    pub content_hash: String,
    /// Wire form of the operation to compute.
    pub operation: String,
    pub sample_size: u64,
    /// Full size of the sampled base, for online samples.
    pub full_size: Option<u64>,
}

/// First and only message from a background worker process.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum WorkerHandshake {
    /// The worker won the claim and is computing.
    Started { contact: String },
    /// Someone else is computing; the worker exited.
    Attached { contact: Option<String> },
    /// Already committed; the worker exited.
    Cached { size: u64 },
    /// The worker could not start; nothing is claimed.
    Failed { message: String },
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<()> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode status message: {}", e)))?;

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to write message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed rkyv encoding.
///
/// The body is validated before decoding; bytes from the wire that do not
/// form a valid archive are a [`Error::Deserialization`].
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
        + Deserialize<T, HighDeserializer<rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read message length: {}", e)))?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_LEN {
        return Err(Error::Ipc(format!("Status message too large: {} bytes", len)));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|e| Error::Ipc(format!("Failed to read message body: {}", e)))?;

    let mut bytes = AlignedVec::<16>::with_capacity(len);
    bytes.extend_from_slice(&body);

    rkyv::from_bytes::<T, rancor::Error>(&bytes)
        .map_err(|e| Error::Deserialization(format!("Failed to decode status message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed(body: &[u8]) -> Cursor<Vec<u8>> {
        let mut buf = (body.len() as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(body);
        Cursor::new(buf)
    }

    #[test]
    fn test_snapshot_response_roundtrip() {
        let resp = StatusResponse::Snapshot {
            path: "/tmp/cache/run/abc-1.snap".to_string(),
            size: 20,
            full_size: 400,
            finished: false,
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &resp).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: StatusResponse = read_message(&mut cursor).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_worker_request_roundtrip() {
        let req = WorkerRequest {
            corpus: "bnc".to_string(),
            content_hash: "00ff".to_string(),
            operation: "Rq[word=\"dog\"]".to_string(),
            sample_size: 250,
            full_size: Some(10_000),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &req).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: WorkerRequest = read_message(&mut cursor).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_invalid_tag_is_rejected() {
        let result: Result<StatusRequest> = read_message(&mut framed(&[0xff; 12]));
        assert!(matches!(result, Err(Error::Deserialization(_))));
    }

    #[test]
    fn test_garbage_bodies_never_panic() {
        // Arbitrary relative pointers and lengths either decode to a valid
        // value or are rejected.
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        for _ in 0..2000 {
            let mut body = [0u8; 12];
            for byte in &mut body {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                *byte = state as u8;
            }
            let _: Result<StatusResponse> = read_message(&mut framed(&body));
            let _: Result<StatusRequest> = read_message(&mut framed(&body));
            let _: Result<WorkerHandshake> = read_message(&mut framed(&body));
        }
    }

    #[test]
    fn test_sizes_response_roundtrip() {
        let resp = StatusResponse::Sizes {
            size: 1_000_000_007,
            full_size: 2_000_000_014,
            finished: false,
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &resp).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: StatusResponse = read_message(&mut cursor).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_truncated_stream_is_ipc_error() {
        let mut buf = Vec::new();
        write_message(&mut buf, &StatusRequest::Sizes).unwrap();
        buf.truncate(buf.len() - 1);

        let mut cursor = Cursor::new(buf);
        let result: Result<StatusRequest> = read_message(&mut cursor);
        assert!(matches!(result, Err(Error::Ipc(_))));
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());

        let mut cursor = Cursor::new(buf);
        let result: Result<StatusResponse> = read_message(&mut cursor);
        assert!(matches!(result, Err(Error::Ipc(msg)) if msg.contains("too large")));
    }
}
