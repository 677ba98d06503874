//! IPC protocol messages for Scribe worker processes.
//!
//! Uses length-prefixed rkyv messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Frames larger than this are rejected (100MB).
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Requests sent from the supervisor to a worker.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum WorkerRequest {
    /// Evaluate a notebook.
    Evaluate {
        /// Notebook the events belong to.
        notebook_id: String,
        /// The notebook document as JSON.
        notebook_json: String,
        /// Target cell, if any.
        cell_id: Option<String>,
        /// Evaluate only the target cell.
        single_cell: bool,
        /// Project directory modules resolve in.
        project_dir: String,
        /// Output cap.
        max_outputs: u64,
        /// Worker-side wall-clock budget in milliseconds.
        deadline_ms: Option<u64>,
        /// Drain loop poll interval in milliseconds.
        poll_interval_ms: u64,
    },

    /// Exit immediately with a failure status.
    TestDeath,

    /// Panic.
    TestException,

    /// Never finish.
    TestLong,
}

/// Messages sent from a worker to the supervisor.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// One evaluation event, JSON-encoded.
    Event { payload_json: String },

    /// The evaluation finished; no further messages follow.
    Completed,
}

/// Write a length-prefixed message to a writer.
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
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a length-prefixed message from a reader.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message length: {}", e)))?;
    let len = frame_len(len_bytes)?;

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    decode(&bytes)
}

/// Read a length-prefixed message from an async reader.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new frame.
pub async fn read_message_async<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(Error::Ipc(format!("Failed to read IPC message length: {}", e)));
        }
    }
    let len = frame_len(len_bytes)?;

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    decode(&bytes).map(Some)
}

fn frame_len(len_bytes: [u8; 4]) -> Result<usize> {
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }
    Ok(len)
}

fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    // rkyv requires aligned input; frames are read into plain byte vectors.
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    // SAFETY: frames only come from our own worker and supervisor processes.
    unsafe { rkyv::from_bytes_unchecked::<T, rkyv::rancor::Error>(&aligned) }
        .map_err(|e| Error::Deserialization(format!("Failed to decode IPC message: {}", e)))
}
