//! Inter-process communication between the supervisor and worker processes.
//!
//! The supervisor writes one [`WorkerRequest`] to the worker's stdin; the
//! worker streams [`WorkerMessage`]s back on stdout.

pub mod protocol;

pub use protocol::{
    MAX_FRAME_LEN, WorkerMessage, WorkerRequest, read_message, read_message_async, write_message,
};
