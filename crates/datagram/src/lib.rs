//! Best-effort datagram transfer variant.
//!
//! The same range-download idea as the stream client, without reliable
//! delivery: one request datagram per chunk, one response datagram per
//! chunk, a receive timeout, and a bounded number of re-sends before the
//! chunk, and with it the download, fails definitively. There is no session
//! and no ordering; the retry budget is the only delivery guarantee.

pub mod client;
pub mod server;
pub mod wire;

pub use client::{DatagramConfig, download};
pub use server::DatagramServer;

/// Errors produced by the datagram variant.
#[derive(Debug, thiserror::Error)]
pub enum DatagramError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server refused chunk {chunk}: {message}")]
    Refused { chunk: usize, message: String },

    #[error("chunk {chunk} unanswered after {attempts} attempts")]
    Unreachable { chunk: usize, attempts: u32 },

    #[error("chunk {chunk} returned {got} bytes, expected {expected}")]
    ShortChunk {
        chunk: usize,
        got: usize,
        expected: u64,
    },

    #[error("chunk {0} does not fit a datagram")]
    ChunkTooLarge(usize),

    #[error("chunk worker task failed")]
    WorkerFailed,
}
