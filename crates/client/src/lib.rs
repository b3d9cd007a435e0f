//! Parallel range-download client.
//!
//! Splits a file into contiguous byte ranges, fetches each range over its
//! own connection, and reassembles the result strictly in range order. A
//! failed range fails the whole download: a truncated output file is never
//! written.

mod download;
mod exchange;
mod listing;
mod output;
mod progress;

pub use download::{DownloadRequest, download};
pub use listing::fetch_listing;
pub use output::unique_output_path;
pub use progress::ProgressEvent;

/// Default number of concurrent range workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Buffered reader capacity for data-frame streams.
pub const STREAM_BUFFER_LEN: usize = 256 * 1024;

/// Errors produced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] barge_protocol::ProtocolError),

    #[error("server refused the request: {0}")]
    Refused(String),

    #[error("range {index} returned {got} bytes, expected {expected}")]
    ShortRange {
        index: usize,
        got: u64,
        expected: u64,
    },

    #[error("range worker task failed")]
    WorkerFailed,
}
