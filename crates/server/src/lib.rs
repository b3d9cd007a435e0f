//! Framed TCP file server.
//!
//! Two interchangeable front ends drive the same per-session state machine:
//! a single-threaded readiness [`reactor`] that multiplexes every connection
//! from one task, and a [`spawned`] variant that dedicates a task per
//! connection. Both speak the identical wire contract; a failed session is
//! always torn down in isolation and never takes the server with it.

pub mod reactor;
pub mod session;
pub mod sink;
pub mod spawned;

pub use reactor::{Reactor, SessionId};
pub use session::{Flow, Phase, Session};
pub use spawned::serve;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use barge_catalog::Catalog;

/// Attempts for a transient send failure before the connection is abandoned.
pub const SEND_RETRIES: u32 = 5;

/// Delay between send retries.
pub const SEND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Buffered reader/writer capacity for the task-per-connection variant.
pub const STREAM_BUFFER_LEN: usize = 256 * 1024;

/// Shared server context: the catalog and the directory its files live in.
///
/// The catalog is read-only after load, so cloning the context into each
/// connection task needs no further synchronization.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub catalog: Arc<Catalog>,
    pub data_dir: PathBuf,
}

impl ServerContext {
    pub fn new(catalog: Catalog, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            data_dir: data_dir.into(),
        }
    }
}

/// Errors produced by the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] barge_protocol::ProtocolError),
}

#[cfg(test)]
pub(crate) mod testdata {
    use super::ServerContext;
    use barge_catalog::Catalog;
    use tempfile::TempDir;

    /// A data directory with a couple of known files and a matching catalog.
    pub fn context() -> (TempDir, ServerContext) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"0123456789").unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![0xA5u8; 200_000]).unwrap();

        let catalog = Catalog::from_entries([
            ("a.bin".to_string(), 10),
            ("big.bin".to_string(), 200_000),
        ]);
        let ctx = ServerContext::new(catalog, dir.path());
        (dir, ctx)
    }

    /// A context whose catalog permits nothing.
    pub fn empty_context() -> (TempDir, ServerContext) {
        let dir = TempDir::new().unwrap();
        let ctx = ServerContext::new(Catalog::default(), dir.path());
        (dir, ctx)
    }
}
