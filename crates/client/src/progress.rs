//! Download progress events.
//!
//! Each range worker owns its counters and publishes over an `mpsc`
//! channel. Display is a side effect and never a synchronization signal, so
//! a full channel drops the event rather than stalling the transfer.

/// Progress of one range worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Range index the worker owns.
    pub range: usize,
    /// Bytes received for this range so far.
    pub received: u64,
    /// Total bytes this range will deliver.
    pub total: u64,
}
