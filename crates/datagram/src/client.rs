//! Datagram range-download client with bounded retry.
//!
//! Same partition math as the stream client, one socket per worker. A
//! receive timeout re-sends the same request at most
//! [`DatagramConfig::max_attempts`] times, then the chunk (and with it
//! the download) fails definitively instead of looping forever against an
//! unreachable peer.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, info};

use barge_protocol::{RangeTask, partition};

use crate::DatagramError;
use crate::wire::{ChunkRequest, ChunkResponse, MAX_RESPONSE_LEN};

/// Tuning for one datagram download.
#[derive(Debug, Clone)]
pub struct DatagramConfig {
    /// Concurrent chunk workers.
    pub workers: usize,
    /// How long to wait for a response before re-sending.
    pub timeout: Duration,
    /// Sends of the same request before giving up.
    pub max_attempts: u32,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            timeout: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

/// Downloads `name` (of `size` bytes) from the datagram server.
///
/// Returns the path the file was written to. Like the stream coordinator,
/// every chunk must arrive; a definitive failure on any chunk fails the
/// call before an output file exists.
pub async fn download(
    server: SocketAddr,
    name: &str,
    size: u64,
    output_dir: &Path,
    config: DatagramConfig,
) -> Result<PathBuf, DatagramError> {
    let tasks = partition(size, config.workers);
    info!(%name, size, workers = tasks.len(), "starting datagram download");

    let mut set = JoinSet::new();
    for task in &tasks {
        let task = *task;
        let name = name.to_string();
        let config = config.clone();
        set.spawn(async move {
            let payload = fetch_chunk(server, &name, task, &config).await?;
            Ok::<_, DatagramError>((task.index, payload))
        });
    }

    let mut slots: Vec<Option<Vec<u8>>> = vec![None; tasks.len()];
    while let Some(joined) = set.join_next().await {
        let (index, payload) = joined.map_err(|_| DatagramError::WorkerFailed)??;
        slots[index] = Some(payload);
    }

    let mut assembled = Vec::with_capacity(size as usize);
    for slot in slots {
        assembled.extend_from_slice(&slot.ok_or(DatagramError::WorkerFailed)?);
    }

    let path = output_dir.join(name);
    tokio::fs::write(&path, &assembled).await?;
    info!(path = %path.display(), bytes = assembled.len(), "datagram download complete");
    Ok(path)
}

/// Fetches one chunk over its own socket, re-sending on timeout.
async fn fetch_chunk(
    server: SocketAddr,
    name: &str,
    task: RangeTask,
    config: &DatagramConfig,
) -> Result<Vec<u8>, DatagramError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(server).await?;

    let request = ChunkRequest {
        name: name.to_string(),
        chunk_id: task.index as u32,
        offset: task.offset,
        length: task.length,
    }
    .encode();

    let mut buf = vec![0u8; MAX_RESPONSE_LEN];
    for attempt in 1..=config.max_attempts.max(1) {
        socket.send(&request).await?;
        match tokio::time::timeout(
            config.timeout,
            recv_matching(&socket, &mut buf, task.index as u32),
        )
        .await
        {
            Ok(result) => {
                let payload = result?;
                if payload.len() as u64 != task.length {
                    return Err(DatagramError::ShortChunk {
                        chunk: task.index,
                        got: payload.len(),
                        expected: task.length,
                    });
                }
                debug!(chunk = task.index, bytes = payload.len(), attempt, "chunk received");
                return Ok(payload);
            }
            Err(_) => debug!(chunk = task.index, attempt, "timed out, resending"),
        }
    }
    Err(DatagramError::Unreachable {
        chunk: task.index,
        attempts: config.max_attempts.max(1),
    })
}

/// Receives until a response for `chunk_id` arrives; strays are skipped.
async fn recv_matching(
    socket: &UdpSocket,
    buf: &mut [u8],
    chunk_id: u32,
) -> Result<Vec<u8>, DatagramError> {
    loop {
        let n = socket.recv(buf).await?;
        match ChunkResponse::parse(&buf[..n]) {
            Some(response) if response.chunk_id() == chunk_id => match response {
                ChunkResponse::Data { payload, .. } => return Ok(payload),
                ChunkResponse::Error { message, .. } => {
                    return Err(DatagramError::Refused {
                        chunk: chunk_id as usize,
                        message,
                    });
                }
            },
            // A stale or mismatched datagram; keep waiting for ours.
            _ => debug!(chunk = chunk_id, "ignoring stray datagram"),
        }
    }
}
