//! The range-download coordinator.
//!
//! One task per range, each with its own connection and its own receive
//! loop; a join barrier before any buffer is trusted; reassembly strictly
//! by range index, never by completion order.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use barge_protocol::{Command, EOF_SENTINEL, RangeTask, frame, partition};

use crate::exchange::{expect_frame, expect_status, quit};
use crate::output::unique_output_path;
use crate::progress::ProgressEvent;
use crate::{ClientError, DEFAULT_WORKERS, STREAM_BUFFER_LEN};

/// One download call: which file, how big, where to put it.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// File name on the server (from the listing).
    pub name: String,
    /// Total size from the listing; drives the range partition.
    pub size: u64,
    /// Concurrent range workers.
    pub workers: usize,
    /// Directory the output file lands in.
    pub output_dir: PathBuf,
    /// Save under this name instead of the server-side one.
    pub rename: Option<String>,
}

impl DownloadRequest {
    pub fn new(name: impl Into<String>, size: u64, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            size,
            workers: DEFAULT_WORKERS,
            output_dir: output_dir.into(),
            rename: None,
        }
    }
}

/// Downloads `req.name` over `req.workers` parallel connections.
///
/// Returns the path the file was written to. Every range must complete;
/// any worker failure fails the call before an output file exists.
pub async fn download(
    addr: SocketAddr,
    req: &DownloadRequest,
    progress: Option<mpsc::Sender<ProgressEvent>>,
) -> Result<PathBuf, ClientError> {
    let tasks = partition(req.size, req.workers);
    info!(name = %req.name, size = req.size, workers = tasks.len(), "starting download");

    let mut set = JoinSet::new();
    for task in &tasks {
        let task = *task;
        let name = req.name.clone();
        let progress = progress.clone();
        set.spawn(async move {
            let data = fetch_range(addr, &name, task, progress).await?;
            Ok::<_, ClientError>((task.index, data))
        });
    }

    // Join barrier: no buffer is trusted until its worker has finished.
    let mut slots: Vec<Option<Vec<u8>>> = vec![None; tasks.len()];
    while let Some(joined) = set.join_next().await {
        let (index, data) = joined.map_err(|_| ClientError::WorkerFailed)??;
        slots[index] = Some(data);
    }

    let assembled = assemble(slots)?;
    let out_name = req.rename.as_deref().unwrap_or(&req.name);
    let path = unique_output_path(&req.output_dir, out_name);
    tokio::fs::write(&path, &assembled).await?;
    info!(path = %path.display(), bytes = assembled.len(), "download complete");
    Ok(path)
}

/// Concatenates range buffers in ascending index order.
fn assemble(slots: Vec<Option<Vec<u8>>>) -> Result<Vec<u8>, ClientError> {
    let total = slots
        .iter()
        .map(|s| s.as_ref().map_or(0, Vec::len))
        .sum::<usize>();
    let mut assembled = Vec::with_capacity(total);
    for slot in slots {
        let chunk = slot.ok_or(ClientError::WorkerFailed)?;
        assembled.extend_from_slice(&chunk);
    }
    Ok(assembled)
}

/// Fetches one byte range over its own connection.
async fn fetch_range(
    addr: SocketAddr,
    name: &str,
    task: RangeTask,
    progress: Option<mpsc::Sender<ProgressEvent>>,
) -> Result<Vec<u8>, ClientError> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::with_capacity(STREAM_BUFFER_LEN, reader);
    let mut writer = BufWriter::new(writer);

    let request = Command::Retr {
        name: name.to_string(),
        offset: Some(task.offset),
        length: Some(task.length),
    };
    frame::write_frame(&mut writer, &request.to_payload()).await?;
    writer.flush().await?;

    let status = expect_status(&mut reader).await?;
    if !status.proceed() {
        return Err(ClientError::Refused(status.as_str().to_string()));
    }

    let mut data = Vec::with_capacity(task.length as usize);
    loop {
        let payload = expect_frame(&mut reader).await?;
        if payload == EOF_SENTINEL {
            break;
        }
        data.extend_from_slice(&payload);
        if let Some(tx) = &progress {
            // Display only; a full channel drops the event.
            let _ = tx.try_send(ProgressEvent {
                range: task.index,
                received: data.len() as u64,
                total: task.length,
            });
        }
    }
    // "226 Transfer complete" is informational.
    let _ = expect_status(&mut reader).await?;
    quit(&mut reader, &mut writer).await?;

    if data.len() as u64 != task.length {
        return Err(ClientError::ShortRange {
            index: task.index,
            got: data.len() as u64,
            expected: task.length,
        });
    }
    debug!(range = task.index, bytes = data.len(), "range complete");
    Ok(data)
}
