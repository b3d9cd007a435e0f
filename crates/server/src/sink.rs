//! The seam between session dispatch and the two transport strategies.
//!
//! Dispatch only knows how to emit frames. Where they go, a buffered
//! writer owned by a connection task or a non-blocking socket inside the
//! reactor, is the sink's business.

use std::future::Future;
use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use barge_protocol::frame;

use crate::{SEND_RETRIES, SEND_RETRY_DELAY, ServerError};

/// Where a session writes its reply frames.
pub trait FrameSink {
    /// Sends one frame, returning only once it is fully handed off.
    fn send(&mut self, payload: &[u8]) -> impl Future<Output = Result<(), ServerError>> + Send;
}

/// Sink over a buffered async writer (task-per-connection variant).
///
/// A failed `write_all` on a buffered stream has no reliable resume point,
/// so errors here tear the session down instead of retrying.
pub struct BufferedSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> BufferedSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Flushes buffered frames to the socket.
    pub async fn flush(&mut self) -> Result<(), ServerError> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Consumes the sink, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin + Send> FrameSink for BufferedSink<W> {
    async fn send(&mut self, payload: &[u8]) -> Result<(), ServerError> {
        frame::write_frame(&mut self.writer, payload).await?;
        Ok(())
    }
}

/// Non-blocking sink for the reactor.
///
/// Frames go out via `try_write`, resuming from the partial-write offset
/// after every short write. A transient send failure is retried with the
/// bounded backoff policy before the connection is abandoned.
pub struct NonBlockingSink<'a> {
    stream: &'a TcpStream,
}

impl<'a> NonBlockingSink<'a> {
    pub fn new(stream: &'a TcpStream) -> Self {
        Self { stream }
    }
}

impl FrameSink for NonBlockingSink<'_> {
    async fn send(&mut self, payload: &[u8]) -> Result<(), ServerError> {
        let frame = frame::encode(payload);
        let mut sent = 0;
        let mut attempts: u32 = 0;
        while sent < frame.len() {
            self.stream.writable().await?;
            match self.stream.try_write(&frame[sent..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    sent += n;
                    attempts = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    attempts += 1;
                    if attempts > SEND_RETRIES {
                        return Err(e.into());
                    }
                    debug!(error = %e, attempts, "transient send failure, retrying");
                    tokio::time::sleep(SEND_RETRY_DELAY).await;
                }
            }
        }
        Ok(())
    }
}
