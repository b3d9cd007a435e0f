//! Length-prefixed framing over a byte stream.
//!
//! # Wire format
//!
//! ```text
//! FRAME: [4 bytes BE: payload_len][payload_len bytes: payload]
//! ```
//!
//! A frame is never surfaced to the application layer until exactly
//! `payload_len` bytes have accumulated. A file-data stream ends with a
//! sentinel frame whose payload is exactly [`EOF_SENTINEL`]; receivers
//! compare whole payloads, never search for the bytes inside data frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProtocolError;

/// Frame header length (big-endian payload length).
pub const HEADER_LEN: usize = 4;

/// Sentinel payload terminating a file-data stream.
pub const EOF_SENTINEL: &[u8] = b"EOF";

/// Hard cap on a declared payload length.
///
/// A peer declaring more than this is not speaking the protocol; the
/// connection is torn down rather than buffering unbounded data.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encodes one payload as a contiguous frame (header + payload).
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental frame accumulator for non-blocking reads.
///
/// Feed arbitrarily chunked transport bytes with [`extend`](Self::extend);
/// [`next_frame`](Self::next_frame) yields a payload only once the full
/// header and declared payload have arrived. One read may carry less than a
/// frame or more than one; neither case is special.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends transport bytes to the accumulator.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// True if the accumulator holds bytes of an incomplete frame.
    pub fn mid_frame(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Yields the next complete payload, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let declared =
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if declared > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(declared));
        }
        if self.buf.len() < HEADER_LEN + declared {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..HEADER_LEN + declared].to_vec();
        self.buf.drain(..HEADER_LEN + declared);
        Ok(Some(payload))
    }
}

/// Writes one frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Reads one frame from the stream.
///
/// Returns `Ok(None)` on an orderly close at a frame boundary. A close after
/// any byte of a frame has arrived is [`ProtocolError::ConnectionClosed`].
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, ProtocolError> {
    let first = match reader.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut rest = [0u8; HEADER_LEN - 1];
    reader.read_exact(&mut rest).await.map_err(mid_frame_eof)?;
    let declared = u32::from_be_bytes([first, rest[0], rest[1], rest[2]]) as usize;
    if declared > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(declared));
    }

    let mut payload = vec![0u8; declared];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(mid_frame_eof)?;
    Ok(Some(payload))
}

fn mid_frame_eof(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}
