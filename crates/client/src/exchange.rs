//! Small helpers for one framed exchange with the server.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use barge_protocol::{Command, ProtocolError, StatusLine, frame};

use crate::ClientError;

/// Reads a frame that must exist; an orderly close here is still a broken
/// exchange from the client's point of view.
pub(crate) async fn expect_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, ClientError> {
    frame::read_frame(reader)
        .await?
        .ok_or(ClientError::Protocol(ProtocolError::ConnectionClosed))
}

/// Reads and parses a status line.
pub(crate) async fn expect_status<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<StatusLine, ClientError> {
    let payload = expect_frame(reader).await?;
    Ok(StatusLine::parse(&payload)?)
}

/// Ends a session politely: `QUIT`, drain the `221`, done.
pub(crate) async fn quit<R, W>(reader: &mut R, writer: &mut W) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    frame::write_frame(writer, &Command::Quit.to_payload()).await?;
    writer.flush().await?;
    let _ = expect_status(reader).await?;
    Ok(())
}
