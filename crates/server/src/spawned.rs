//! Task-per-connection server variant.
//!
//! Every accepted connection gets its own task with plain awaited framed
//! I/O. Sessions are fully independent; the catalog is the only shared
//! state and is read-only after load, so the tasks share nothing mutable.

use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use barge_protocol::{Command, frame};

use crate::session::{self, Flow};
use crate::sink::BufferedSink;
use crate::{STREAM_BUFFER_LEN, ServerContext, ServerError};

/// Accepts connections until cancelled, spawning one task per session.
pub async fn serve(
    listener: TcpListener,
    ctx: ServerContext,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    info!(addr = %listener.local_addr()?, "server listening");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("server shutting down");
                return Ok(());
            }
            res = listener.accept() => {
                match res {
                    Ok((stream, addr)) => {
                        debug!(%addr, "connection accepted");
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            // One session's failure never escapes its task.
                            match handle_connection(stream, &ctx).await {
                                Ok(()) => debug!(%addr, "session closed"),
                                Err(e) => warn!(%addr, error = %e, "session ended with error"),
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }
}

/// Drives one session: framed command reads, state-machine dispatch.
async fn handle_connection(stream: TcpStream, ctx: &ServerContext) -> Result<(), ServerError> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::with_capacity(STREAM_BUFFER_LEN, reader);
    let mut sink = BufferedSink::new(BufWriter::with_capacity(STREAM_BUFFER_LEN, writer));

    loop {
        let payload = match frame::read_frame(&mut reader).await? {
            Some(payload) => payload,
            // Orderly close between commands.
            None => return Ok(()),
        };
        let flow = session::dispatch(Command::parse(&payload), ctx, &mut sink).await?;
        sink.flush().await?;
        if flow == Flow::Quit {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;
    use barge_protocol::{EOF_SENTINEL, StatusLine, decode_listing};
    use std::net::SocketAddr;
    use tokio::io::AsyncWriteExt;

    async fn start(ctx: ServerContext) -> (SocketAddr, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let serve_cancel = cancel.clone();
        tokio::spawn(async move { serve(listener, ctx, serve_cancel).await });
        (addr, cancel)
    }

    async fn exchange(addr: SocketAddr, command: &Command) -> Vec<Vec<u8>> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        frame::write_frame(&mut writer, &command.to_payload())
            .await
            .unwrap();
        writer.flush().await.unwrap();
        // Half-close so the server sees an orderly end after the reply.
        writer.shutdown().await.unwrap();

        let mut frames = Vec::new();
        while let Some(payload) = frame::read_frame(&mut reader).await.unwrap() {
            frames.push(payload);
        }
        frames
    }

    #[tokio::test]
    async fn retr_sub_range_over_the_wire() {
        let (_dir, ctx) = testdata::context();
        let (addr, cancel) = start(ctx).await;

        let frames = exchange(
            addr,
            &Command::Retr {
                name: "a.bin".into(),
                offset: Some(3),
                length: Some(4),
            },
        )
        .await;

        assert!(StatusLine::parse(&frames[0]).unwrap().proceed());
        assert_eq!(frames[1], b"3456");
        assert_eq!(frames[2], EOF_SENTINEL);
        assert!(frames[3].starts_with(b"226"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn list_over_the_wire() {
        let (_dir, ctx) = testdata::context();
        let (addr, cancel) = start(ctx).await;

        let frames = exchange(addr, &Command::List).await;
        assert!(StatusLine::parse(&frames[0]).unwrap().proceed());
        let listing = decode_listing(&frames[1]).unwrap();
        assert_eq!(listing.len(), 2);
        assert!(frames[2].starts_with(b"226"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn unknown_file_is_refused_without_data() {
        let (_dir, ctx) = testdata::context();
        let (addr, cancel) = start(ctx).await;

        let frames = exchange(
            addr,
            &Command::Retr {
                name: "missing.bin".into(),
                offset: None,
                length: None,
            },
        )
        .await;
        assert_eq!(frames, vec![b"550 File unavailable: missing.bin".to_vec()]);

        cancel.cancel();
    }

    #[tokio::test]
    async fn sessions_run_concurrently() {
        let (_dir, ctx) = testdata::context();
        let (addr, cancel) = start(ctx).await;

        let mut handles = Vec::new();
        for offset in [0u64, 5] {
            handles.push(tokio::spawn(async move {
                exchange(
                    addr,
                    &Command::Retr {
                        name: "a.bin".into(),
                        offset: Some(offset),
                        length: Some(5),
                    },
                )
                .await
            }));
        }

        let first = handles.remove(0).await.unwrap();
        let second = handles.remove(0).await.unwrap();
        assert_eq!(first[1], b"01234");
        assert_eq!(second[1], b"56789");

        cancel.cancel();
    }
}
