//! Per-connection protocol logic, shared by both server variants.
//!
//! One [`dispatch`] call drives the full reply sequence for a decoded
//! command. Catalog and parse failures are answered on the wire (`550`,
//! `501`) and leave the session open; only transport failures and `QUIT`
//! end it.

use std::io;
use std::io::SeekFrom;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use barge_catalog::RangeError;
use barge_protocol::{Command, CommandError, DATA_FRAME_LEN, FrameDecoder, ProtocolError};
use barge_protocol::{frame, reply};

use crate::sink::FrameSink;
use crate::{ServerContext, ServerError};

/// What the session does after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Await the next command.
    Continue,
    /// The connection is done (`QUIT`, or an orderly close by the peer).
    Quit,
}

/// Lifecycle phase of a session.
///
/// The reactor derives a session's interest from this: read interest while
/// awaiting a command, write interest while one is pending. A session is in
/// exactly one of the two at any time; `Closed` is represented by removal
/// from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingCommand,
    Dispatching,
}

/// Server-side state for one accepted connection.
///
/// Owns the inbound frame accumulator and the command awaiting dispatch.
/// Command parse failures are stored alongside successes so the `501` reply
/// happens at dispatch time like every other reply.
#[derive(Debug, Default)]
pub struct Session {
    decoder: FrameDecoder,
    pending: Option<Result<Command, CommandError>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        if self.pending.is_some() {
            Phase::Dispatching
        } else {
            Phase::AwaitingCommand
        }
    }

    /// True if the accumulator holds a partial frame; a remote close now is
    /// a mid-frame disconnect, not an orderly one.
    pub fn mid_frame(&self) -> bool {
        self.decoder.mid_frame()
    }

    /// Feeds transport bytes into the frame accumulator.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.decoder.extend(bytes);
    }

    /// Promotes the next buffered frame (if any) to the pending command.
    ///
    /// Frame-layer failures (oversized declared length) are fatal to the
    /// session and bubble up here.
    pub fn pump(&mut self) -> Result<(), ProtocolError> {
        if self.pending.is_some() {
            return Ok(());
        }
        if let Some(payload) = self.decoder.next_frame()? {
            self.pending = Some(Command::parse(&payload));
        }
        Ok(())
    }

    /// Takes the command awaiting dispatch.
    pub fn take_pending(&mut self) -> Option<Result<Command, CommandError>> {
        self.pending.take()
    }
}

/// Runs one decoded command through the state machine, writing the reply
/// sequence to `sink`.
pub async fn dispatch<S: FrameSink>(
    parsed: Result<Command, CommandError>,
    ctx: &ServerContext,
    sink: &mut S,
) -> Result<Flow, ServerError> {
    match parsed {
        Err(e) => {
            debug!(error = %e, "rejecting command");
            sink.send(reply::syntax_error(&e).as_bytes()).await?;
            Ok(Flow::Continue)
        }
        Ok(Command::List) => list(ctx, sink).await,
        Ok(Command::Quit) => {
            sink.send(reply::GOODBYE.as_bytes()).await?;
            Ok(Flow::Quit)
        }
        Ok(Command::Retr {
            name,
            offset,
            length,
        }) => retr(ctx, &name, offset, length, sink).await,
    }
}

async fn list<S: FrameSink>(ctx: &ServerContext, sink: &mut S) -> Result<Flow, ServerError> {
    if ctx.catalog.is_empty() {
        sink.send(reply::PERMISSIONS_UNAVAILABLE.as_bytes()).await?;
        return Ok(Flow::Continue);
    }
    let listing = barge_protocol::encode_listing(ctx.catalog.entries())?;
    sink.send(reply::FILE_STATUS_OK.as_bytes()).await?;
    sink.send(&listing).await?;
    sink.send(reply::PERMISSIONS_SENT.as_bytes()).await?;
    debug!(files = ctx.catalog.len(), "listing sent");
    Ok(Flow::Continue)
}

async fn retr<S: FrameSink>(
    ctx: &ServerContext,
    name: &str,
    offset: Option<u64>,
    length: Option<u64>,
    sink: &mut S,
) -> Result<Flow, ServerError> {
    // Validate against the catalog before touching the filesystem.
    let range = match ctx.catalog.resolve_range(name, offset, length) {
        Ok(range) => range,
        Err(RangeError::NotPermitted(_)) => {
            sink.send(reply::file_unavailable(name).as_bytes()).await?;
            return Ok(Flow::Continue);
        }
        Err(RangeError::OutOfBounds(_)) => {
            sink.send(reply::range_not_satisfiable(name).as_bytes())
                .await?;
            return Ok(Flow::Continue);
        }
    };

    let path = ctx.data_dir.join(name);
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            // Cataloged at load time but gone from disk since.
            warn!(%name, "catalog file missing on disk");
            sink.send(reply::file_missing(name).as_bytes()).await?;
            return Ok(Flow::Continue);
        }
        Err(e) => return Err(e.into()),
    };

    sink.send(reply::FILE_STATUS_OK.as_bytes()).await?;

    file.seek(SeekFrom::Start(range.offset)).await?;
    let mut buf = vec![0u8; DATA_FRAME_LEN];
    let mut remaining = range.length;
    let mut chunks = 0u64;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            // File shrank under us. Ending the stream early makes the
            // client's received-byte check fail the range.
            warn!(%name, remaining, "file truncated during transfer");
            break;
        }
        sink.send(&buf[..n]).await?;
        remaining -= n as u64;
        chunks += 1;
    }
    sink.send(frame::EOF_SENTINEL).await?;
    sink.send(reply::TRANSFER_COMPLETE.as_bytes()).await?;
    debug!(%name, offset = range.offset, length = range.length, chunks, "range sent");
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferedSink;
    use crate::testdata;
    use barge_protocol::{EOF_SENTINEL, decode_listing, read_frame};

    /// Dispatches one command and returns the reply frames it produced.
    async fn run(parsed: Result<Command, CommandError>, ctx: &ServerContext) -> (Flow, Vec<Vec<u8>>) {
        let mut sink = BufferedSink::new(Vec::new());
        let flow = dispatch(parsed, ctx, &mut sink).await.unwrap();

        // Vec-backed sinks need no flush; write_frame goes straight through.
        let buf = sink.into_inner();
        let mut frames = Vec::new();
        let mut cursor = &buf[..];
        while let Some(frame) = read_frame(&mut cursor).await.unwrap() {
            frames.push(frame);
        }
        (flow, frames)
    }

    #[tokio::test]
    async fn retr_sub_range_sends_exact_bytes() {
        let (_dir, ctx) = testdata::context();
        let cmd = Command::Retr {
            name: "a.bin".into(),
            offset: Some(3),
            length: Some(4),
        };
        let (flow, frames) = run(Ok(cmd), &ctx).await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(frames[0], reply::FILE_STATUS_OK.as_bytes());
        assert_eq!(frames[1], b"3456");
        assert_eq!(frames[2], EOF_SENTINEL);
        assert_eq!(frames[3], reply::TRANSFER_COMPLETE.as_bytes());
        assert_eq!(frames.len(), 4);
    }

    #[tokio::test]
    async fn retr_whole_file_defaults_range() {
        let (_dir, ctx) = testdata::context();
        let cmd = Command::Retr {
            name: "a.bin".into(),
            offset: None,
            length: None,
        };
        let (_, frames) = run(Ok(cmd), &ctx).await;
        assert_eq!(frames[1], b"0123456789");
        assert_eq!(frames[2], EOF_SENTINEL);
    }

    #[tokio::test]
    async fn retr_large_file_splits_into_data_frames() {
        let (_dir, ctx) = testdata::context();
        let cmd = Command::Retr {
            name: "big.bin".into(),
            offset: None,
            length: None,
        };
        let (_, frames) = run(Ok(cmd), &ctx).await;

        // 200_000 bytes at 64 KiB per frame: 3 full-ish frames, capped tail.
        let data: Vec<&Vec<u8>> = frames[1..frames.len() - 2].iter().collect();
        assert_eq!(data.len(), 4);
        let total: usize = data.iter().map(|f| f.len()).sum();
        assert_eq!(total, 200_000);
        assert!(data.iter().all(|f| f.len() <= DATA_FRAME_LEN));
    }

    #[tokio::test]
    async fn retr_unknown_file_is_550_without_data() {
        let (_dir, ctx) = testdata::context();
        let cmd = Command::Retr {
            name: "missing.bin".into(),
            offset: None,
            length: None,
        };
        let (flow, frames) = run(Ok(cmd), &ctx).await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(frames, vec![b"550 File unavailable: missing.bin".to_vec()]);
    }

    #[tokio::test]
    async fn retr_never_touches_disk_for_uncataloged_names() {
        // The data directory contains the file, but the catalog does not
        // permit it, so the reply must be 550, not file data.
        let (dir, ctx) = testdata::context();
        std::fs::write(dir.path().join("secret.bin"), b"secret").unwrap();
        let cmd = Command::Retr {
            name: "secret.bin".into(),
            offset: None,
            length: None,
        };
        let (_, frames) = run(Ok(cmd), &ctx).await;
        assert_eq!(frames, vec![b"550 File unavailable: secret.bin".to_vec()]);
    }

    #[tokio::test]
    async fn retr_out_of_bounds_range_is_550() {
        let (_dir, ctx) = testdata::context();
        let cmd = Command::Retr {
            name: "a.bin".into(),
            offset: Some(3),
            length: Some(8),
        };
        let (_, frames) = run(Ok(cmd), &ctx).await;
        assert_eq!(frames, vec![b"550 Range not satisfiable: a.bin".to_vec()]);
    }

    #[tokio::test]
    async fn retr_vanished_file_is_550_missing() {
        let (dir, ctx) = testdata::context();
        std::fs::remove_file(dir.path().join("a.bin")).unwrap();
        let cmd = Command::Retr {
            name: "a.bin".into(),
            offset: None,
            length: None,
        };
        let (_, frames) = run(Ok(cmd), &ctx).await;
        assert_eq!(frames, vec![b"550 File missing: a.bin".to_vec()]);
    }

    #[tokio::test]
    async fn list_sends_catalog_between_status_lines() {
        let (_dir, ctx) = testdata::context();
        let (flow, frames) = run(Ok(Command::List), &ctx).await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(frames[0], reply::FILE_STATUS_OK.as_bytes());
        let listing = decode_listing(&frames[1]).unwrap();
        assert_eq!(listing.get("a.bin"), Some(&10));
        assert_eq!(listing.get("big.bin"), Some(&200_000));
        assert_eq!(frames[2], reply::PERMISSIONS_SENT.as_bytes());
    }

    #[tokio::test]
    async fn list_with_empty_catalog_is_550() {
        let (_dir, ctx) = testdata::empty_context();
        let (_, frames) = run(Ok(Command::List), &ctx).await;
        assert_eq!(frames, vec![reply::PERMISSIONS_UNAVAILABLE.as_bytes().to_vec()]);
    }

    #[tokio::test]
    async fn empty_catalog_denies_retr() {
        let (dir, ctx) = testdata::empty_context();
        std::fs::write(dir.path().join("a.bin"), b"0123456789").unwrap();
        let cmd = Command::Retr {
            name: "a.bin".into(),
            offset: None,
            length: None,
        };
        let (_, frames) = run(Ok(cmd), &ctx).await;
        assert_eq!(frames, vec![b"550 File unavailable: a.bin".to_vec()]);
    }

    #[tokio::test]
    async fn quit_replies_goodbye_and_ends_session() {
        let (_dir, ctx) = testdata::context();
        let (flow, frames) = run(Ok(Command::Quit), &ctx).await;
        assert_eq!(flow, Flow::Quit);
        assert_eq!(frames, vec![reply::GOODBYE.as_bytes().to_vec()]);
    }

    #[tokio::test]
    async fn parse_failure_is_501_and_session_stays_open() {
        let (_dir, ctx) = testdata::context();
        let (flow, frames) = run(Err(CommandError::MissingFileName), &ctx).await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            frames,
            vec![b"501 Syntax error: Expected file name after RETR command".to_vec()]
        );

        let (flow, frames) = run(Err(CommandError::Unknown("STOR a.bin".into())), &ctx).await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(frames, vec![b"501 Syntax error: Unknown command STOR a.bin".to_vec()]);
    }

    #[test]
    fn session_pumps_one_command_at_a_time() {
        let mut session = Session::new();
        assert_eq!(session.phase(), Phase::AwaitingCommand);

        // Two pipelined commands in one read.
        let mut bytes = frame::encode(b"LIST");
        bytes.extend_from_slice(&frame::encode(b"QUIT"));
        session.feed(&bytes);

        session.pump().unwrap();
        assert_eq!(session.phase(), Phase::Dispatching);
        assert_eq!(session.take_pending().unwrap().unwrap(), Command::List);

        // The second command is still buffered, not lost.
        session.pump().unwrap();
        assert_eq!(session.take_pending().unwrap().unwrap(), Command::Quit);

        session.pump().unwrap();
        assert_eq!(session.phase(), Phase::AwaitingCommand);
        assert!(session.take_pending().is_none());
    }

    #[test]
    fn session_surfaces_frame_decode_failure() {
        let mut session = Session::new();
        session.feed(&u32::MAX.to_be_bytes());
        assert!(session.pump().is_err());
    }
}
