//! Single-threaded readiness reactor.
//!
//! One task owns the listener and every session. Each loop iteration
//! demultiplexes readiness over the listener plus each open session's
//! current interest (read while awaiting a command, write while one is
//! pending) and performs one non-blocking step for the woken connection.
//! Idle connections cost nothing beyond their registry entry.
//!
//! Dispatch runs inline, so a slow disk read inside `RETR` stalls the loop
//! for that command; the trade is per-command simplicity over fairness,
//! and the wire contract is unaffected.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use barge_protocol::ProtocolError;

use crate::session::{self, Flow, Phase, Session};
use crate::sink::NonBlockingSink;
use crate::{ServerContext, ServerError};

/// Stable identifier for a session in the registry.
///
/// Monotonic per reactor; never reused, unlike the raw socket handle it
/// hides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// One registered connection: the socket plus its protocol state.
struct Conn {
    stream: TcpStream,
    addr: SocketAddr,
    session: Session,
}

/// What a loop iteration woke up for.
enum Wake {
    Accept(io::Result<(TcpStream, SocketAddr)>),
    Io(SessionId),
    Shutdown,
}

/// The multiplexed server loop.
pub struct Reactor {
    listener: TcpListener,
    ctx: ServerContext,
    sessions: HashMap<SessionId, Conn>,
    next_id: u64,
}

impl Reactor {
    /// Binds the listener and prepares an empty session registry.
    pub async fn bind(addr: SocketAddr, ctx: ServerContext) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "reactor listening");
        Ok(Self {
            listener,
            ctx,
            sessions: HashMap::new(),
            next_id: 0,
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the loop until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ServerError> {
        loop {
            let wake = {
                let mut readiness: FuturesUnordered<_> = self
                    .sessions
                    .iter()
                    .map(|(id, conn)| {
                        let id = *id;
                        let interest = match conn.session.phase() {
                            Phase::AwaitingCommand => Interest::READABLE,
                            Phase::Dispatching => Interest::WRITABLE,
                        };
                        let stream = &conn.stream;
                        async move {
                            // Readiness failures surface on the try_read or
                            // try_write that follows.
                            let _ = stream.ready(interest).await;
                            id
                        }
                    })
                    .collect();

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Wake::Shutdown,
                    res = self.listener.accept() => Wake::Accept(res),
                    Some(id) = readiness.next() => Wake::Io(id),
                }
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Accept(Ok((stream, addr))) => self.register(stream, addr),
                Wake::Accept(Err(e)) => warn!(error = %e, "accept failed"),
                Wake::Io(id) => self.step(id).await,
            }
        }
        info!(sessions = self.sessions.len(), "reactor shutting down");
        Ok(())
    }

    fn register(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        debug!(%id, %addr, "session opened");
        self.sessions.insert(
            id,
            Conn {
                stream,
                addr,
                session: Session::new(),
            },
        );
    }

    /// Performs one step for a woken session and tears it down on any
    /// terminal outcome. Session failures stay inside the session.
    async fn step(&mut self, id: SessionId) {
        let Some(conn) = self.sessions.get_mut(&id) else {
            return;
        };
        let outcome = match conn.session.phase() {
            Phase::AwaitingCommand => read_step(conn),
            Phase::Dispatching => dispatch_step(conn, &self.ctx).await,
        };
        match outcome {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => {
                debug!(%id, "session closed");
                self.teardown(id);
            }
            Err(e) => {
                debug!(%id, error = %e, "session torn down");
                self.teardown(id);
            }
        }
    }

    fn teardown(&mut self, id: SessionId) {
        if let Some(conn) = self.sessions.remove(&id) {
            debug!(%id, addr = %conn.addr, "session removed");
        }
    }
}

/// One non-blocking read into the session's frame accumulator.
fn read_step(conn: &mut Conn) -> Result<Flow, ServerError> {
    let mut buf = [0u8; 4096];
    match conn.stream.try_read(&mut buf) {
        Ok(0) => {
            if conn.session.mid_frame() {
                Err(ProtocolError::ConnectionClosed.into())
            } else {
                // Orderly close between commands.
                Ok(Flow::Quit)
            }
        }
        Ok(n) => {
            conn.session.feed(&buf[..n]);
            conn.session.pump()?;
            Ok(Flow::Continue)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Flow::Continue),
        Err(e) => Err(e.into()),
    }
}

/// Dispatches the pending command now that the socket is writable.
async fn dispatch_step(conn: &mut Conn, ctx: &ServerContext) -> Result<Flow, ServerError> {
    let Some(parsed) = conn.session.take_pending() else {
        return Ok(Flow::Continue);
    };
    let mut sink = NonBlockingSink::new(&conn.stream);
    let flow = session::dispatch(parsed, ctx, &mut sink).await?;
    // Commands already buffered behind this one run before the session
    // re-enters the readiness wait.
    conn.session.pump()?;
    Ok(flow)
}
