//! Best-effort datagram server.
//!
//! One socket, one loop: parse a chunk request, check it against the
//! catalog, read the range from disk, answer in a single datagram. A
//! malformed or refused request gets an error datagram; nothing a peer
//! sends can take the loop down.

use std::io;
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use barge_catalog::{Catalog, RangeError};

use crate::DatagramError;
use crate::wire::{ChunkRequest, ChunkResponse, MAX_CHUNK_LEN};

/// The datagram transfer server.
pub struct DatagramServer {
    socket: UdpSocket,
    catalog: Arc<Catalog>,
    data_dir: PathBuf,
}

impl DatagramServer {
    /// Binds the socket.
    pub async fn bind(
        addr: SocketAddr,
        catalog: Arc<Catalog>,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self, DatagramError> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "datagram server listening");
        Ok(Self {
            socket,
            catalog,
            data_dir: data_dir.into(),
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, DatagramError> {
        Ok(self.socket.local_addr()?)
    }

    /// Serves requests until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DatagramError> {
        let mut buf = vec![0u8; 2048];
        loop {
            let (n, peer) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("datagram server shutting down");
                    return Ok(());
                }
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "recv failed");
                        continue;
                    }
                },
            };

            let response = self.answer(&buf[..n]).await;
            if let Err(e) = self.socket.send_to(&response.encode(), peer).await {
                warn!(%peer, error = %e, "send failed");
            }
        }
    }

    /// Builds the response for one request datagram.
    async fn answer(&self, datagram: &[u8]) -> ChunkResponse {
        let Some(request) = ChunkRequest::parse(datagram) else {
            debug!("rejecting malformed request");
            return ChunkResponse::Error {
                chunk_id: 0,
                message: "501 Invalid request".into(),
            };
        };

        if request.length as usize > MAX_CHUNK_LEN {
            return error(&request, "501 Chunk exceeds datagram limit".into());
        }

        // Catalog check before any disk access; an empty catalog permits
        // nothing, same policy as the stream server.
        match self
            .catalog
            .resolve_range(&request.name, Some(request.offset), Some(request.length))
        {
            Err(RangeError::NotPermitted(_)) => {
                error(&request, format!("550 File unavailable: {}", request.name))
            }
            Err(RangeError::OutOfBounds(_)) => error(
                &request,
                format!("550 Range not satisfiable: {}", request.name),
            ),
            Ok(range) => match self.read_range(&request.name, range.offset, range.length).await {
                Ok(payload) => {
                    debug!(
                        name = %request.name,
                        chunk = request.chunk_id,
                        bytes = payload.len(),
                        "chunk served"
                    );
                    ChunkResponse::Data {
                        chunk_id: request.chunk_id,
                        payload,
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(name = %request.name, "catalog file missing on disk");
                    error(&request, format!("550 File missing: {}", request.name))
                }
                Err(e) => {
                    warn!(name = %request.name, error = %e, "chunk read failed");
                    error(&request, format!("550 File missing: {}", request.name))
                }
            },
        }
    }

    async fn read_range(&self, name: &str, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        let mut file = File::open(self.data_dir.join(name)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut payload = vec![0u8; length as usize];
        file.read_exact(&mut payload).await?;
        Ok(payload)
    }
}

fn error(request: &ChunkRequest, message: String) -> ChunkResponse {
    ChunkResponse::Error {
        chunk_id: request.chunk_id,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn server() -> (TempDir, DatagramServer) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"0123456789").unwrap();
        let catalog = Arc::new(Catalog::from_entries([("a.bin".to_string(), 10)]));
        let server = DatagramServer::bind("127.0.0.1:0".parse().unwrap(), catalog, dir.path())
            .await
            .unwrap();
        (dir, server)
    }

    #[tokio::test]
    async fn answers_a_valid_chunk_request() {
        let (_dir, server) = server().await;
        let request = ChunkRequest {
            name: "a.bin".into(),
            chunk_id: 1,
            offset: 3,
            length: 4,
        };
        let response = server.answer(&request.encode()).await;
        assert_eq!(
            response,
            ChunkResponse::Data {
                chunk_id: 1,
                payload: b"3456".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn refuses_uncataloged_names() {
        let (_dir, server) = server().await;
        let request = ChunkRequest {
            name: "secret.bin".into(),
            chunk_id: 0,
            offset: 0,
            length: 4,
        };
        let response = server.answer(&request.encode()).await;
        assert_eq!(
            response,
            ChunkResponse::Error {
                chunk_id: 0,
                message: "550 File unavailable: secret.bin".into(),
            }
        );
    }

    #[tokio::test]
    async fn refuses_out_of_bounds_ranges() {
        let (_dir, server) = server().await;
        let request = ChunkRequest {
            name: "a.bin".into(),
            chunk_id: 2,
            offset: 8,
            length: 5,
        };
        let response = server.answer(&request.encode()).await;
        assert_eq!(
            response,
            ChunkResponse::Error {
                chunk_id: 2,
                message: "550 Range not satisfiable: a.bin".into(),
            }
        );
    }

    #[tokio::test]
    async fn refuses_oversized_chunks() {
        let (_dir, server) = server().await;
        let request = ChunkRequest {
            name: "a.bin".into(),
            chunk_id: 0,
            offset: 0,
            length: (MAX_CHUNK_LEN + 1) as u64,
        };
        let response = server.answer(&request.encode()).await;
        match response {
            ChunkResponse::Error { message, .. } => {
                assert!(message.starts_with("501"))
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_garbage_without_dying() {
        let (_dir, server) = server().await;
        let response = server.answer(b"not a request").await;
        assert_eq!(
            response,
            ChunkResponse::Error {
                chunk_id: 0,
                message: "501 Invalid request".into(),
            }
        );
    }
}
