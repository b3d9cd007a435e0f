//! The `LIST` exchange.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tracing::debug;

use barge_protocol::{Command, decode_listing, frame};

use crate::ClientError;
use crate::exchange::{expect_frame, expect_status, quit};

/// Fetches the server's catalog (`name -> size`).
pub async fn fetch_listing(addr: SocketAddr) -> Result<BTreeMap<String, u64>, ClientError> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);

    frame::write_frame(&mut writer, &Command::List.to_payload()).await?;
    writer.flush().await?;

    let status = expect_status(&mut reader).await?;
    if !status.proceed() {
        return Err(ClientError::Refused(status.as_str().to_string()));
    }
    let payload = expect_frame(&mut reader).await?;
    let files = decode_listing(&payload)?;
    // "226 File permissions sent" is informational only.
    let _ = expect_status(&mut reader).await?;

    quit(&mut reader, &mut writer).await?;
    debug!(files = files.len(), "listing received");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use barge_catalog::Catalog;
    use barge_server::{ServerContext, serve};
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    async fn start(catalog: Catalog) -> (TempDir, SocketAddr, CancellationToken) {
        let dir = TempDir::new().unwrap();
        let ctx = ServerContext::new(catalog, dir.path());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let serve_cancel = cancel.clone();
        tokio::spawn(async move { serve(listener, ctx, serve_cancel).await });
        (dir, addr, cancel)
    }

    #[tokio::test]
    async fn listing_roundtrip() {
        let catalog = Catalog::from_entries([
            ("a.bin".to_string(), 10),
            ("b.bin".to_string(), 20),
        ]);
        let (_dir, addr, cancel) = start(catalog).await;

        let files = fetch_listing(addr).await.unwrap();
        assert_eq!(files.get("a.bin"), Some(&10));
        assert_eq!(files.get("b.bin"), Some(&20));

        cancel.cancel();
    }

    #[tokio::test]
    async fn empty_catalog_is_refused() {
        let (_dir, addr, cancel) = start(Catalog::default()).await;

        let err = fetch_listing(addr).await.unwrap_err();
        match err {
            ClientError::Refused(line) => {
                assert_eq!(line, "550 File permissions unavailable")
            }
            other => panic!("expected Refused, got {other:?}"),
        }

        cancel.cancel();
    }
}
