//! Command-line front end for the barge file-transfer service.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::net::{TcpListener, lookup_host};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use barge_catalog::Catalog;
use barge_client::{DownloadRequest, ProgressEvent, download, fetch_listing};
use barge_datagram::{DatagramConfig, DatagramServer};
use barge_server::{Reactor, ServerContext, serve};

/// Default control port, one off the classic file-transfer port.
const DEFAULT_PORT: u16 = 2121;

/// Default port for the datagram variant.
const DEFAULT_DGRAM_PORT: u16 = 2122;

#[derive(Parser)]
#[command(name = "barge", version, about = "Chunked file-transfer service")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the framed TCP server.
    Serve {
        #[arg(long, default_value_t = default_host())]
        host: String,

        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Directory the served files live in.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// JSON permission file naming the transferable files.
        #[arg(long, default_value = "file_permission.json")]
        permissions: PathBuf,

        /// Multiplex every connection from one task instead of spawning
        /// one task per connection.
        #[arg(long)]
        reactor: bool,
    },

    /// Run the best-effort datagram server.
    ServeDgram {
        #[arg(long, default_value_t = default_host())]
        host: String,

        #[arg(long, default_value_t = DEFAULT_DGRAM_PORT)]
        port: u16,

        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        #[arg(long, default_value = "file_permission.json")]
        permissions: PathBuf,
    },

    /// Print the server's catalog.
    List {
        #[arg(long, default_value_t = default_host())]
        host: String,

        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Download a file over parallel range connections.
    Fetch {
        /// File name as listed by the server.
        name: String,

        #[arg(long, default_value_t = default_host())]
        host: String,

        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        #[arg(long, default_value_t = barge_client::DEFAULT_WORKERS)]
        workers: usize,

        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Save under this name instead of the server-side one.
        #[arg(long)]
        rename: Option<String>,
    },

    /// Download a file from the best-effort datagram server.
    FetchDgram {
        /// File name on the server.
        name: String,

        /// Size in bytes (the datagram variant has no listing exchange).
        size: u64,

        #[arg(long, default_value_t = default_host())]
        host: String,

        #[arg(long, default_value_t = DEFAULT_DGRAM_PORT)]
        port: u16,

        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

/// The local hostname, the same way the reference resolves its address.
fn default_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    lookup_host((host, port))
        .await?
        .next()
        .with_context(|| format!("no address found for {host}:{port}"))
}

/// Cancelled when the process receives ctrl-c.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            trigger.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Cmd::Serve {
            host,
            port,
            data_dir,
            permissions,
            reactor,
        } => {
            let addr = resolve(&host, port).await?;
            let catalog = Catalog::load(&permissions, &data_dir)
                .with_context(|| format!("loading {}", permissions.display()))?;
            info!(files = catalog.len(), "catalog loaded");
            let ctx = ServerContext::new(catalog, data_dir);
            let cancel = shutdown_token();

            if reactor {
                Reactor::bind(addr, ctx).await?.run(cancel).await?;
            } else {
                let listener = TcpListener::bind(addr).await?;
                serve(listener, ctx, cancel).await?;
            }
        }

        Cmd::ServeDgram {
            host,
            port,
            data_dir,
            permissions,
        } => {
            let addr = resolve(&host, port).await?;
            let catalog = Catalog::load(&permissions, &data_dir)
                .with_context(|| format!("loading {}", permissions.display()))?;
            info!(files = catalog.len(), "catalog loaded");
            let server = DatagramServer::bind(addr, Arc::new(catalog), data_dir).await?;
            server.run(shutdown_token()).await?;
        }

        Cmd::List { host, port } => {
            let addr = resolve(&host, port).await?;
            let files = fetch_listing(addr).await?;
            for (name, size) in &files {
                println!("{name}: {size} Bytes");
            }
        }

        Cmd::Fetch {
            name,
            host,
            port,
            workers,
            output_dir,
            rename,
        } => {
            let addr = resolve(&host, port).await?;
            let files = fetch_listing(addr).await?;
            let size = *files
                .get(&name)
                .with_context(|| format!("server does not list {name}"))?;

            let mut req = DownloadRequest::new(&name, size, output_dir);
            req.workers = workers;
            req.rename = rename;

            let (tx, rx) = mpsc::channel(256);
            let bar = tokio::spawn(render_progress(rx, size, workers));
            let path = download(addr, &req, Some(tx)).await?;
            let _ = bar.await;
            println!("saved to {}", path.display());
        }

        Cmd::FetchDgram {
            name,
            size,
            host,
            port,
            output_dir,
        } => {
            let addr = resolve(&host, port).await?;
            let path = barge_datagram::download(
                addr,
                &name,
                size,
                &output_dir,
                DatagramConfig::default(),
            )
            .await?;
            println!("saved to {}", path.display());
        }
    }
    Ok(())
}

/// Renders one overall bar from the per-range progress events.
async fn render_progress(
    mut rx: mpsc::Receiver<ProgressEvent>,
    total: u64,
    workers: usize,
) -> anyhow::Result<()> {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")?
            .progress_chars("=>-"),
    );

    let mut per_range = vec![0u64; workers.max(1)];
    while let Some(event) = rx.recv().await {
        if let Some(slot) = per_range.get_mut(event.range) {
            *slot = event.received;
        }
        bar.set_position(per_range.iter().sum());
    }
    bar.finish_with_message("done");
    Ok(())
}
