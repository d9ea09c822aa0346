//! LumenKV — TCP server entry point.
//!
//! Configuration comes from CLI flags (or their matching env vars):
//!   --data-dir  / LUMEN_DATA_DIR  – directory for the WAL     (default: ./data)
//!   --addr      / LUMEN_ADDR      – host:port to listen on    (default: 127.0.0.1:7379)
//!   --fsync     / LUMEN_FSYNC     – fsync every WAL append    (default: false)
//!   RUST_LOG                      – tracing filter            (default: info)

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod service;

use lumen_core::Engine;

#[derive(Debug, Parser)]
#[command(name = "lumen-server", about = "LumenKV — a durable, TTL-aware key-value server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "LUMEN_ADDR", default_value = "127.0.0.1:7379")]
    addr: SocketAddr,

    /// Directory holding the write-ahead log.
    #[arg(long, env = "LUMEN_DATA_DIR", default_value = "./data")]
    data_dir: String,

    /// fsync the WAL after every append (slower, but survives an OS crash, not just a
    /// process crash).
    #[arg(long, env = "LUMEN_FSYNC", default_value_t = false)]
    fsync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lumen_server=info,lumen_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();

    let engine = Engine::open(&args.data_dir, args.fsync)
        .context("failed to open LumenKV storage engine")?;

    let listener = TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;

    info!(addr = %args.addr, data_dir = %args.data_dir, fsync = args.fsync, "LumenKV listening");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let engine = engine.clone();
        tokio::spawn(async move {
            service::handle_connection(socket, peer, engine).await;
        });
    }
}
