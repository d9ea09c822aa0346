//! LumenKV load generator.
//!
//! Opens `--clients` TCP connections to a running `lumen-server`, spreads `--ops` total
//! operations across them, and reports throughput and latency percentiles once every
//! connection has finished its share. The operation mix is a GET/SET coin flip weighted by
//! `--ratio-get` against a fixed pool of 1000 keys, mirroring a typical read-heavy cache
//! workload.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use hdrhistogram::Histogram;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use lumen_core::protocol::{
    encode_request, finish_array_response, finish_value_response, parse_response_header,
    ParsedResponseHeader, Request, Response,
};

const KEY_POOL_SIZE: usize = 1000;

#[derive(Debug, Parser)]
#[command(name = "lumen-bench", about = "Load generator for LumenKV")]
struct Args {
    /// Server address to connect to.
    #[arg(long, default_value = "127.0.0.1:7379")]
    addr: SocketAddr,

    /// Number of concurrent connections.
    #[arg(long, default_value_t = 10)]
    clients: usize,

    /// Total operations spread across all connections.
    #[arg(long, default_value_t = 10_000)]
    ops: usize,

    /// Fraction of operations that are GET rather than SET, in [0.0, 1.0].
    #[arg(long = "ratio-get", default_value_t = 0.8)]
    ratio_get: f64,

    /// Value size in bytes for SET operations.
    #[arg(long = "value-size", default_value_t = 128)]
    value_size: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.clients == 0 {
        anyhow::bail!("--clients must be > 0");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let keys: Vec<String> = (0..KEY_POOL_SIZE).map(|i| format!("key:{i}")).collect();
    let value = vec![b'x'; args.value_size];
    let ops_done = Arc::new(AtomicI64::new(0));
    let (lat_tx, mut lat_rx) = mpsc::unbounded_channel::<Duration>();

    let start = Instant::now();
    let mut workers = Vec::with_capacity(args.clients);
    for worker_id in 0..args.clients {
        let addr = args.addr;
        let keys = keys.clone();
        let value = value.clone();
        let ops_done = ops_done.clone();
        let lat_tx = lat_tx.clone();
        let total_ops = args.ops as i64;
        let ratio_get = args.ratio_get;

        workers.push(tokio::spawn(async move {
            if let Err(e) = worker_loop(
                worker_id, addr, &keys, &value, ratio_get, total_ops, ops_done, lat_tx,
            )
            .await
            {
                eprintln!("worker {worker_id} exited early: {e}");
            }
        }));
    }
    drop(lat_tx);

    for worker in workers {
        let _ = worker.await;
    }

    let elapsed = start.elapsed();
    let total_ops = ops_done.load(Ordering::Relaxed).min(args.ops as i64);

    let mut hist = Histogram::<u64>::new(3)?;
    while let Some(latency) = lat_rx.recv().await {
        hist.record(latency.as_micros() as u64)?;
    }

    println!("Total ops: {total_ops}");
    println!("Elapsed: {elapsed:?}");
    println!("Ops/sec: {:.2}", total_ops as f64 / elapsed.as_secs_f64());
    if hist.len() == 0 {
        println!("No latency samples");
    } else {
        println!("p50: {} us", hist.value_at_quantile(0.50));
        println!("p95: {} us", hist.value_at_quantile(0.95));
        println!("p99: {} us", hist.value_at_quantile(0.99));
    }

    Ok(())
}

/// One connection's share of the work: claim indices from the shared counter until the total
/// op budget is exhausted, sending a GET or SET each time depending on the ratio.
#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    addr: SocketAddr,
    keys: &[String],
    value: &[u8],
    ratio_get: f64,
    total_ops: i64,
    ops_done: Arc<AtomicI64>,
    lat_tx: mpsc::UnboundedSender<Duration>,
) -> anyhow::Result<()> {
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut rng = StdRng::seed_from_u64(worker_id as u64 ^ 0x5eed_5eed);

    loop {
        let idx = ops_done.fetch_add(1, Ordering::Relaxed);
        if idx >= total_ops {
            break;
        }

        let key = keys[rng.gen_range(0..keys.len())].clone();
        let is_get = rng.gen_bool(ratio_get.clamp(0.0, 1.0));
        let request = if is_get {
            Request::Get {
                key: key.into_bytes(),
            }
        } else {
            Request::Set {
                key: key.into_bytes(),
                value: value.to_vec(),
            }
        };

        let op_start = Instant::now();
        write_half.write_all(&encode_request(&request)).await?;
        write_half.flush().await?;
        if let Response::Err(msg) = read_response(&mut reader).await? {
            anyhow::bail!("server returned an error: {msg}");
        }
        let _ = lat_tx.send(op_start.elapsed());
    }

    Ok(())
}

/// Read one complete response off the wire, sharing `lumen_core`'s response grammar with the
/// server rather than re-parsing `VALUE`/`ARRAY` headers by hand.
///
/// Takes the caller's `BufReader` directly (not a fresh wrapper) so bytes the kernel handed
/// over ahead of this response — the start of the next one — stay buffered across calls.
async fn read_response<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> anyhow::Result<Response> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        anyhow::bail!("connection closed while awaiting response");
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);

    match parse_response_header(trimmed)? {
        ParsedResponseHeader::Complete(resp) => Ok(resp),
        ParsedResponseHeader::NeedsValue(len) => {
            let mut buf = vec![0u8; len + 1]; // payload + trailing newline
            reader.read_exact(&mut buf).await?;
            buf.truncate(len);
            Ok(finish_value_response(buf))
        }
        ParsedResponseHeader::NeedsArrayItems(count) => {
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let mut item = String::new();
                reader.read_line(&mut item).await?;
                items.push(item.trim_end_matches(['\n', '\r']).to_string());
            }
            Ok(finish_array_response(items))
        }
    }
}
