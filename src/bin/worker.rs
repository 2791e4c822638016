//! Worker collaborator: binds one UDP port, answers TASK frames with the
//! real `M·x` row-block computation. Grounded in
//! `original_source/worker/worker.py`, with the placeholder result vector
//! replaced by the genuine fixed-point matvec.

#![forbid(unsafe_code)]

use clap::Parser;
use latticectl::fixed_point::matvec;
use latticectl::frames::{decode, encode, Frame, ResultFrame, TaskFrame};
use rand::Rng;
use tokio::net::UdpSocket;
use tracing::{info, warn};

/// Simulated worker: computes coded row-block results for the aggregator.
#[derive(Parser, Debug)]
struct Args {
    /// UDP port to bind on 127.0.0.1.
    port: u16,

    /// Minimum processing jitter, milliseconds.
    #[arg(long, default_value_t = 5)]
    jitter_min_ms: u64,

    /// Maximum processing jitter, milliseconds.
    #[arg(long, default_value_t = 30)]
    jitter_max_ms: u64,

    /// Probability in `[0, 1]` of silently dropping a received TASK.
    #[arg(long, default_value_t = 0.1)]
    drop_prob: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "worker=info".into()))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let addr = format!("127.0.0.1:{}", args.port);
    let socket = std::sync::Arc::new(UdpSocket::bind(&addr).await?);
    info!(%addr, "worker listening");

    let mut buf = vec![0u8; 65_535];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;

        if rand::thread_rng().gen_bool(args.drop_prob.clamp(0.0, 1.0)) {
            continue;
        }

        let frame = match decode(&buf[..len]) {
            Ok(Frame::Task(task)) => task,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "dropping malformed datagram");
                continue;
            }
        };

        let socket = socket.clone();
        let jitter_min = args.jitter_min_ms;
        let jitter_max = args.jitter_max_ms;
        let port = args.port;
        tokio::spawn(async move {
            process_task(socket, task, from, jitter_min, jitter_max, port).await;
        });
    }
}

async fn process_task(
    socket: std::sync::Arc<UdpSocket>,
    task: TaskFrame,
    from: std::net::SocketAddr,
    jitter_min_ms: u64,
    jitter_max_ms: u64,
    worker_id: u16,
) {
    let jitter = rand::thread_rng().gen_range(jitter_min_ms..=jitter_max_ms.max(jitter_min_ms));
    tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;

    let block = match &task.m {
        Some(m) => m,
        None => {
            warn!(seq = task.seq, tid = task.tid, "TASK missing coded block, dropping");
            return;
        }
    };
    let y = matvec(block, &task.x);

    let response = Frame::Result(ResultFrame {
        seq: task.seq,
        tid: task.tid,
        w: worker_id as u32,
        y,
        c: task.c,
        ts: None,
    });
    match encode(&response) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, from).await {
                warn!(error = %e, "failed to send result");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode result"),
    }
}
