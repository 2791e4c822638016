//! TWAMP-lite round-trip-time probe: measures echo latency against a
//! worker-cohort port before an operator sizes `cycle_deadline_ms`.
//! Grounded in `original_source/aggregator/twamp.py`, with the client side
//! corrected to actually await the server's echo (the Python reference
//! slept a fixed interval instead of measuring a real round trip).

#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration, Instant};

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Echo every received datagram back to its sender.
    Server {
        #[arg(long, default_value_t = 9000)]
        port: u16,
    },
    /// Send probes and report latency statistics.
    Client {
        #[arg(long, default_value = "127.0.0.1")]
        target: String,
        #[arg(long, default_value_t = 9000)]
        port: u16,
        #[arg(long, default_value_t = 200)]
        samples: usize,
        #[arg(long)]
        outfile: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.mode {
        Mode::Server { port } => run_server(port).await,
        Mode::Client { target, port, samples, outfile } => {
            run_client(&target, port, samples, outfile.as_deref()).await
        }
    }
}

async fn run_server(port: u16) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    println!("TWAMP server on {port}");
    let mut buf = vec![0u8; 4096];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        socket.send_to(&buf[..len], from).await?;
    }
}

async fn run_client(
    target: &str,
    port: u16,
    samples: usize,
    outfile: Option<&str>,
) -> anyhow::Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((target, port)).await?;

    let mut latencies_ms: Vec<(usize, f64)> = Vec::with_capacity(samples);
    for i in 0..samples {
        let payload = format!("twamp-{i}").into_bytes();
        let t0 = Instant::now();
        socket.send(&payload).await?;
        let mut buf = [0u8; 64];
        match timeout(Duration::from_millis(500), socket.recv(&mut buf)).await {
            Ok(Ok(_)) => {
                let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
                latencies_ms.push((i, elapsed_ms));
            }
            _ => eprintln!("sample {i}: timed out"),
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    if let Some(path) = outfile {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(["sample", "latency_ms"])?;
        for (i, ms) in &latencies_ms {
            wtr.write_record([i.to_string(), format!("{ms:.4}")])?;
        }
        wtr.flush()?;
    }

    if !latencies_ms.is_empty() {
        let mean = latencies_ms.iter().map(|(_, ms)| ms).sum::<f64>() / latencies_ms.len() as f64;
        println!("TWAMP results: mean={mean:.2} ms ({} samples)", latencies_ms.len());
    } else {
        println!("TWAMP results: no samples received");
    }
    Ok(())
}
