//! Aggregator: binds the cycle engine to a config, matrix data document, and
//! authorized-key set, then drives cycles back to back until a shutdown
//! signal arrives. No CLI flags — config and matrix paths are fixed,
//! matching the reference aggregator's zero-argument invocation.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;

use latticectl::coding::RatelessCoder;
use latticectl::config::Config;
use latticectl::engine::Engine;
use latticectl::error::StartupError;
use latticectl::matrix::MatrixData;
use latticectl::metrics::MetricsWriter;
use latticectl::poa::PoaGate;
use latticectl::transport::Transport;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

const CONFIG_PATH: &str = "config/app_config.yaml";
const MATRIX_PATH: &str = "config/matrix_data.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "aggregator=info".into()))
        .with_target(false)
        .compact()
        .init();

    match run().await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "aggregator exiting on startup error");
            Err(e.into())
        }
    }
}

async fn run() -> Result<(), StartupError> {
    let cfg = Config::load(CONFIG_PATH)?;
    let mat = MatrixData::load(MATRIX_PATH)?;
    let poa = PoaGate::load(&cfg.authorized_keys_path)?;

    let bind_addr: SocketAddr =
        format!("{}:{}", cfg.transport.bind_host, cfg.transport.bind_port)
            .parse()
            .map_err(|_| StartupError::Bind {
                addr: format!("{}:{}", cfg.transport.bind_host, cfg.transport.bind_port),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad bind address"),
            })?;
    let worker_host: std::net::IpAddr = cfg
        .transport
        .bind_host
        .parse()
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

    let transport =
        Transport::bind(bind_addr, worker_host, cfg.transport.worker_port_start, cfg.system.n)
            .await
            .map_err(|e| StartupError::Bind { addr: bind_addr.to_string(), source: to_io_error(e) })?;

    info!(addr = %bind_addr, n = cfg.system.n, r = cfg.system.r, "aggregator bound");

    let coder = RatelessCoder::new(&mat.a, cfg.system.r);
    let rng = match cfg.coeff_rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let metrics = MetricsWriter::new(&cfg.metrics_path)?;

    let (mut engine, _proposed_rx) = Engine::new(
        transport,
        coder,
        poa,
        rng,
        metrics,
        PathBuf::from(&cfg.proposed_state_path),
        mat.x0_fixed,
        mat.b_fixed,
        mat.u_fixed,
        cfg.system.r,
        std::time::Duration::from_millis(cfg.system.cycle_deadline_ms),
    );

    loop {
        tokio::select! {
            outcome = engine.run_cycle() => {
                info!(?outcome, "cycle finished");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, exiting at cycle boundary");
                break;
            }
        }
    }

    Ok(())
}

fn to_io_error(e: latticectl::transport::TransportError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}
