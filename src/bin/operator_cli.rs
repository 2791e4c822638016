//! Operator console: polls the proposed-state debug artifact, signs the
//! active `seq` with the loaded operator key, and sends a COMMIT frame back
//! to the aggregator. Grounded in `original_source/operator/operator_cli.py`,
//! with the PyQt5 `operator_ui.py`'s deadman timer carried over as an
//! optional `--commit-window-ms` flag (unset by default, since the
//! reference aggregator itself imposes no commit-window deadline).

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use ed25519_dalek::{Signer, SigningKey};
use latticectl::config::Config;
use latticectl::frames::{CommitFrame, Frame};
use serde::Deserialize;
use tokio::net::UdpSocket;
use tracing::{info, warn};

const CONFIG_PATH: &str = "config/app_config.yaml";

/// Sign and forward proposed states as COMMIT frames.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the operator's secret key hex file.
    #[arg(long, default_value = "operator.sk")]
    secret_key_path: String,

    /// Optional local deadline (ms) after a proposal appears before this
    /// console gives up waiting and logs a `CommitWindowExpired` warning.
    /// Unset by default: the reference aggregator never times out PROPOSED.
    #[arg(long)]
    commit_window_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ProposedStateFile {
    seq: u64,
    #[allow(dead_code)]
    x: Vec<i32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "operator_cli=info".into()))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = Config::load(CONFIG_PATH)?;

    let sk_hex = std::fs::read_to_string(&args.secret_key_path)?;
    let sk_bytes: [u8; 32] = hex::decode(sk_hex.trim())?
        .try_into()
        .map_err(|_| anyhow::anyhow!("operator secret key must be 32 bytes"))?;
    let signing_key = SigningKey::from_bytes(&sk_bytes);
    let pk_hex = hex::encode(signing_key.verifying_key().to_bytes());

    let agg_addr: SocketAddr =
        format!("{}:{}", cfg.transport.bind_host, cfg.transport.bind_port).parse()?;
    let socket = UdpSocket::bind("127.0.0.1:0").await?;

    info!("operator console waiting for proposed states");
    let proposed_path = PathBuf::from(&cfg.proposed_state_path);
    let mut last_seq: Option<u64> = None;
    let mut seen_since: Option<Instant> = None;

    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = match read_proposed_state(&proposed_path) {
            Some(s) => s,
            None => continue,
        };

        if last_seq == Some(state.seq) {
            if let (Some(window), Some(since)) = (args.commit_window_ms, seen_since) {
                if since.elapsed() > Duration::from_millis(window) {
                    warn!(seq = state.seq, "commit window expired, giving up on this proposal");
                    last_seq = Some(state.seq);
                    seen_since = None;
                }
            }
            continue;
        }

        seen_since = Some(Instant::now());
        info!(seq = state.seq, "signing and committing proposed state");

        let msg = state.seq.to_string().into_bytes();
        let sig = signing_key.sign(&msg);

        let frame = Frame::Commit(CommitFrame { seq: state.seq, sig: sig.to_bytes().to_vec(), pk: pk_hex.clone() });
        match latticectl::frames::encode(&frame) {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, agg_addr).await {
                    warn!(error = %e, "failed to send COMMIT");
                } else {
                    last_seq = Some(state.seq);
                    seen_since = None;
                }
            }
            Err(e) => warn!(error = %e, "failed to encode COMMIT"),
        }
    }
}

fn read_proposed_state(path: &PathBuf) -> Option<ProposedStateFile> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}
