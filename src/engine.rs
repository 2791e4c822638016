//! Cycle engine: the orchestrator that owns the propose/commit state
//! machine. Grounded in `original_source/aggregator/aggregator.py`'s
//! `Aggregator.run_cycle`/`handle_result`/`handle_commit`, rearchitected as
//! an owned struct with an explicit lifecycle instead of an
//! `asyncio.DatagramProtocol` with process-wide fields.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, info_span, warn};

use crate::coding::{CodedResult, DecodeError, RatelessCoder};
use crate::fixed_point::{matvec, saturate_i64};
use crate::frames::{Frame, ResultFrame, TaskFrame};
use crate::metrics::{CycleOutcomeTag, MetricsWriter};
use crate::poa::{commit_message, PoaGate};
use crate::transport::{Ingress, Transport};

/// The candidate next state materialized after decode, before commit.
#[derive(Debug, Clone, Serialize)]
pub struct ProposedState {
    pub seq: u64,
    pub x: Vec<i32>,
}

/// Why a cycle did not commit.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    DeadlineExceeded,
    Decode(DecodeError),
}

/// The terminal result of one `run_cycle` call.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Committed { seq: u64, x: Vec<i32> },
    Aborted { seq: u64, reason: AbortReason },
}

/// Engine-internal polling granularity for the deadline check, matching
/// the 5 ms tick named for the result-collection wait.
const POLL_GRANULARITY: Duration = Duration::from_millis(5);

pub struct Engine {
    transport: Transport,
    coder: RatelessCoder,
    poa: PoaGate,
    rng: StdRng,
    metrics: MetricsWriter,
    proposed_state_path: PathBuf,
    proposed_tx: watch::Sender<Option<ProposedState>>,

    x_curr: Vec<i32>,
    b_fixed: Vec<Vec<i32>>,
    u_fixed: Vec<i32>,
    seq: u64,
    r: usize,
    deadline: Duration,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Transport,
        coder: RatelessCoder,
        poa: PoaGate,
        rng: StdRng,
        metrics: MetricsWriter,
        proposed_state_path: PathBuf,
        x0_fixed: Vec<i32>,
        b_fixed: Vec<Vec<i32>>,
        u_fixed: Vec<i32>,
        r: usize,
        deadline: Duration,
    ) -> (Self, watch::Receiver<Option<ProposedState>>) {
        let (proposed_tx, proposed_rx) = watch::channel(None);
        let engine = Self {
            transport,
            coder,
            poa,
            rng,
            metrics,
            proposed_state_path,
            proposed_tx,
            x_curr: x0_fixed,
            b_fixed,
            u_fixed,
            seq: 0,
            r,
            deadline,
        };
        (engine, proposed_rx)
    }

    pub fn current_state(&self) -> &[i32] {
        &self.x_curr
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Run one full `IDLE -> DISPATCHED -> (PROPOSED -> COMMITTED) | ABORTED`
    /// cycle to completion.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.seq += 1;
        let active_seq = self.seq;
        let span = info_span!("cycle", seq = active_seq);
        let _enter = span.enter();
        let cycle_start = Instant::now();

        info!(workers = self.transport.worker_count(), "dispatching tasks");
        for tid in 0..self.transport.worker_count() {
            let task = self.coder.generate_task(&mut self.rng);
            let frame = Frame::Task(TaskFrame {
                seq: active_seq,
                tid: tid as u32,
                c: task.coeffs,
                x: self.x_curr.clone(),
                ts: now_nanos(),
                m: Some(task.coded_block),
            });
            let addr = self.transport.worker_addr(tid);
            if let Err(e) = self.transport.send(&frame, addr).await {
                warn!(error = %e, tid, "failed to send task to worker");
            }
        }

        let mut results: Vec<CodedResult> = Vec::new();
        let deadline_at = cycle_start + self.deadline;

        let abort_reason = loop {
            if results.len() >= self.r {
                break None;
            }
            let now = Instant::now();
            if now >= deadline_at {
                break Some(AbortReason::DeadlineExceeded);
            }
            let remaining = deadline_at - now;
            let tick = remaining.min(POLL_GRANULARITY);

            tokio::select! {
                ingress = self.transport.recv() => {
                    self.handle_dispatched_ingress(ingress, active_seq, &mut results);
                }
                _ = sleep(tick) => {}
            }
        };

        if let Some(reason) = abort_reason {
            warn!("cycle timed out before R results arrived");
            let elapsed_ms = cycle_start.elapsed().as_millis() as u64;
            self.record_metrics(active_seq, CycleOutcomeTag::AbortedDeadline, elapsed_ms, results.len());
            return CycleOutcome::Aborted { seq: active_seq, reason };
        }

        let ax_next = match self.coder.decode(&results) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "decode failed, aborting cycle");
                let elapsed_ms = cycle_start.elapsed().as_millis() as u64;
                self.record_metrics(active_seq, CycleOutcomeTag::AbortedDecode, elapsed_ms, results.len());
                return CycleOutcome::Aborted { seq: active_seq, reason: AbortReason::Decode(e) };
            }
        };

        let bu = matvec(&self.b_fixed, &self.u_fixed);
        let candidate: Vec<i32> = ax_next
            .iter()
            .zip(bu.iter())
            .map(|(&a, &b)| saturate_i64(a + b as i64))
            .collect();

        info!(?candidate, "cycle proposed, awaiting commit");
        self.publish_proposal(active_seq, &candidate);

        loop {
            let ingress = self.transport.recv().await;
            match ingress {
                Ok(Ingress::Frame(Frame::Commit(commit), _from)) => {
                    if commit.seq != active_seq {
                        warn!(commit_seq = commit.seq, active_seq, "stale COMMIT discarded");
                        continue;
                    }
                    if commit.validate().is_err() {
                        warn!("malformed COMMIT frame discarded");
                        continue;
                    }
                    let msg = commit_message(active_seq);
                    if self.poa.verify(&msg, &commit.sig, &commit.pk) {
                        self.x_curr = candidate.clone();
                        let elapsed_ms = cycle_start.elapsed().as_millis() as u64;
                        info!(t_cycle_ms = elapsed_ms, "cycle committed");
                        self.record_metrics(
                            active_seq,
                            CycleOutcomeTag::Committed,
                            elapsed_ms,
                            results.len(),
                        );
                        return CycleOutcome::Committed { seq: active_seq, x: self.x_curr.clone() };
                    } else {
                        warn!("invalid COMMIT signature, remaining in PROPOSED");
                    }
                }
                Ok(Ingress::Frame(Frame::Result(rf), _from)) => {
                    if rf.seq != active_seq {
                        continue;
                    }
                    // Straggler arriving after decode; accepted but ignored.
                }
                Ok(Ingress::Frame(Frame::Task(_), _from)) => {}
                Ok(Ingress::Malformed(from, e)) => {
                    warn!(%from, error = %e, "malformed datagram dropped");
                }
                Err(e) => {
                    warn!(error = %e, "transport error while awaiting commit");
                }
            }
        }
    }

    fn handle_dispatched_ingress(
        &self,
        ingress: Result<Ingress, crate::transport::TransportError>,
        active_seq: u64,
        results: &mut Vec<CodedResult>,
    ) {
        match ingress {
            Ok(Ingress::Frame(Frame::Result(rf), _from)) => {
                self.accept_result(rf, active_seq, results);
            }
            Ok(Ingress::Frame(Frame::Commit(cf), _from)) => {
                if cf.seq != active_seq {
                    warn!(commit_seq = cf.seq, active_seq, "COMMIT before proposal discarded");
                }
                // A COMMIT for the active seq arriving before decode is
                // premature (nothing to verify against yet); drop it.
            }
            Ok(Ingress::Frame(Frame::Task(_), _from)) => {}
            Ok(Ingress::Malformed(from, e)) => {
                warn!(%from, error = %e, "malformed datagram dropped");
            }
            Err(e) => {
                warn!(error = %e, "transport error while collecting results");
            }
        }
    }

    fn accept_result(&self, rf: ResultFrame, active_seq: u64, results: &mut Vec<CodedResult>) {
        if rf.seq != active_seq {
            return;
        }
        results.push(CodedResult { coeffs: rf.c, values: rf.y });
    }

    fn publish_proposal(&mut self, seq: u64, x: &[i32]) {
        let proposed = ProposedState { seq, x: x.to_vec() };
        if let Err(e) = self.write_proposal_file(&proposed) {
            warn!(error = %e, "failed to write proposed-state debug artifact");
        }
        let _ = self.proposed_tx.send(Some(proposed));
    }

    fn write_proposal_file(&self, proposed: &ProposedState) -> std::io::Result<()> {
        let json = serde_json::to_vec(proposed)?;
        std::fs::write(&self.proposed_state_path, json)
    }

    fn record_metrics(&self, seq: u64, outcome: CycleOutcomeTag, t_cycle_ms: u64, result_count: usize) {
        if let Err(e) = self.metrics.record(seq, outcome, t_cycle_ms, result_count) {
            warn!(error = %e, "failed to write metrics row");
        }
    }
}

fn now_nanos() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicU16, Ordering};

    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::{OsRng, StdRng};
    use rand::SeedableRng;
    use tokio::net::UdpSocket;

    use super::*;
    use crate::fixed_point::{from_fixed, to_fixed};
    use crate::frames::{encode, CommitFrame};

    static NEXT_PORT_BASE: AtomicU16 = AtomicU16::new(19000);

    fn next_port_base(span: u16) -> u16 {
        NEXT_PORT_BASE.fetch_add(span + 1, Ordering::SeqCst)
    }

    fn identity(n: usize) -> Vec<Vec<f64>> {
        (0..n).map(|r| (0..n).map(|c| if r == c { 1.0 } else { 0.0 }).collect()).collect()
    }

    fn diag(n: usize, scale: f64) -> Vec<Vec<f64>> {
        (0..n).map(|r| (0..n).map(|c| if r == c { scale } else { 0.0 }).collect()).collect()
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "cycle-engine-test-{}-{}-{}",
            std::process::id(),
            name,
            next_port_base(0)
        ))
    }

    /// Spawns a stub worker on `addr` that answers every TASK with the real
    /// `M·x` computation, for the lifetime of the test (aborted on drop).
    fn spawn_stub_worker(addr: SocketAddr) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let socket = UdpSocket::bind(addr).await.expect("bind stub worker");
            let mut buf = vec![0u8; 65_535];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else { return };
                let Ok(Frame::Task(task)) = crate::frames::decode(&buf[..len]) else { continue };
                let block = task.m.as_ref().expect("task carries coded block");
                let y = matvec(block, &task.x);
                let response = Frame::Result(crate::frames::ResultFrame {
                    seq: task.seq,
                    tid: task.tid,
                    w: addr.port() as u32,
                    y,
                    c: task.c,
                    ts: None,
                });
                if let Ok(bytes) = encode(&response) {
                    let _ = socket.send_to(&bytes, from).await;
                }
            }
        })
    }

    struct Harness {
        engine: Engine,
        agg_addr: SocketAddr,
        signing_key: SigningKey,
        _workers: Vec<tokio::task::JoinHandle<()>>,
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_harness_with_matrices(
        n: usize,
        r: usize,
        deadline_ms: u64,
        responders: &[bool],
        a: Vec<Vec<f64>>,
        x0_fixed: Vec<i32>,
        b_fixed: Vec<Vec<i32>>,
        u_fixed: Vec<i32>,
    ) -> Harness {
        let port_base = next_port_base(n as u16 + 2);
        let agg_port = port_base;
        let worker_port_start = port_base + 1;

        let mut workers = Vec::new();
        for (i, &should_respond) in responders.iter().enumerate() {
            if should_respond {
                let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), worker_port_start + i as u16);
                workers.push(spawn_stub_worker(addr));
            }
        }

        let agg_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), agg_port);
        let transport = Transport::bind(agg_addr, IpAddr::V4(Ipv4Addr::LOCALHOST), worker_port_start, n)
            .await
            .expect("bind aggregator transport");

        let signing_key = SigningKey::generate(&mut OsRng);
        let poa = PoaGate::from_keys(vec![signing_key.verifying_key()]);
        let coder = RatelessCoder::new(&a, r);
        let rng = StdRng::seed_from_u64(1234);

        let metrics_path = temp_path("metrics.csv");
        let _ = std::fs::remove_file(&metrics_path);
        let metrics = MetricsWriter::new(&metrics_path).unwrap();
        let proposed_path = temp_path("proposed_state.json");

        let (engine, _rx) = Engine::new(
            transport,
            coder,
            poa,
            rng,
            metrics,
            proposed_path,
            x0_fixed,
            b_fixed,
            u_fixed,
            r,
            Duration::from_millis(deadline_ms),
        );

        Harness { engine, agg_addr, signing_key, _workers: workers }
    }

    async fn build_harness(n: usize, r: usize, deadline_ms: u64, responders: &[bool]) -> Harness {
        let a = identity(n);
        let x0_fixed: Vec<i32> = (0..n).map(|i| to_fixed(0.1 * (i as f64 + 1.0))).collect();
        let b_fixed = vec![vec![0i32]; n];
        let u_fixed = vec![0i32];
        build_harness_with_matrices(n, r, deadline_ms, responders, a, x0_fixed, b_fixed, u_fixed).await
    }

    /// Schedules a signed COMMIT for `seq` to be sent to the aggregator after a
    /// short delay, simulating the operator console reacting to a proposal.
    fn schedule_commit(agg_addr: SocketAddr, signing_key: &SigningKey, seq: u64) {
        schedule_commit_after(agg_addr, signing_key, seq, 50)
    }

    /// Like `schedule_commit`, but with an explicit delay so a test can
    /// interleave a bad COMMIT before a good one.
    fn schedule_commit_after(agg_addr: SocketAddr, signing_key: &SigningKey, seq: u64, delay_ms: u64) {
        let sk = SigningKey::from_bytes(&signing_key.to_bytes());
        tokio::spawn(async move {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let msg = commit_message(seq);
            let sig = sk.sign(&msg);
            let pk = hex::encode(sk.verifying_key().to_bytes());
            let frame = Frame::Commit(CommitFrame { seq, sig: sig.to_bytes().to_vec(), pk });
            let bytes = encode(&frame).unwrap();
            socket.send_to(&bytes, agg_addr).await.unwrap();
        });
    }

    #[tokio::test]
    async fn scenario_identity_decode_matches_seed_state() {
        let mut h = build_harness(4, 2, 2_000, &[true, true, true, true]).await;
        schedule_commit(h.agg_addr, &h.signing_key, 1);

        let outcome = h.engine.run_cycle().await;

        match outcome {
            CycleOutcome::Committed { seq, x } => {
                assert_eq!(seq, 1);
                for (i, &xi) in x.iter().enumerate() {
                    let expected = 0.1 * (i as f64 + 1.0);
                    assert!((from_fixed(xi) - expected).abs() < 1e-4);
                }
            }
            CycleOutcome::Aborted { reason, .. } => panic!("expected commit, got abort: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn scenario_one_straggler_still_commits_before_deadline() {
        let mut h = build_harness(4, 3, 2_000, &[true, true, true, false]).await;
        schedule_commit(h.agg_addr, &h.signing_key, 1);

        let start = std::time::Instant::now();
        let outcome = h.engine.run_cycle().await;
        assert!(start.elapsed() < Duration::from_millis(2_000));
        assert!(matches!(outcome, CycleOutcome::Committed { seq: 1, .. }));
    }

    #[tokio::test]
    async fn scenario_two_stragglers_aborts_on_deadline() {
        let mut h = build_harness(4, 3, 300, &[true, true, false, false]).await;

        let outcome = h.engine.run_cycle().await;
        match outcome {
            CycleOutcome::Aborted { seq, reason } => {
                assert_eq!(seq, 1);
                assert_eq!(reason, AbortReason::DeadlineExceeded);
            }
            CycleOutcome::Committed { .. } => panic!("expected abort on deadline"),
        }
        assert_eq!(
            h.engine.current_state(),
            &[to_fixed(0.1), to_fixed(0.2), to_fixed(0.3), to_fixed(0.4)]
        );
    }

    #[tokio::test]
    async fn scenario_two_consecutive_cycles_both_commit() {
        // A doubles state each cycle and B·u adds a fixed 0.05 offset, so this
        // scenario actually exercises the `Ax_next + Bu` saturating composition
        // step instead of trivially adding zero.
        let n = 2;
        let a = diag(n, 2.0);
        let x0_fixed: Vec<i32> = vec![to_fixed(0.1), to_fixed(0.1)];
        let b_fixed = vec![vec![to_fixed(0.05)], vec![to_fixed(0.05)]];
        let u_fixed = vec![to_fixed(1.0 - 2f64.powi(-31))];

        let mut h =
            build_harness_with_matrices(n, 2, 2_000, &[true, true], a, x0_fixed, b_fixed, u_fixed)
                .await;

        schedule_commit(h.agg_addr, &h.signing_key, 1);
        let outcome1 = h.engine.run_cycle().await;
        let x1 = match outcome1 {
            CycleOutcome::Committed { seq: 1, x } => x,
            other => panic!("expected commit at seq 1, got {other:?}"),
        };
        // Expected: A·x0 + B·u = 2*0.1 + 0.05*~1.0 ~= 0.25
        for &xi in &x1 {
            assert!((from_fixed(xi) - 0.25).abs() < 1e-3);
        }

        schedule_commit(h.agg_addr, &h.signing_key, 2);
        let outcome2 = h.engine.run_cycle().await;
        match outcome2 {
            CycleOutcome::Committed { seq: 2, x } => {
                // Expected: A·x1 + B·u = 2*0.25 + 0.05*~1.0 ~= 0.55
                for &xi in &x {
                    assert!((from_fixed(xi) - 0.55).abs() < 1e-3);
                }
            }
            other => panic!("expected commit at seq 2, got {other:?}"),
        }

        assert_eq!(h.engine.seq(), 2);
    }

    #[tokio::test]
    async fn scenario_commit_from_unauthorized_key_is_ignored() {
        let mut h = build_harness(4, 2, 2_000, &[true, true, true, true]).await;

        let impostor = SigningKey::generate(&mut OsRng);
        schedule_commit_after(h.agg_addr, &impostor, 1, 30);
        schedule_commit(h.agg_addr, &h.signing_key, 1);

        let outcome = h.engine.run_cycle().await;
        match outcome {
            CycleOutcome::Committed { seq, x } => {
                assert_eq!(seq, 1);
                for (i, &xi) in x.iter().enumerate() {
                    let expected = 0.1 * (i as f64 + 1.0);
                    assert!((from_fixed(xi) - expected).abs() < 1e-4);
                }
            }
            CycleOutcome::Aborted { reason, .. } => panic!("expected commit, got abort: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn scenario_commit_over_wrong_seq_is_ignored() {
        let mut h = build_harness(4, 2, 2_000, &[true, true, true, true]).await;

        // Correctly signed, but for the wrong cycle; must be discarded rather
        // than accepted as an approval for the active seq.
        schedule_commit_after(h.agg_addr, &h.signing_key, 2, 30);
        schedule_commit(h.agg_addr, &h.signing_key, 1);

        let outcome = h.engine.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Committed { seq: 1, .. }));
    }
}
