// Copyright (c) 2024 Botho Foundation

//! CPoS Gossip Simulation Tool
//!
//! Runs a network of CPoS peers, one thread each, exchanging signed beliefs
//! over bounded channels until every proposed block is final.
//!
//! Usage:
//!   cargo run --bin cpos-sim -- --peers 4 --blocks 8
//!   cargo run --bin cpos-sim -- --peers 7 --drop-rate 0.05 --seed 7
//!   cargo run --bin cpos-sim -- --config cpos.toml --output results.json

use std::{
    fmt,
    fs::File,
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context};
use bth_common::logger::init_logging;
use bth_consensus_cpos::{
    codec::{decode_signed_belief, encode_signed_belief},
    test_utils::{test_block, test_keypairs, uniform_genesis, TestLedger},
    Belief, ConsensusConfig, Order, Peer, SignedOrder, CONSENSUS_LEVELS,
};
use clap::Parser;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use dashmap::DashMap;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

type SimPeer = Peer<TestLedger>;

/// How long the coordinator waits for a peer to finish a round.
const ROUND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "cpos-sim")]
#[command(about = "CPoS Consensus Gossip Simulation")]
struct Args {
    /// Number of equally staked peers
    #[arg(short, long, default_value = "4")]
    peers: usize,

    /// Number of blocks to propose, one per round, round-robin
    #[arg(short, long, default_value = "8")]
    blocks: u64,

    /// Give up after this many rounds
    #[arg(long, default_value = "200")]
    max_rounds: u64,

    /// Logical time advanced per round, in milliseconds
    #[arg(long, default_value = "50")]
    round_ms: u64,

    /// Probability of losing any single gossip message
    #[arg(long, default_value = "0.0")]
    drop_rate: f64,

    /// Rebroadcast an unchanged belief after this many quiet rounds (0 never)
    #[arg(long, default_value = "5")]
    resend_rounds: u64,

    /// Capacity of each peer's inbox
    #[arg(long, default_value = "64")]
    queue_depth: usize,

    /// Seed for the message loss generator
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Consensus parameters (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output file for results (JSON format)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Default)]
struct Metrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    dropped_full: AtomicU64,
    dropped_lossy: AtomicU64,
    invalid_messages: AtomicU64,
}

/// Latest view of one peer, published after every round.
#[derive(Clone, Debug, Default)]
struct Progress {
    peer: String,
    order: Order,
    finalized: u64,
    transactions: u64,
}

#[derive(Debug, Serialize)]
struct PeerReport {
    peer: String,
    blocks: u64,
    finalized: u64,
    transactions: u64,
    consensus_points: [u64; CONSENSUS_LEVELS],
}

#[derive(Debug, Serialize)]
struct SimReport {
    peers: usize,
    blocks: u64,
    rounds: u64,
    converged: bool,
    elapsed_ms: u64,
    messages_sent: u64,
    messages_received: u64,
    dropped_full: u64,
    dropped_lossy: u64,
    invalid_messages: u64,
    final_state: Vec<PeerReport>,
}

impl fmt::Display for SimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n============= CPOS SIMULATION RESULTS =============")?;
        writeln!(f, "Peers:                 {}", self.peers)?;
        writeln!(f, "Blocks Proposed:       {}", self.blocks)?;
        writeln!(f, "Rounds:                {}", self.rounds)?;
        writeln!(f, "Converged:             {}", self.converged)?;
        writeln!(f, "Duration:              {} ms", self.elapsed_ms)?;
        writeln!(f, "---------------------------------------------------")?;
        writeln!(f, "Messages Sent:         {}", self.messages_sent)?;
        writeln!(f, "Messages Received:     {}", self.messages_received)?;
        writeln!(f, "Dropped (queue full):  {}", self.dropped_full)?;
        writeln!(f, "Dropped (lossy link):  {}", self.dropped_lossy)?;
        writeln!(f, "Invalid Messages:      {}", self.invalid_messages)?;
        writeln!(f, "---------------------------------------------------")?;
        for peer in &self.final_state {
            writeln!(
                f,
                "{}  blocks={:<4} points={:?} txs={}",
                peer.peer, peer.blocks, peer.consensus_points, peer.transactions
            )?;
        }
        writeln!(f, "===================================================")?;
        Ok(())
    }
}

// ============================================================================
// Peer Threads
// ============================================================================

enum Inbox {
    Gossip(Arc<Vec<u8>>),
    Tick { round: u64, timestamp: u64 },
    Stop,
}

struct PeerTask {
    index: usize,
    peer_count: usize,
    blocks: u64,
    drop_rate: f64,
    resend_rounds: u64,
    peer: SimPeer,
    inbox: Receiver<Inbox>,
    outboxes: Arc<Vec<Sender<Inbox>>>,
    acks: Sender<usize>,
    progress: Arc<DashMap<usize, Progress>>,
    metrics: Arc<Metrics>,
    rng: StdRng,
}

impl PeerTask {
    fn run(mut self) -> anyhow::Result<()> {
        let mut pending: Vec<SignedOrder> = Vec::new();
        let mut last_sent = Belief::default();
        let mut quiet_rounds = 0;

        while let Ok(message) = self.inbox.recv() {
            match message {
                Inbox::Gossip(bytes) => {
                    self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                    match decode_signed_belief(&bytes) {
                        Ok(belief) if belief.verify() => {
                            pending.extend(belief.value().orders().values().cloned());
                        }
                        _ => {
                            self.metrics.invalid_messages.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                Inbox::Tick { round, timestamp } => {
                    let incoming = std::mem::take(&mut pending);
                    self.tick(round, timestamp, &incoming)?;

                    // Lost gossip is only repaired by resending, so a belief
                    // that stops changing still goes out now and then.
                    quiet_rounds += 1;
                    let changed = !self.peer.belief().ptr_eq(&last_sent);
                    let resend = self.resend_rounds > 0 && quiet_rounds >= self.resend_rounds;
                    if changed || resend {
                        last_sent = self.peer.belief().clone();
                        quiet_rounds = 0;
                        self.broadcast()?;
                    }
                    self.publish();
                    self.acks
                        .send(self.index)
                        .map_err(|_| anyhow!("coordinator went away"))?;
                }
                Inbox::Stop => break,
            }
        }
        Ok(())
    }

    fn tick(&mut self, round: u64, timestamp: u64, incoming: &[SignedOrder]) -> anyhow::Result<()> {
        let mut peer = self
            .peer
            .update_timestamp(timestamp)
            .merge_beliefs(incoming)?;

        let proposer = (round - 1) % self.peer_count as u64 == self.index as u64;
        if round <= self.blocks && proposer {
            let block = test_block(peer.keypair(), timestamp, round - 1);
            peer = peer.propose_block(block)?;
            debug!(peer = self.index, round, "Proposed block");
        }

        self.peer = peer.update_state(&TestLedger);
        Ok(())
    }

    fn broadcast(&mut self) -> anyhow::Result<()> {
        let bytes = Arc::new(encode_signed_belief(&self.peer.sign_belief())?);
        for (index, outbox) in self.outboxes.iter().enumerate() {
            if index == self.index {
                continue;
            }
            if self.rng.gen_bool(self.drop_rate) {
                self.metrics.dropped_lossy.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match outbox.try_send(Inbox::Gossip(bytes.clone())) {
                Ok(()) => {
                    self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.metrics.dropped_full.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!(from = self.index, to = index, "Peer inbox disconnected");
                }
            }
        }
        Ok(())
    }

    fn publish(&self) {
        self.progress.insert(
            self.index,
            Progress {
                peer: self.peer.peer_id().short(),
                order: self.peer.order(),
                finalized: self.peer.finalized_count(),
                transactions: self.peer.state().transactions,
            },
        );
    }
}

// ============================================================================
// Coordinator
// ============================================================================

fn converged(progress: &DashMap<usize, Progress>, peers: usize, blocks: u64) -> bool {
    let views: Vec<Progress> = (0..peers)
        .filter_map(|index| progress.get(&index).map(|entry| entry.value().clone()))
        .collect();
    views.len() == peers
        && views.iter().all(|view| view.finalized >= blocks)
        && views
            .iter()
            .all(|a| views.iter().all(|b| a.order.consensus_equals(&b.order)))
}

fn run(args: &Args) -> anyhow::Result<SimReport> {
    if args.peers < 2 {
        bail!("need at least two peers, got {}", args.peers);
    }
    if !(0.0..=1.0).contains(&args.drop_rate) {
        bail!("drop rate must lie in [0, 1], got {}", args.drop_rate);
    }
    let config = match &args.config {
        Some(path) => ConsensusConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConsensusConfig::default(),
    };
    info!(?config, peers = args.peers, blocks = args.blocks, "Starting simulation");

    let keypairs = test_keypairs(args.peers);
    let genesis = uniform_genesis(&keypairs);
    let config = Arc::new(config);

    let (senders, receivers): (Vec<Sender<Inbox>>, Vec<Receiver<Inbox>>) =
        (0..args.peers).map(|_| bounded(args.queue_depth)).unzip();
    let outboxes = Arc::new(senders);
    let (ack_tx, ack_rx) = unbounded();
    let progress = Arc::new(DashMap::new());
    let metrics = Arc::new(Metrics::default());

    let mut handles = Vec::with_capacity(args.peers);
    for (index, (keypair, inbox)) in keypairs.into_iter().zip(receivers).enumerate() {
        let task = PeerTask {
            index,
            peer_count: args.peers,
            blocks: args.blocks,
            drop_rate: args.drop_rate,
            resend_rounds: args.resend_rounds,
            peer: Peer::create(keypair, genesis.clone(), config.clone()),
            inbox,
            outboxes: outboxes.clone(),
            acks: ack_tx.clone(),
            progress: progress.clone(),
            metrics: metrics.clone(),
            rng: StdRng::seed_from_u64(args.seed.wrapping_add(index as u64)),
        };
        let handle = thread::Builder::new()
            .name(format!("peer-{index}"))
            .spawn(move || task.run())
            .context("failed to spawn peer thread")?;
        handles.push(handle);
    }
    drop(ack_tx);

    let start = Instant::now();
    let mut rounds = 0;
    let mut done = false;
    while rounds < args.max_rounds && !done {
        rounds += 1;
        let timestamp = rounds * args.round_ms;
        for outbox in outboxes.iter() {
            // Ticks are never dropped; the peer drains its inbox meanwhile.
            outbox
                .send(Inbox::Tick {
                    round: rounds,
                    timestamp,
                })
                .map_err(|_| anyhow!("peer stopped before round {rounds}"))?;
        }
        for _ in 0..args.peers {
            ack_rx
                .recv_timeout(ROUND_TIMEOUT)
                .with_context(|| format!("peer stopped responding in round {rounds}"))?;
        }
        done = rounds >= args.blocks && converged(&progress, args.peers, args.blocks);
        debug!(round = rounds, done, "Round complete");
    }

    for outbox in outboxes.iter() {
        let _ = outbox.send(Inbox::Stop);
    }
    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("peer thread panicked"))??;
    }

    let final_state = (0..args.peers)
        .map(|index| {
            let view = progress
                .get(&index)
                .map(|entry| entry.value().clone())
                .unwrap_or_default();
            PeerReport {
                peer: view.peer,
                blocks: view.order.block_count(),
                finalized: view.finalized,
                transactions: view.transactions,
                consensus_points: *view.order.consensus_points(),
            }
        })
        .collect();

    Ok(SimReport {
        peers: args.peers,
        blocks: args.blocks,
        rounds,
        converged: done,
        elapsed_ms: start.elapsed().as_millis() as u64,
        messages_sent: metrics.messages_sent.load(Ordering::Relaxed),
        messages_received: metrics.messages_received.load(Ordering::Relaxed),
        dropped_full: metrics.dropped_full.load(Ordering::Relaxed),
        dropped_lossy: metrics.dropped_lossy.load(Ordering::Relaxed),
        invalid_messages: metrics.invalid_messages.load(Ordering::Relaxed),
        final_state,
    })
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let report = run(&args)?;
    println!("{report}");
    if !report.converged {
        warn!(rounds = report.rounds, "Network did not converge");
    }

    if let Some(path) = &args.output {
        let mut file = File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        file.write_all(serde_json::to_string_pretty(&report)?.as_bytes())?;
        info!(path = %path.display(), "Results written");
    }
    Ok(())
}
