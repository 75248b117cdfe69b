// Copyright (c) 2024 Botho Foundation

//! Utilities for CPoS tests.

use crate::{
    config::ConsensusConfig,
    error::CposResult,
    execution::ExecutionEngine,
    peer::Peer,
};
use bth_consensus_cpos_types::{
    Block, Hash, KeyPair, PeerId, SignedBlock, SignedOrder, SignedTransaction, StakeSnapshot,
    StakeTable, Transaction,
};
use std::sync::Arc;

/// Stake given to each peer of a test network.
pub const TEST_STAKE: u64 = 100;

/// Deterministic key pair for the peer with the given index.
pub fn test_keypair(index: usize) -> KeyPair {
    let mut seed = [0x42u8; 32];
    seed[..8].copy_from_slice(&(index as u64).to_le_bytes());
    KeyPair::from_seed(seed)
}

/// Deterministic key pairs for peers `0..n`.
pub fn test_keypairs(n: usize) -> Vec<KeyPair> {
    (0..n).map(test_keypair).collect()
}

/// A transaction from `keypair` carrying its sequence number as payload.
pub fn test_transaction(keypair: &KeyPair, sequence: u64) -> SignedTransaction {
    SignedTransaction::sign(
        keypair,
        Transaction {
            origin: keypair.peer_id(),
            sequence,
            payload: sequence.to_le_bytes().to_vec(),
        },
    )
}

/// A block proposed by `keypair` holding one transaction numbered `nonce`.
pub fn test_block(keypair: &KeyPair, timestamp: u64, nonce: u64) -> Block {
    Block::create(
        timestamp,
        vec![test_transaction(keypair, nonce)],
        keypair.peer_id(),
    )
}

/// [`test_block`], signed by its proposer.
pub fn signed_block(keypair: &KeyPair, timestamp: u64, nonce: u64) -> SignedBlock {
    SignedBlock::sign(keypair, test_block(keypair, timestamp, nonce))
}

/// Ledger state tracked by [`TestLedger`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerState {
    /// Stake weights; fixed for the lifetime of a test.
    pub stakes: StakeTable,

    /// Digests of executed blocks, in execution order.
    pub executed: Vec<Hash>,

    /// Number of executed transactions.
    pub transactions: u64,
}

impl LedgerState {
    /// Genesis state with the given stakes.
    pub fn new(stakes: StakeTable) -> Self {
        Self {
            stakes,
            ..Default::default()
        }
    }
}

impl StakeSnapshot for LedgerState {
    fn stake_of(&self, peer: &PeerId) -> u64 {
        self.stakes.stake_of(peer)
    }

    fn total_stake(&self) -> u64 {
        self.stakes.total_stake()
    }
}

/// Receipt for one executed test transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    /// Originating account.
    pub origin: PeerId,

    /// Sequence number of the transaction.
    pub sequence: u64,
}

/// An execution engine that records what it executed.
#[derive(Clone, Copy, Debug, Default)]
pub struct TestLedger;

impl ExecutionEngine for TestLedger {
    type State = LedgerState;
    type Receipt = TxReceipt;

    fn apply(&self, state: &LedgerState, block: &Block) -> (LedgerState, Vec<TxReceipt>) {
        let receipts: Vec<TxReceipt> = block
            .transactions()
            .iter()
            .map(|tx| TxReceipt {
                origin: tx.origin,
                sequence: tx.sequence,
            })
            .collect();

        let mut next = state.clone();
        next.executed.push(block.hash());
        next.transactions += receipts.len() as u64;
        (next, receipts)
    }
}

/// Genesis state in which each of `keypairs` holds [`TEST_STAKE`].
pub fn uniform_genesis(keypairs: &[KeyPair]) -> LedgerState {
    LedgerState::new(StakeTable::uniform(
        keypairs.iter().map(KeyPair::peer_id),
        TEST_STAKE,
    ))
}

/// `n` equally staked peers sharing one config.
pub fn test_network(n: usize, config: ConsensusConfig) -> Vec<Peer<TestLedger>> {
    let keypairs = test_keypairs(n);
    let genesis = uniform_genesis(&keypairs);
    let config = Arc::new(config);
    keypairs
        .into_iter()
        .map(|keypair| Peer::create(keypair, genesis.clone(), config.clone()))
        .collect()
}

/// Every order held by any of `peers`.
pub fn all_orders<E: ExecutionEngine>(peers: &[Peer<E>]) -> Vec<SignedOrder> {
    peers
        .iter()
        .flat_map(|peer| peer.belief().orders().values().cloned())
        .collect()
}

/// One round of full gossip at `timestamp`.
///
/// Every peer merges every belief as it stood at the start of the round, then
/// executes whatever became final.
pub fn gossip_round<E: ExecutionEngine>(
    peers: &[Peer<E>],
    engine: &E,
    timestamp: u64,
) -> CposResult<Vec<Peer<E>>> {
    let incoming = all_orders(peers);
    peers
        .iter()
        .map(|peer| {
            Ok(peer
                .update_timestamp(timestamp)
                .merge_beliefs(&incoming)?
                .update_state(engine))
        })
        .collect()
}

/// Whether every pair of peers holds consensus-equal orders.
pub fn all_consensus_equal<E: ExecutionEngine>(peers: &[Peer<E>]) -> bool {
    let orders: Vec<_> = peers.iter().map(Peer::order).collect();
    orders
        .iter()
        .all(|a| orders.iter().all(|b| a.consensus_equals(b)))
}

/// The smallest finalized block count across `peers`.
pub fn min_finalized<E: ExecutionEngine>(peers: &[Peer<E>]) -> u64 {
    peers
        .iter()
        .map(Peer::finalized_count)
        .min()
        .unwrap_or(0)
}
