// Copyright (c) 2024 Botho Foundation

//! A single peer taking part in consensus.

use crate::{
    codec,
    config::ConsensusConfig,
    error::{CposError, CposResult},
    execution::{BlockResult, ExecutionEngine},
    merge::{next_hold_times, next_order_timestamp, BeliefMerge},
    store::BlobStore,
};
use bth_consensus_cpos_types::{
    Belief, Block, Hash, KeyPair, Order, PeerId, SignedBelief, SignedBlock, SignedOrder,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};
use tracing::{debug, info, instrument, warn};

/// What [`Peer::persist`] writes to the root blob.
#[derive(Serialize, Deserialize)]
struct PeerSnapshot {
    timestamp: u64,
    orders: Vec<Hash>,
}

/// One identity's view of the network.
///
/// A peer is an immutable value. Every operation returns the next peer and
/// leaves `self` untouched, so callers serialise operations simply by
/// replacing their handle.
pub struct Peer<E: ExecutionEngine> {
    keypair: KeyPair,
    belief: Belief,
    timestamp: u64,
    state: E::State,
    finalized: u64,
    results: Vec<BlockResult<E::Receipt>>,
    deferred: Vec<SignedOrder>,
    hold_times: Vec<u64>,
    config: Arc<ConsensusConfig>,
}

impl<E: ExecutionEngine> Clone for Peer<E> {
    fn clone(&self) -> Self {
        Self {
            keypair: self.keypair.clone(),
            belief: self.belief.clone(),
            timestamp: self.timestamp,
            state: self.state.clone(),
            finalized: self.finalized,
            results: self.results.clone(),
            deferred: self.deferred.clone(),
            hold_times: self.hold_times.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: ExecutionEngine> fmt::Debug for Peer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.peer_id())
            .field("timestamp", &self.timestamp)
            .field("finalized", &self.finalized)
            .field("order", &self.order())
            .finish_non_exhaustive()
    }
}

impl<E: ExecutionEngine> Peer<E> {
    /// A fresh peer whose belief holds only its own empty order.
    pub fn create(keypair: KeyPair, genesis_state: E::State, config: Arc<ConsensusConfig>) -> Self {
        let genesis = SignedOrder::sign(&keypair, Order::create());
        Self::from_belief(keypair, Belief::create([genesis]), 0, genesis_state, config)
    }

    /// A peer starting from an existing belief. No block has been executed
    /// yet; [`Peer::update_state`] catches up from `genesis_state`.
    pub fn from_belief(
        keypair: KeyPair,
        belief: Belief,
        timestamp: u64,
        genesis_state: E::State,
        config: Arc<ConsensusConfig>,
    ) -> Self {
        Self {
            keypair,
            belief,
            timestamp,
            state: genesis_state,
            finalized: 0,
            results: Vec::new(),
            deferred: Vec::new(),
            hold_times: Vec::new(),
            config,
        }
    }

    /// This peer's identity.
    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    /// This peer's key pair.
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// The current belief.
    pub fn belief(&self) -> &Belief {
        &self.belief
    }

    /// This peer's own order, or the empty order if it has none yet.
    pub fn order(&self) -> Order {
        self.belief
            .get_order(&self.peer_id())
            .cloned()
            .unwrap_or_default()
    }

    /// The local clock.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Ledger state after executing every finalized block.
    pub fn state(&self) -> &E::State {
        &self.state
    }

    /// Number of leading blocks executed so far.
    pub fn finalized_count(&self) -> u64 {
        self.finalized
    }

    /// Results from the most recent [`Peer::update_state`] that executed
    /// anything.
    pub fn block_results(&self) -> &[BlockResult<E::Receipt>] {
        &self.results
    }

    /// Orders waiting for the local clock to catch up with them.
    pub fn deferred(&self) -> &[SignedOrder] {
        &self.deferred
    }

    /// The consensus parameters.
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Append `block` to the local order.
    ///
    /// The peer first merges its current belief so the block lands after
    /// everything it already knows about.
    #[instrument(
        name = "cpos.propose_block",
        skip_all,
        fields(peer = %self.peer_id().short(), block_ts = block.timestamp())
    )]
    pub fn propose_block(&self, block: Block) -> CposResult<Self> {
        if *block.proposer() != self.peer_id() {
            return Err(CposError::ForeignProposer(*block.proposer()));
        }

        let merged = self
            .update_timestamp(block.timestamp())
            .merge_beliefs(&[])?;
        let order = merged.order();
        let hash = block.hash();
        if order.blocks().iter().any(|existing| existing.hash() == hash) {
            return Err(CposError::DuplicateBlock(hash));
        }

        let mut blocks = order.blocks().to_vec();
        blocks.push(SignedBlock::sign(&self.keypair, block));
        let next = order
            .with_blocks(blocks)
            .with_timestamp(next_order_timestamp(&order, merged.timestamp));
        debug!(?hash, blocks = next.block_count(), "Block proposed");

        let hold_times = next_hold_times(&order, &merged.hold_times, &next, merged.timestamp);
        let belief = merged
            .belief
            .with_order(SignedOrder::sign(&self.keypair, next));
        Ok(Self {
            belief,
            hold_times,
            ..merged
        })
    }

    /// Merge `orders`, plus any orders deferred by earlier merges.
    #[instrument(
        name = "cpos.merge_beliefs",
        level = "debug",
        skip_all,
        fields(
            peer = %self.peer_id().short(),
            ts = self.timestamp,
            orders = orders.len(),
            deferred = self.deferred.len(),
        )
    )]
    pub fn merge_beliefs(&self, orders: &[SignedOrder]) -> CposResult<Self> {
        let incoming: Vec<SignedOrder> = self.deferred.iter().chain(orders).cloned().collect();
        let outcome = BeliefMerge::create(
            &self.belief,
            &self.keypair,
            self.timestamp,
            &self.state,
            &self.config,
        )
        .with_hold_times(&self.hold_times)
        .merge_detailed(&incoming)?;

        let next = outcome
            .belief
            .get_order(&self.peer_id())
            .cloned()
            .unwrap_or_default();
        let hold_times = next_hold_times(&self.order(), &self.hold_times, &next, self.timestamp);
        Ok(Self {
            belief: outcome.belief,
            deferred: newest_per_signer(outcome.deferred),
            hold_times,
            ..self.clone()
        })
    }

    /// Merge every order in another peer's belief.
    pub fn merge_belief(&self, belief: &Belief) -> CposResult<Self> {
        let orders: Vec<SignedOrder> = belief.orders().values().cloned().collect();
        self.merge_beliefs(&orders)
    }

    /// Merge a gossiped belief. A belief with a bad signature is dropped
    /// as a whole.
    pub fn merge_signed_belief(&self, belief: &SignedBelief) -> CposResult<Self> {
        if !belief.verify() {
            debug!(signer = %belief.signer().short(), "Dropping belief with invalid signature");
            return Ok(self.clone());
        }
        self.merge_belief(belief.value())
    }

    /// Advance the local clock. Earlier times are ignored.
    pub fn update_timestamp(&self, timestamp: u64) -> Self {
        Self {
            timestamp: self.timestamp.max(timestamp),
            ..self.clone()
        }
    }

    /// Execute blocks that became final since the last call, in order.
    #[instrument(
        name = "cpos.update_state",
        level = "debug",
        skip_all,
        fields(peer = %self.peer_id().short(), finalized = self.finalized)
    )]
    pub fn update_state(&self, engine: &E) -> Self {
        let order = self.order();
        let finality = order.consensus_point();
        if finality <= self.finalized {
            return self.clone();
        }

        let mut state = self.state.clone();
        let mut results = Vec::new();
        let mut applied = self.finalized;
        while applied < finality {
            let Some(block) = order.block(applied) else {
                break;
            };
            let (next, receipts) = engine.apply(&state, block.value());
            results.push(BlockResult {
                index: applied,
                block: block.hash(),
                receipts,
            });
            state = next;
            applied += 1;
        }

        info!(from = self.finalized, to = applied, "Executed finalized blocks");
        Self {
            state,
            finalized: applied,
            results,
            ..self.clone()
        }
    }

    /// The current belief signed for gossip.
    pub fn sign_belief(&self) -> SignedBelief {
        SignedBelief::sign(&self.keypair, self.belief.clone())
    }

    /// Write the belief and clock to `store`, returning the root digest.
    ///
    /// Each order is stored as its own blob so unchanged orders are shared
    /// between snapshots.
    pub fn persist<B: BlobStore + ?Sized>(&self, store: &B) -> CposResult<Hash> {
        let orders = self
            .belief
            .orders()
            .values()
            .map(|order| Ok(store.put(codec::encode_order(order)?)))
            .collect::<CposResult<Vec<Hash>>>()?;
        let snapshot = PeerSnapshot {
            timestamp: self.timestamp,
            orders,
        };
        Ok(store.put(codec::encode(&snapshot)?))
    }

    /// Rebuild a peer from a snapshot written by [`Peer::persist`].
    ///
    /// Stored orders that fail signature or structural checks are skipped,
    /// as they would be when received over gossip.
    ///
    /// Execution restarts from `genesis_state`; the next
    /// [`Peer::update_state`] replays every final block.
    pub fn restore<B: BlobStore + ?Sized>(
        keypair: KeyPair,
        store: &B,
        root: &Hash,
        genesis_state: E::State,
        config: Arc<ConsensusConfig>,
    ) -> CposResult<Self> {
        let bytes = store.get(root).ok_or(CposError::MissingData(*root))?;
        let snapshot: PeerSnapshot = codec::decode(&bytes)?;

        let mut orders = Vec::with_capacity(snapshot.orders.len());
        for hash in &snapshot.orders {
            let bytes = store.get(hash).ok_or(CposError::MissingData(*hash))?;
            let order = codec::decode_order(&bytes)?;
            if !order.verify() {
                warn!(signer = %order.signer().short(), "Skipping stored order with invalid signature");
                continue;
            }
            if let Err(err) = order.validate() {
                warn!(signer = %order.signer().short(), %err, "Skipping malformed stored order");
                continue;
            }
            orders.push(order);
        }

        Ok(Self::from_belief(
            keypair,
            Belief::create(orders),
            snapshot.timestamp,
            genesis_state,
            config,
        ))
    }
}

fn newest_per_signer(orders: Vec<SignedOrder>) -> Vec<SignedOrder> {
    let mut newest: BTreeMap<PeerId, SignedOrder> = BTreeMap::new();
    for order in orders {
        match newest.get(order.signer()) {
            Some(existing) if !order.is_newer_than(existing) => {}
            _ => {
                newest.insert(*order.signer(), order);
            }
        }
    }
    newest.into_values().collect()
}
