// Copyright (c) 2024 Botho Foundation

//! The execution-engine seam.

use bth_consensus_cpos_types::{Block, Hash, StakeSnapshot};
use std::fmt::Debug;

/// Applies finalized blocks to ledger state.
///
/// Consensus never calls this speculatively; a block reaches the engine only
/// after it has passed the deepest consensus level.
pub trait ExecutionEngine {
    /// Ledger state. Stake weights for the next merge are read from it.
    type State: StakeSnapshot + Clone;

    /// Per-transaction execution result.
    type Receipt: Clone + Debug;

    /// Apply `block` to `state`, returning the new state and one receipt per
    /// transaction.
    fn apply(&self, state: &Self::State, block: &Block) -> (Self::State, Vec<Self::Receipt>);
}

/// Receipts produced by executing one finalized block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockResult<R> {
    /// Position of the block in the agreed order.
    pub index: u64,

    /// Digest of the executed block.
    pub block: Hash,

    /// One receipt per transaction, in block order.
    pub receipts: Vec<R>,
}
