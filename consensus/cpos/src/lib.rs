// Copyright (c) 2024 Botho Foundation

#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

pub mod codec;
mod config;
mod error;
mod execution;
mod merge;
mod peer;
mod store;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[doc(inline)]
pub use bth_consensus_cpos_types::{
    Belief, Block, Hash, KeyPair, Order, OrderError, PeerId, Signable, SignedBelief, SignedBlock,
    SignedOrder, SignedTransaction, StakeSnapshot, StakeTable, Transaction, CONSENSUS_LEVELS,
    LEVEL_BLOCKS, LEVEL_CONSENSUS, LEVEL_FINALITY, LEVEL_PROPOSAL,
};

pub use crate::{
    config::{ConfigError, ConsensusConfig},
    error::{CposError, CposResult},
    execution::{BlockResult, ExecutionEngine},
    merge::{compute_vote, BeliefMerge, MergeOutcome},
    peer::Peer,
    store::{BlobStore, MemoryStore},
};
