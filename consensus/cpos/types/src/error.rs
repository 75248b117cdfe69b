// Copyright (c) 2024 Botho Foundation

//! Error types for the CPoS value types.

use crate::hash::Hash;
use displaydoc::Display;
use thiserror::Error;

/// Ways an order can break the structural invariants of the data model.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum OrderError {
    /// Level 0 consensus point {points} does not match block count {blocks}
    BlockCountMismatch {
        /// Level 0 point
        points: u64,
        /// Number of blocks
        blocks: u64,
    },

    /// Consensus point at level {0} exceeds the level below it
    NonMonotonic(usize),

    /// Consensus point at level {level} moved backwards from {from} to {to}
    Regressed {
        /// Offending level
        level: usize,
        /// Previous value
        from: u64,
        /// Attempted value
        to: u64,
    },

    /// Block {0:?} appears more than once
    DuplicateBlock(Hash),

    /// Block at index {0} has an invalid signature
    InvalidBlockSignature(u64),

    /// Block at index {0} is signed by a peer other than its proposer
    ForeignBlockSigner(u64),

    /// Block at index {0} is timestamped after its order
    BlockFromFuture(u64),

    /// Fixed block at index {0} was rewritten
    FixedBlockChanged(u64),
}
