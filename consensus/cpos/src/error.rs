// Copyright (c) 2024 Botho Foundation

//! Error types for the CPoS consensus module.

use crate::config::ConfigError;
use bth_consensus_cpos_types::{Hash, OrderError, PeerId};
use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur in CPoS consensus operations.
///
/// Input from remote peers never produces one of these; bad orders are
/// dropped during the merge instead.
#[derive(Debug, Display, Error)]
pub enum CposError {
    /// Order invariant violated: {0}
    Order(#[from] OrderError),

    /// Block proposer {0} is not the local peer
    ForeignProposer(PeerId),

    /// Block {0:?} is already in the local order
    DuplicateBlock(Hash),

    /// Referenced data {0} is not available
    MissingData(Hash),

    /// Failed to encode or decode message: {0}
    Decode(#[from] bincode::Error),

    /// Invalid configuration: {0}
    Config(#[from] ConfigError),
}

/// Result type for CPoS operations.
pub type CposResult<T> = Result<T, CposError>;
