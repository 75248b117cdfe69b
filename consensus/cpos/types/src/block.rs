// Copyright (c) 2024 Botho Foundation

//! Transactions and blocks.
//!
//! A block is an immutable batch of signed transactions stamped with its
//! proposer's clock. Blocks are compared and deduplicated purely by content,
//! so two blocks with identical fields are the same block.

use crate::{
    hash::{ContentHasher, Hash},
    signed::{Signable, Signed},
};
use bth_common::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque client transaction. Its semantics belong to the execution
/// engine; consensus only orders it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    /// Account that originated the transaction.
    pub origin: PeerId,

    /// Origin-local sequence number.
    pub sequence: u64,

    /// Engine-specific payload.
    pub payload: Vec<u8>,
}

impl Signable for Transaction {
    const DOMAIN: &'static [u8] = b"bth-cpos-transaction";

    fn content_hash(&self) -> Hash {
        let mut hasher = ContentHasher::new(Self::DOMAIN);
        hasher
            .bytes(self.origin.as_ref())
            .u64(self.sequence)
            .bytes(&self.payload);
        hasher.finalize()
    }
}

/// A transaction signed by its origin.
pub type SignedTransaction = Signed<Transaction>;

/// A batch of transactions proposed by one peer at one timestamp.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    timestamp: u64,
    transactions: Vec<SignedTransaction>,
    proposer: PeerId,
}

impl Block {
    /// Create a block. No semantic validation happens here.
    pub fn create(timestamp: u64, transactions: Vec<SignedTransaction>, proposer: PeerId) -> Self {
        Self {
            timestamp,
            transactions,
            proposer,
        }
    }

    /// The proposer's clock when the block was created.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The transactions, in execution order.
    pub fn transactions(&self) -> &[SignedTransaction] {
        &self.transactions
    }

    /// The identity that proposed the block.
    pub fn proposer(&self) -> &PeerId {
        &self.proposer
    }

    /// Content hash identifying the block.
    pub fn hash(&self) -> Hash {
        self.content_hash()
    }
}

impl Signable for Block {
    const DOMAIN: &'static [u8] = b"bth-cpos-block";

    fn content_hash(&self) -> Hash {
        let mut hasher = ContentHasher::new(Self::DOMAIN);
        hasher
            .u64(self.timestamp)
            .bytes(self.proposer.as_ref())
            .u64(self.transactions.len() as u64);
        for tx in &self.transactions {
            hasher
                .hash(&tx.hash())
                .bytes(tx.signer().as_ref())
                .bytes(&tx.signature().to_bytes());
        }
        hasher.finalize()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("hash", &self.hash())
            .field("timestamp", &self.timestamp)
            .field("txs", &self.transactions.len())
            .field("proposer", &self.proposer)
            .finish()
    }
}

/// A block signed by its proposer; the unit stored in an order.
pub type SignedBlock = Signed<Block>;
