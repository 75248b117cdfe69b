// Copyright (c) 2024 Botho Foundation

//! One peer's candidate ordering of blocks.
//!
//! An order is a passive value object: a block sequence, the owner's clock
//! when it was produced, and one consensus point per level. Point 0 is the
//! block count; every higher point needs network agreement and is never
//! above the point below it. Keeping confirmed prefixes stable across
//! merges is the merge procedure's job, not this type's.

use crate::{
    block::SignedBlock,
    constants::{CONSENSUS_LEVELS, LEVEL_BLOCKS, LEVEL_FINALITY, LEVEL_PROPOSAL},
    error::OrderError,
    hash::{ContentHasher, Hash},
    signed::{Signable, Signed},
};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashSet, fmt};

/// A peer's block sequence plus its per-level consensus markers.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    blocks: Vec<SignedBlock>,
    timestamp: u64,
    consensus_points: [u64; CONSENSUS_LEVELS],
}

/// An order signed by the peer that owns it.
pub type SignedOrder = Signed<Order>;

impl Order {
    /// The empty order: timestamp 0, no blocks, every point 0.
    pub fn create() -> Self {
        Self::default()
    }

    /// Copy of this order with a different timestamp.
    pub fn with_timestamp(&self, timestamp: u64) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    /// Copy of this order with a different block sequence.
    ///
    /// Point 0 becomes the new length and every higher point is clamped to
    /// it. Callers must not shrink below a prefix they already confirmed.
    pub fn with_blocks(&self, blocks: Vec<SignedBlock>) -> Self {
        let len = blocks.len() as u64;
        let mut consensus_points = self.consensus_points;
        consensus_points[LEVEL_BLOCKS] = len;
        for point in consensus_points.iter_mut().skip(1) {
            *point = (*point).min(len);
        }
        Self {
            blocks,
            timestamp: self.timestamp,
            consensus_points,
        }
    }

    /// Copy of this order with new consensus points, checked against the
    /// block count and level ordering.
    pub fn with_consensus_points(
        &self,
        consensus_points: [u64; CONSENSUS_LEVELS],
    ) -> Result<Self, OrderError> {
        check_points(&consensus_points, self.blocks.len() as u64)?;
        Ok(Self {
            blocks: self.blocks.clone(),
            timestamp: self.timestamp,
            consensus_points,
        })
    }

    /// Number of blocks.
    pub fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Block at `index`, if present.
    pub fn block(&self, index: u64) -> Option<&SignedBlock> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    /// All blocks in order.
    pub fn blocks(&self) -> &[SignedBlock] {
        &self.blocks
    }

    /// The owner's clock when this order was produced.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The full consensus point vector.
    pub fn consensus_points(&self) -> &[u64; CONSENSUS_LEVELS] {
        &self.consensus_points
    }

    /// Consensus point for `level`. Levels past the deepest read as the
    /// deepest.
    pub fn consensus_point_at(&self, level: usize) -> u64 {
        self.consensus_points[level.min(LEVEL_FINALITY)]
    }

    /// Level 1: how many leading blocks this peer has proposed.
    pub fn proposal_point(&self) -> u64 {
        self.consensus_points[LEVEL_PROPOSAL]
    }

    /// Deepest level: how many leading blocks are final.
    pub fn consensus_point(&self) -> u64 {
        self.consensus_points[LEVEL_FINALITY]
    }

    /// Length of the common prefix between this order and `blocks`.
    pub fn common_prefix_len(&self, blocks: &[SignedBlock]) -> u64 {
        self.blocks
            .iter()
            .zip(blocks)
            .take_while(|(a, b)| a.ptr_eq(b) || a == b)
            .count() as u64
    }

    /// Whether the two orders agree on the prefix both consider final.
    ///
    /// Unconfirmed suffixes may differ. This is the property gossip
    /// convergence guarantees, weaker than full equality.
    pub fn consensus_equals(&self, other: &Order) -> bool {
        let shared = self.consensus_point().min(other.consensus_point());
        self.common_prefix_len(&other.blocks) >= shared
    }

    /// Freshness between two orders from the same owner.
    ///
    /// Later timestamps win. An owner may produce several orders within one
    /// clock tick, so equal timestamps fall back to the deeper consensus
    /// points (finality first), then to the content digest.
    pub fn is_newer_than(&self, other: &Order) -> bool {
        match self.timestamp.cmp(&other.timestamp) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
        for level in (0..CONSENSUS_LEVELS).rev() {
            match self.consensus_points[level].cmp(&other.consensus_points[level]) {
                Ordering::Greater => return true,
                Ordering::Less => return false,
                Ordering::Equal => {}
            }
        }
        self.content_hash() < other.content_hash()
    }

    /// Structural validity of an order received from another peer.
    pub fn validate(&self) -> Result<(), OrderError> {
        check_points(&self.consensus_points, self.blocks.len() as u64)?;

        let mut seen = HashSet::with_capacity(self.blocks.len());
        for (index, block) in self.blocks.iter().enumerate() {
            let index = index as u64;
            if block.timestamp() > self.timestamp {
                return Err(OrderError::BlockFromFuture(index));
            }
            if !seen.insert(block.hash()) {
                return Err(OrderError::DuplicateBlock(block.hash()));
            }
            if !block.verify() {
                return Err(OrderError::InvalidBlockSignature(index));
            }
            if block.signer() != block.proposer() {
                return Err(OrderError::ForeignBlockSigner(index));
            }
        }
        Ok(())
    }
}

fn check_points(points: &[u64; CONSENSUS_LEVELS], block_count: u64) -> Result<(), OrderError> {
    if points[LEVEL_BLOCKS] != block_count {
        return Err(OrderError::BlockCountMismatch {
            points: points[LEVEL_BLOCKS],
            blocks: block_count,
        });
    }
    for level in 1..CONSENSUS_LEVELS {
        if points[level] > points[level - 1] {
            return Err(OrderError::NonMonotonic(level));
        }
    }
    Ok(())
}

impl Signable for Order {
    const DOMAIN: &'static [u8] = b"bth-cpos-order";

    fn content_hash(&self) -> Hash {
        let mut hasher = ContentHasher::new(Self::DOMAIN);
        hasher.u64(self.timestamp);
        for point in &self.consensus_points {
            hasher.u64(*point);
        }
        hasher.u64(self.blocks.len() as u64);
        for block in &self.blocks {
            hasher
                .hash(&block.hash())
                .bytes(&block.signature().to_bytes());
        }
        hasher.finalize()
    }
}

impl fmt::Debug for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Order")
            .field("timestamp", &self.timestamp)
            .field("points", &self.consensus_points)
            .field(
                "blocks",
                &self.blocks.iter().map(|b| b.hash()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::Block, signed::KeyPair};

    fn block(keypair: &KeyPair, timestamp: u64) -> SignedBlock {
        SignedBlock::sign(keypair, Block::create(timestamp, vec![], keypair.peer_id()))
    }

    fn blocks(keypair: &KeyPair, n: u64) -> Vec<SignedBlock> {
        (0..n).map(|t| block(keypair, t)).collect()
    }

    #[test]
    fn test_create_is_empty() {
        let order = Order::create();
        assert_eq!(order.block_count(), 0);
        assert_eq!(order.timestamp(), 0);
        assert_eq!(order.consensus_points(), &[0; CONSENSUS_LEVELS]);
    }

    #[test]
    fn test_with_blocks_sets_level_zero() {
        let keypair = KeyPair::from_seed([1; 32]);
        let order = Order::create().with_blocks(blocks(&keypair, 3));

        assert_eq!(order.block_count(), 3);
        assert_eq!(order.consensus_point_at(LEVEL_BLOCKS), 3);
        assert_eq!(order.proposal_point(), 0);
    }

    #[test]
    fn test_with_blocks_clamps_higher_levels() {
        let keypair = KeyPair::from_seed([1; 32]);
        let all = blocks(&keypair, 5);
        let order = Order::create()
            .with_blocks(all.clone())
            .with_consensus_points([5, 4, 3, 2])
            .unwrap();

        let shrunk = order.with_blocks(all[..3].to_vec());
        assert_eq!(shrunk.consensus_points(), &[3, 3, 3, 2]);
    }

    #[test]
    fn test_with_consensus_points_rejects_bad_vectors() {
        let keypair = KeyPair::from_seed([1; 32]);
        let order = Order::create().with_blocks(blocks(&keypair, 2));

        assert_eq!(
            order.with_consensus_points([3, 0, 0, 0]),
            Err(OrderError::BlockCountMismatch {
                points: 3,
                blocks: 2
            })
        );
        assert_eq!(
            order.with_consensus_points([2, 1, 2, 0]),
            Err(OrderError::NonMonotonic(2))
        );
        assert!(order.with_consensus_points([2, 2, 1, 1]).is_ok());
    }

    #[test]
    fn test_consensus_equals_ignores_unconfirmed_suffix() {
        let a_key = KeyPair::from_seed([1; 32]);
        let b_key = KeyPair::from_seed([2; 32]);
        let shared = blocks(&a_key, 2);

        let mut a_blocks = shared.clone();
        a_blocks.push(block(&a_key, 10));
        let mut b_blocks = shared;
        b_blocks.push(block(&b_key, 11));

        let a = Order::create()
            .with_blocks(a_blocks)
            .with_consensus_points([3, 2, 2, 2])
            .unwrap();
        let b = Order::create()
            .with_blocks(b_blocks)
            .with_consensus_points([3, 3, 3, 2])
            .unwrap();

        assert!(a.consensus_equals(&b));
        assert!(b.consensus_equals(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn test_consensus_equals_detects_fork() {
        let a_key = KeyPair::from_seed([1; 32]);
        let b_key = KeyPair::from_seed([2; 32]);

        let a = Order::create()
            .with_blocks(vec![block(&a_key, 1)])
            .with_consensus_points([1, 1, 1, 1])
            .unwrap();
        let b = Order::create()
            .with_blocks(vec![block(&b_key, 1)])
            .with_consensus_points([1, 1, 1, 1])
            .unwrap();

        assert!(!a.consensus_equals(&b));
    }

    #[test]
    fn test_common_prefix_len() {
        let keypair = KeyPair::from_seed([1; 32]);
        let all = blocks(&keypair, 4);
        let order = Order::create().with_blocks(all[..3].to_vec());

        assert_eq!(order.common_prefix_len(&all), 3);
        assert_eq!(order.common_prefix_len(&all[..1]), 1);
        assert_eq!(order.common_prefix_len(&all[1..]), 0);
    }

    #[test]
    fn test_is_newer_than() {
        let keypair = KeyPair::from_seed([1; 32]);
        let base = Order::create().with_blocks(blocks(&keypair, 2)).with_timestamp(10);

        let later = base.with_timestamp(11);
        assert!(later.is_newer_than(&base));
        assert!(!base.is_newer_than(&later));

        let deeper = base.with_consensus_points([2, 1, 0, 0]).unwrap();
        assert!(deeper.is_newer_than(&base));
        assert!(!base.is_newer_than(&deeper));

        assert!(!base.is_newer_than(&base.clone()));
    }

    #[test]
    fn test_validate_accepts_well_formed_order() {
        let keypair = KeyPair::from_seed([1; 32]);
        let order = Order::create()
            .with_blocks(blocks(&keypair, 3))
            .with_timestamp(100);
        assert_eq!(order.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_future_blocks() {
        let keypair = KeyPair::from_seed([1; 32]);
        let b = block(&keypair, 5);

        let dup = Order::create()
            .with_blocks(vec![b.clone(), b.clone()])
            .with_timestamp(10);
        assert_eq!(dup.validate(), Err(OrderError::DuplicateBlock(b.hash())));

        let future = Order::create().with_blocks(vec![b]).with_timestamp(4);
        assert_eq!(future.validate(), Err(OrderError::BlockFromFuture(0)));
    }

    #[test]
    fn test_validate_rejects_forged_block() {
        let keypair = KeyPair::from_seed([1; 32]);
        let other = KeyPair::from_seed([2; 32]);
        let honest = block(&keypair, 1);
        let forged = SignedBlock::from_parts(
            Block::create(1, vec![], other.peer_id()),
            other.peer_id(),
            *honest.signature(),
        );

        let order = Order::create().with_blocks(vec![forged]).with_timestamp(5);
        assert_eq!(order.validate(), Err(OrderError::InvalidBlockSignature(0)));
    }

    #[test]
    fn test_validate_rejects_block_signed_for_another_proposer() {
        let signer = KeyPair::from_seed([1; 32]);
        let named = KeyPair::from_seed([2; 32]);
        let honest = block(&signer, 1);
        let spoofed = SignedBlock::sign(&signer, Block::create(2, vec![], named.peer_id()));
        assert!(spoofed.verify());

        let order = Order::create()
            .with_blocks(vec![honest, spoofed])
            .with_timestamp(5);
        assert_eq!(order.validate(), Err(OrderError::ForeignBlockSigner(1)));
    }

    #[test]
    fn test_signed_order_hash_changes_with_points() {
        let keypair = KeyPair::from_seed([1; 32]);
        let order = Order::create().with_blocks(blocks(&keypair, 1));
        let proposed = order.with_consensus_points([1, 1, 0, 0]).unwrap();
        assert_ne!(order.content_hash(), proposed.content_hash());
    }
}
