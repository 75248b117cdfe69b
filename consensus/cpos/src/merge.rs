// Copyright (c) 2024 Botho Foundation

//! Folding received orders into the local peer's belief.
//!
//! A merge is a pure function of the prior belief, the incoming orders, the
//! local key pair, the arrival timestamp, the stake snapshot and the config.
//! It proceeds in four steps:
//!
//! 1. Admission. Badly signed or malformed orders are dropped, orders from
//!    the future are handed back as deferred, stale orders are ignored.
//! 2. Voting. Starting at the local proposal point, each position goes to
//!    the block with the most stake behind it among orders that agree with
//!    the sequence chosen so far. Ties go to the lowest block digest. The
//!    local peer holds on to its own unconfirmed block for a while before
//!    conceding to another winner.
//! 3. Tail. Every other known block is appended in `(timestamp, digest)`
//!    order so nothing proposed is lost.
//! 4. Consensus points. Each level advances to the longest prefix backed by
//!    enough stake, where backing level `k` means agreeing on the blocks and
//!    having reached level `k - 1` on them.

use crate::{config::ConsensusConfig, error::CposResult};
use bth_consensus_cpos_types::{
    exceeds_threshold, Belief, Hash, KeyPair, Order, OrderError, PeerId, SignedBlock,
    SignedOrder, StakeSnapshot, CONSENSUS_LEVELS, LEVEL_BLOCKS, LEVEL_PROPOSAL,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, instrument, trace};

/// Total stake across a candidate-to-stake mapping. Empty input sums to 0.
pub fn compute_vote<K>(votes: &HashMap<K, u64>) -> u64 {
    votes
        .values()
        .fold(0u64, |sum, stake| sum.saturating_add(*stake))
}

/// Timestamp for an order replacing `previous` at local time `now`.
///
/// Successive orders from one peer get strictly increasing timestamps so
/// that receivers always recognise the replacement as newer.
pub(crate) fn next_order_timestamp(previous: &Order, now: u64) -> u64 {
    now.max(previous.timestamp().saturating_add(1))
}

/// Hold times for `next`, the order replacing `previous` at local time `now`.
///
/// `times[p]` is when the local peer started holding the block at position
/// `p`. A position keeps its time while the same block stays there and
/// restarts at `now` when the block changes.
pub(crate) fn next_hold_times(previous: &Order, times: &[u64], next: &Order, now: u64) -> Vec<u64> {
    next.blocks()
        .iter()
        .enumerate()
        .map(|(position, block)| match previous.block(position as u64) {
            Some(held) if held.hash() == block.hash() => times
                .get(position)
                .copied()
                .unwrap_or_else(|| held.timestamp()),
            _ => now,
        })
        .collect()
}

/// Result of a merge, with admission statistics.
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    /// The merged belief. The same reference as the input when nothing
    /// changed.
    pub belief: Belief,

    /// Orders that replaced an older entry.
    pub accepted: usize,

    /// Orders dropped for a bad signature or broken structure.
    pub rejected: usize,

    /// Orders that were stale or signed by the merging peer.
    pub ignored: usize,

    /// Orders timestamped after the merge, to be retried later.
    pub deferred: Vec<SignedOrder>,
}

/// A staked order as seen by the vote, with its block digests.
struct Voter<'a> {
    peer: PeerId,
    order: &'a Order,
    hashes: Vec<Hash>,
    stake: u64,
}

impl Voter<'_> {
    fn block_at(&self, position: usize) -> Option<&Hash> {
        self.hashes.get(position)
    }
}

fn block_hashes(order: &Order) -> Vec<Hash> {
    order.blocks().iter().map(|block| block.hash()).collect()
}

fn prefix_len(a: &[Hash], b: &[Hash]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn sum_stake<'v, 'o: 'v>(voters: impl Iterator<Item = &'v Voter<'o>>) -> u64 {
    voters.fold(0u64, |sum, voter| sum.saturating_add(voter.stake))
}

/// Length of the prefix of `own` that no merge may change.
fn fixed_len(own: &Order) -> usize {
    own.proposal_point().min(own.block_count()) as usize
}

/// Longest prefix `q` such that the stake of entries supporting at least
/// `q` blocks exceeds `threshold_bps` of `total`.
fn supported_prefix(mut support: Vec<(u64, u64)>, total: u64, threshold_bps: u32) -> u64 {
    support.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    let mut backing = 0u64;
    for (depth, stake) in support {
        backing = backing.saturating_add(stake);
        if exceeds_threshold(backing, total, threshold_bps) {
            return depth;
        }
    }
    0
}

/// One merge invocation for one peer.
pub struct BeliefMerge<'a, S: ?Sized> {
    belief: &'a Belief,
    keypair: &'a KeyPair,
    timestamp: u64,
    stakes: &'a S,
    config: &'a ConsensusConfig,
    hold_times: &'a [u64],
}

impl<'a, S: StakeSnapshot + ?Sized> BeliefMerge<'a, S> {
    /// Set up a merge of `belief` for the owner of `keypair` at `timestamp`.
    pub fn create(
        belief: &'a Belief,
        keypair: &'a KeyPair,
        timestamp: u64,
        stakes: &'a S,
        config: &'a ConsensusConfig,
    ) -> Self {
        Self {
            belief,
            keypair,
            timestamp,
            stakes,
            config,
            hold_times: &[],
        }
    }

    /// Supply when the local peer started holding each position of its
    /// order. Positions without a time fall back to the block's own
    /// timestamp.
    pub fn with_hold_times(self, hold_times: &'a [u64]) -> Self {
        Self { hold_times, ..self }
    }

    /// Merge `incoming` and return the resulting belief.
    pub fn merge(&self, incoming: &[SignedOrder]) -> CposResult<Belief> {
        Ok(self.merge_detailed(incoming)?.belief)
    }

    /// Merge `incoming`, also reporting what happened to each order.
    ///
    /// Fails only if the computed order would break an order invariant,
    /// which indicates a bug rather than bad input.
    #[instrument(
        name = "cpos.merge",
        level = "debug",
        skip_all,
        fields(
            peer = %self.keypair.peer_id().short(),
            ts = self.timestamp,
            incoming = incoming.len(),
        )
    )]
    pub fn merge_detailed(&self, incoming: &[SignedOrder]) -> CposResult<MergeOutcome> {
        let me = self.keypair.peer_id();
        let mut orders = self.belief.orders().clone();
        let mut accepted = 0;
        let mut rejected = 0;
        let mut ignored = 0;
        let mut deferred = Vec::new();

        for signed in incoming {
            let signer = *signed.signer();
            if signer == me {
                ignored += 1;
                continue;
            }
            if !signed.verify() {
                debug!(signer = %signer.short(), "Dropping order with invalid signature");
                rejected += 1;
                continue;
            }
            if let Err(err) = signed.validate() {
                debug!(signer = %signer.short(), %err, "Dropping malformed order");
                rejected += 1;
                continue;
            }
            if signed.timestamp() > self.timestamp {
                trace!(
                    signer = %signer.short(),
                    order_ts = signed.timestamp(),
                    "Deferring order from the future"
                );
                deferred.push(signed.clone());
                continue;
            }
            if let Some(existing) = orders.get(&signer) {
                if !signed.is_newer_than(existing) {
                    ignored += 1;
                    continue;
                }
            }
            orders.insert(signer, signed.clone());
            accepted += 1;
        }

        let previous = orders.get(&me).cloned();
        let empty = Order::create();
        let own = previous.as_ref().map_or(&empty, |signed| signed.value());

        let updated = self.update_order(&me, own, &orders)?;
        let own_changed = updated.is_some();
        if let Some(order) = updated {
            debug!(
                blocks = order.block_count(),
                points = ?order.consensus_points(),
                "Own order updated"
            );
            orders.insert(me, SignedOrder::sign(self.keypair, order));
        }

        let belief = if own_changed || accepted > 0 {
            Belief::create(orders.into_values())
        } else {
            self.belief.clone()
        };

        debug!(accepted, rejected, ignored, deferred = deferred.len(), "Merge complete");
        Ok(MergeOutcome {
            belief,
            accepted,
            rejected,
            ignored,
            deferred,
        })
    }

    /// Compute the local order from `orders`. `None` means unchanged.
    fn update_order(
        &self,
        me: &PeerId,
        own: &Order,
        orders: &BTreeMap<PeerId, SignedOrder>,
    ) -> CposResult<Option<Order>> {
        let total = self.stakes.total_stake();
        let voters: Vec<Voter> = orders
            .iter()
            .filter_map(|(peer, signed)| {
                let stake = self.stakes.stake_of(peer);
                (stake > 0).then(|| Voter {
                    peer: *peer,
                    order: signed.value(),
                    hashes: block_hashes(signed.value()),
                    stake,
                })
            })
            .collect();
        let own_hashes = block_hashes(own);

        let (mut blocks, mut hashes) = self.winning_sequence(own, &own_hashes, &voters, total);
        let chosen: HashSet<Hash> = hashes.iter().copied().collect();
        for (block, hash) in self.tail(own, &voters, &chosen) {
            blocks.push(block);
            hashes.push(hash);
        }

        let fixed = fixed_len(own);
        if hashes.len() < fixed {
            return Err(OrderError::FixedBlockChanged(hashes.len() as u64).into());
        }
        if let Some(index) = prefix_mismatch(&own_hashes[..fixed], &hashes[..fixed]) {
            return Err(OrderError::FixedBlockChanged(index as u64).into());
        }

        let points = self.consensus_points(me, own, &hashes, &voters, total);
        for (level, (&from, &to)) in own.consensus_points().iter().zip(&points).enumerate() {
            if to < from {
                return Err(OrderError::Regressed { level, from, to }.into());
            }
        }

        if hashes == own_hashes && points == *own.consensus_points() {
            return Ok(None);
        }

        let order = Order::create()
            .with_blocks(blocks)
            .with_consensus_points(points)?
            .with_timestamp(next_order_timestamp(own, self.timestamp));
        Ok(Some(order))
    }

    /// Position-by-position stake vote, starting after the fixed prefix.
    fn winning_sequence(
        &self,
        own: &Order,
        own_hashes: &[Hash],
        voters: &[Voter],
        total: u64,
    ) -> (Vec<SignedBlock>, Vec<Hash>) {
        let fixed = fixed_len(own);
        let mut blocks: Vec<SignedBlock> = own.blocks()[..fixed].to_vec();
        let mut hashes: Vec<Hash> = own_hashes[..fixed].to_vec();
        let mut chosen: HashSet<Hash> = hashes.iter().copied().collect();

        let mut agreeing: Vec<&Voter> = voters
            .iter()
            .filter(|voter| prefix_len(&voter.hashes, &hashes) >= fixed)
            .collect();
        let mut own_agrees = true;

        for position in fixed.. {
            let mut tally: HashMap<Hash, u64> = HashMap::new();
            let mut candidates: HashMap<Hash, SignedBlock> = HashMap::new();
            for voter in &agreeing {
                let Some(hash) = voter.block_at(position) else {
                    continue;
                };
                if chosen.contains(hash) {
                    continue;
                }
                let entry = tally.entry(*hash).or_default();
                *entry = entry.saturating_add(voter.stake);
                candidates
                    .entry(*hash)
                    .or_insert_with(|| voter.order.blocks()[position].clone());
            }

            let Some((&winner, &winner_stake)) = tally
                .iter()
                .max_by(|(ha, sa), (hb, sb)| sa.cmp(sb).then_with(|| hb.cmp(ha)))
            else {
                break;
            };

            let mut pick = winner;
            if own_agrees {
                if let Some(held) = own_hashes.get(position) {
                    let support = tally.get(held).copied().unwrap_or(0);
                    if *held != winner
                        && support > 0
                        && !self.should_concede(own, position, support, &winner, &agreeing, total)
                    {
                        pick = *held;
                    }
                }
            }

            trace!(
                position,
                ?winner,
                winner_stake,
                round_vote = compute_vote(&tally),
                kept_own = pick != winner,
                "Position decided"
            );

            let Some(block) = candidates.remove(&pick) else {
                break;
            };
            own_agrees = own_agrees && own_hashes.get(position) == Some(&pick);
            agreeing.retain(|voter| voter.block_at(position) == Some(&pick));
            chosen.insert(pick);
            blocks.push(block);
            hashes.push(pick);
        }

        (blocks, hashes)
    }

    /// Whether the local peer should give up its block at `position` for
    /// `winner`.
    fn should_concede(
        &self,
        own: &Order,
        position: usize,
        held_support: u64,
        winner: &Hash,
        agreeing: &[&Voter],
        total: u64,
    ) -> bool {
        let threshold = self.config.proposal_threshold_bps;

        let committed = sum_stake(agreeing.iter().copied().filter(|voter| {
            voter.order.proposal_point() > position as u64
                && voter.block_at(position) == Some(winner)
        }));
        if exceeds_threshold(committed, total, threshold) {
            return true;
        }

        let held_since = match self.hold_times.get(position) {
            Some(since) => *since,
            None => own
                .block(position as u64)
                .map(|block| block.timestamp())
                .unwrap_or(0),
        };
        let age = self.timestamp.saturating_sub(held_since);
        age >= self.config.keep_proposal_time_ms
            && !exceeds_threshold(held_support, total, threshold)
    }

    /// Blocks outside the winning sequence, in `(timestamp, digest)` order.
    fn tail(
        &self,
        own: &Order,
        voters: &[Voter],
        chosen: &HashSet<Hash>,
    ) -> Vec<(SignedBlock, Hash)> {
        let mut pending: BTreeMap<(u64, Hash), SignedBlock> = BTreeMap::new();
        let sources = std::iter::once(own).chain(voters.iter().map(|voter| voter.order));
        for order in sources {
            for block in order.blocks() {
                let hash = block.hash();
                if !chosen.contains(&hash) {
                    pending
                        .entry((block.timestamp(), hash))
                        .or_insert_with(|| block.clone());
                }
            }
        }
        pending
            .into_iter()
            .map(|((_, hash), block)| (block, hash))
            .collect()
    }

    /// Consensus points for the new sequence `hashes`, with the local
    /// peer's new order standing in for its old one.
    fn consensus_points(
        &self,
        me: &PeerId,
        own: &Order,
        hashes: &[Hash],
        voters: &[Voter],
        total: u64,
    ) -> [u64; CONSENSUS_LEVELS] {
        let len = hashes.len() as u64;
        let own_stake = self.stakes.stake_of(me);
        let others: Vec<(&Voter, u64)> = voters
            .iter()
            .filter(|voter| voter.peer != *me)
            .map(|voter| (voter, prefix_len(&voter.hashes, hashes) as u64))
            .collect();

        let mut points = [0u64; CONSENSUS_LEVELS];
        points[LEVEL_BLOCKS] = len;
        for level in LEVEL_PROPOSAL..CONSENSUS_LEVELS {
            // Level k counts only blocks the voter already holds at level k - 1.
            let cap = |order: &Order| {
                if level == LEVEL_PROPOSAL {
                    len
                } else {
                    order.consensus_points()[level - 1]
                }
            };
            let mut support: Vec<(u64, u64)> = others
                .iter()
                .map(|(voter, agreed)| ((*agreed).min(cap(voter.order)), voter.stake))
                .collect();
            if own_stake > 0 {
                let own_depth = if level == LEVEL_PROPOSAL {
                    len
                } else {
                    points[level - 1]
                };
                support.push((own_depth, own_stake));
            }

            let reached = supported_prefix(support, total, self.config.threshold_bps(level));
            points[level] = own.consensus_points()[level]
                .max(reached)
                .min(points[level - 1]);
        }
        points
    }
}

fn prefix_mismatch(expected: &[Hash], actual: &[Hash]) -> Option<usize> {
    expected.iter().zip(actual).position(|(a, b)| a != b)
}
