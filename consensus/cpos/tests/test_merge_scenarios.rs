// Copyright (c) 2024 Botho Foundation

//! Merge behaviour between small groups of peers.

use bth_common::logger::init_test_logging;
use bth_consensus_cpos::{
    test_utils::{gossip_round, test_block, test_network, TestLedger},
    BeliefMerge, Block, ConsensusConfig, Order, Peer, SignedBlock, SignedOrder,
};
use bth_consensus_cpos_types::Signature;

type TestPeer = Peer<TestLedger>;

fn own_order(peer: &TestPeer) -> SignedOrder {
    peer.belief()
        .get_signed_order(&peer.peer_id())
        .cloned()
        .expect("peer holds its own order")
}

fn orders_of(peers: &[TestPeer]) -> Vec<SignedOrder> {
    peers.iter().map(own_order).collect()
}

#[test]
fn test_basic_merge_adopts_proposed_block() {
    init_test_logging();
    let peers = test_network(2, ConsensusConfig::default());
    let b0 = peers[0].update_timestamp(1_000);
    let b1 = peers[1].update_timestamp(1_000);

    let x = Block::create(1_000, vec![], b1.peer_id());
    let b1 = b1.propose_block(x.clone()).unwrap();
    let b0 = b0.merge_belief(b1.belief()).unwrap();

    let order = b0.order();
    assert_eq!(order.block(0).map(|block| block.value()), Some(&x));
    assert_eq!(order.consensus_points()[0], 1);
}

#[test]
fn test_merge_without_news_returns_same_belief() {
    let peers = test_network(2, ConsensusConfig::default());
    let b1 = peers[1]
        .update_timestamp(1_000)
        .propose_block(test_block(peers[1].keypair(), 1_000, 0))
        .unwrap();
    let b0 = peers[0]
        .update_timestamp(1_000)
        .merge_belief(b1.belief())
        .unwrap();

    let again = b0.merge_beliefs(&[]).unwrap();
    assert!(again.belief().ptr_eq(b0.belief()));
    assert_eq!(again.order(), b0.order());

    let repeated = b0.merge_belief(b1.belief()).unwrap();
    assert!(repeated.belief().ptr_eq(b0.belief()));
}

#[test]
fn test_fresh_peer_merge_is_a_no_op() {
    let peers = test_network(3, ConsensusConfig::default());
    let merged = peers[0].merge_beliefs(&[]).unwrap();
    assert!(merged.belief().ptr_eq(peers[0].belief()));
}

#[test]
fn test_tie_break_is_deterministic() {
    let peers = test_network(4, ConsensusConfig::default());
    let a = test_block(peers[0].keypair(), 1_000, 0);
    let b = test_block(peers[1].keypair(), 1_000, 0);
    let pa = peers[0].update_timestamp(1_000).propose_block(a.clone()).unwrap();
    let pb = peers[1].update_timestamp(1_000).propose_block(b.clone()).unwrap();

    let observer_2 = peers[2]
        .update_timestamp(1_000)
        .merge_beliefs(&[own_order(&pa), own_order(&pb)])
        .unwrap();
    let observer_3 = peers[3]
        .update_timestamp(1_000)
        .merge_beliefs(&[own_order(&pb), own_order(&pa)])
        .unwrap();

    let expected = if a.hash() < b.hash() { a.hash() } else { b.hash() };
    let first_2 = observer_2.order().block(0).map(|block| block.hash());
    let first_3 = observer_3.order().block(0).map(|block| block.hash());
    assert_eq!(first_2, Some(expected));
    assert_eq!(first_3, Some(expected));

    // Both blocks survive; the loser is merely delayed.
    assert_eq!(observer_2.order().block_count(), 2);
    assert_eq!(observer_2.order().blocks(), observer_3.order().blocks());
}

/// Six equally staked peers: peer 0 proposes `A`, the other five hold `B`.
fn stickiness_setup() -> (TestPeer, Vec<TestPeer>, Block, Block) {
    let peers = test_network(6, ConsensusConfig::default());
    let a = test_block(peers[0].keypair(), 1_000, 0);
    let b = test_block(peers[1].keypair(), 1_000, 0);

    let p0 = peers[0].update_timestamp(1_000).propose_block(a.clone()).unwrap();
    let p1 = peers[1].update_timestamp(1_000).propose_block(b.clone()).unwrap();
    let mut others = vec![p1.clone()];
    for peer in &peers[2..] {
        others.push(peer.update_timestamp(1_000).merge_belief(p1.belief()).unwrap());
    }
    for peer in &others {
        assert_eq!(peer.order().block(0).map(|block| block.hash()), Some(b.hash()));
    }
    (p0, others, a, b)
}

#[test]
fn test_stickiness_holds_then_yields() {
    init_test_logging();
    let (p0, others, a, b) = stickiness_setup();
    let keep = p0.config().keep_proposal_time_ms;

    // Five of six peers back B, but none of them has proposed it yet and A
    // is still young: peer 0 keeps A.
    let early = p0
        .update_timestamp(1_010)
        .merge_beliefs(&orders_of(&others))
        .unwrap();
    let order = early.order();
    assert_eq!(order.block(0).map(|block| block.hash()), Some(a.hash()));
    assert_eq!(order.block(1).map(|block| block.hash()), Some(b.hash()));
    assert_eq!(order.proposal_point(), 0);

    // Still inside the hold window.
    let still = early.update_timestamp(1_000 + keep - 1).merge_beliefs(&[]).unwrap();
    assert_eq!(
        still.order().block(0).map(|block| block.hash()),
        Some(a.hash())
    );

    // Once A has been held long enough without a majority, peer 0 yields.
    let late = still.update_timestamp(1_000 + keep).merge_beliefs(&[]).unwrap();
    let order = late.order();
    assert_eq!(order.block(0).map(|block| block.hash()), Some(b.hash()));
    assert_eq!(order.block(1).map(|block| block.hash()), Some(a.hash()));
    assert_eq!(order.proposal_point(), 1);
}

#[test]
fn test_stickiness_counts_from_adoption() {
    let peers = test_network(6, ConsensusConfig::default());
    let keep = peers[0].config().keep_proposal_time_ms;
    let a = test_block(peers[1].keypair(), 1_000, 0);
    let b = test_block(peers[2].keypair(), 1_000, 0);

    let p1 = peers[1].update_timestamp(1_000).propose_block(a.clone()).unwrap();
    let p2 = peers[2].update_timestamp(1_000).propose_block(b.clone()).unwrap();
    let mut b_holders = vec![p2.clone()];
    for peer in &peers[3..] {
        b_holders.push(peer.update_timestamp(1_000).merge_belief(p2.belief()).unwrap());
    }

    // Peer 0 first hears of A long after it was created.
    let p0 = peers[0].update_timestamp(5_000).merge_belief(p1.belief()).unwrap();
    assert_eq!(p0.order().block(0).map(|block| block.hash()), Some(a.hash()));

    // A is old, but peer 0 has only just adopted it, so it holds on.
    let early = p0
        .update_timestamp(5_010)
        .merge_beliefs(&orders_of(&b_holders))
        .unwrap();
    assert_eq!(
        early.order().block(0).map(|block| block.hash()),
        Some(a.hash())
    );

    let late = early.update_timestamp(5_000 + keep).merge_beliefs(&[]).unwrap();
    assert_eq!(
        late.order().block(0).map(|block| block.hash()),
        Some(b.hash())
    );
}

#[test]
fn test_stickiness_yields_to_committed_majority() {
    let (p0, others, _a, b) = stickiness_setup();

    // The five B holders gossip among themselves until B is proposed.
    let others = gossip_round(&others, &TestLedger, 1_000).unwrap();
    for peer in &others {
        assert_eq!(peer.order().proposal_point(), 1);
    }

    let switched = p0
        .update_timestamp(1_010)
        .merge_beliefs(&orders_of(&others))
        .unwrap();
    assert_eq!(
        switched.order().block(0).map(|block| block.hash()),
        Some(b.hash())
    );
}

#[test]
fn test_corrupted_signature_is_excluded() {
    let peers = test_network(3, ConsensusConfig::default());
    let p1 = peers[1]
        .update_timestamp(1_000)
        .propose_block(test_block(peers[1].keypair(), 1_000, 0))
        .unwrap();
    let genuine = own_order(&p1);

    let mut bytes = genuine.signature().to_bytes();
    bytes[10] ^= 0xff;
    let forged = SignedOrder::from_parts(
        genuine.value().clone(),
        *genuine.signer(),
        Signature::from_bytes(&bytes),
    );

    let p0 = peers[0].update_timestamp(1_000);
    let outcome = BeliefMerge::create(
        p0.belief(),
        p0.keypair(),
        p0.timestamp(),
        p0.state(),
        p0.config(),
    )
    .merge_detailed(&[forged.clone()])
    .unwrap();
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.accepted, 0);
    assert!(outcome.belief.ptr_eq(p0.belief()));

    // Alongside a genuine order from another peer, only the genuine one votes.
    let p2 = peers[2]
        .update_timestamp(1_000)
        .propose_block(test_block(peers[2].keypair(), 1_000, 0))
        .unwrap();
    let merged = p0.merge_beliefs(&[forged, own_order(&p2)]).unwrap();
    let order = merged.order();
    assert_eq!(order.block_count(), 1);
    assert_eq!(order.blocks()[0].proposer(), &p2.peer_id());
    assert!(merged.belief().get_order(&p1.peer_id()).is_none());
}

#[test]
fn test_block_signed_for_another_proposer_is_rejected() {
    let peers = test_network(3, ConsensusConfig::default());

    // Peer 1 signs a block that names peer 2 as its proposer.
    let spoofed = SignedBlock::sign(
        peers[1].keypair(),
        test_block(peers[2].keypair(), 1_000, 0),
    );
    let order = SignedOrder::sign(
        peers[1].keypair(),
        Order::create()
            .with_blocks(vec![spoofed])
            .with_timestamp(1_000),
    );

    let p0 = peers[0].update_timestamp(1_000);
    let outcome = BeliefMerge::create(
        p0.belief(),
        p0.keypair(),
        p0.timestamp(),
        p0.state(),
        p0.config(),
    )
    .merge_detailed(&[order.clone()])
    .unwrap();
    assert_eq!(outcome.rejected, 1);
    assert!(outcome.belief.ptr_eq(p0.belief()));

    let merged = p0.merge_beliefs(&[order]).unwrap();
    assert_eq!(merged.order().block_count(), 0);
    assert!(merged.belief().get_order(&peers[1].peer_id()).is_none());
}

#[test]
fn test_future_orders_are_deferred_until_clock_catches_up() {
    let peers = test_network(2, ConsensusConfig::default());
    let p1 = peers[1]
        .update_timestamp(2_000)
        .propose_block(test_block(peers[1].keypair(), 2_000, 0))
        .unwrap();

    let p0 = peers[0]
        .update_timestamp(1_000)
        .merge_belief(p1.belief())
        .unwrap();
    assert_eq!(p0.order().block_count(), 0);
    assert_eq!(p0.deferred().len(), 1);

    // Nothing new arrives, but the deferred order is retried.
    let p0 = p0.update_timestamp(2_000).merge_beliefs(&[]).unwrap();
    assert_eq!(p0.order().block_count(), 1);
    assert!(p0.deferred().is_empty());
}

#[test]
fn test_deferred_orders_keep_only_newest_per_signer() {
    let peers = test_network(2, ConsensusConfig::default());
    let first = peers[1]
        .update_timestamp(2_000)
        .propose_block(test_block(peers[1].keypair(), 2_000, 0))
        .unwrap();
    let second = first
        .propose_block(test_block(first.keypair(), 2_000, 1))
        .unwrap();

    let p0 = peers[0]
        .update_timestamp(1_000)
        .merge_beliefs(&[own_order(&first)])
        .unwrap()
        .merge_beliefs(&[own_order(&second)])
        .unwrap();
    assert_eq!(p0.deferred().len(), 1);
    assert_eq!(p0.deferred()[0], own_order(&second));
}

#[test]
fn test_signed_belief_gossip() {
    let peers = test_network(2, ConsensusConfig::default());
    let p1 = peers[1]
        .update_timestamp(1_000)
        .propose_block(test_block(peers[1].keypair(), 1_000, 0))
        .unwrap();

    let gossip = p1.sign_belief();
    let p0 = peers[0]
        .update_timestamp(1_000)
        .merge_signed_belief(&gossip)
        .unwrap();
    assert_eq!(p0.order().block_count(), 1);
}
