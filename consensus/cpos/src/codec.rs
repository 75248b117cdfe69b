// Copyright (c) 2024 Botho Foundation

//! Wire encoding for gossip payloads.
//!
//! Payloads are bincode over serde with a size limit, so a hostile length
//! prefix cannot force a large allocation. A decode failure is a structural
//! failure of the input and callers drop the message.

use crate::error::CposResult;
use bincode::Options;
use bth_consensus_cpos_types::{Belief, SignedBelief, SignedOrder};
use serde::{de::DeserializeOwned, Serialize};

/// Largest payload accepted by the decoders.
pub const MAX_MESSAGE_BYTES: u64 = 16 * 1024 * 1024;

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_MESSAGE_BYTES)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> CposResult<Vec<u8>> {
    Ok(options().serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CposResult<T> {
    Ok(options().deserialize(bytes)?)
}

/// Encode a signed order.
pub fn encode_order(order: &SignedOrder) -> CposResult<Vec<u8>> {
    encode(order)
}

/// Decode a signed order. The signature is not checked here.
pub fn decode_order(bytes: &[u8]) -> CposResult<SignedOrder> {
    decode(bytes)
}

/// Encode an unsigned belief.
pub fn encode_belief(belief: &Belief) -> CposResult<Vec<u8>> {
    encode(belief)
}

/// Decode an unsigned belief.
pub fn decode_belief(bytes: &[u8]) -> CposResult<Belief> {
    decode(bytes)
}

/// Encode a signed belief for gossip.
pub fn encode_signed_belief(belief: &SignedBelief) -> CposResult<Vec<u8>> {
    encode(belief)
}

/// Decode a signed belief. The signature is not checked here.
pub fn decode_signed_belief(bytes: &[u8]) -> CposResult<SignedBelief> {
    decode(bytes)
}
