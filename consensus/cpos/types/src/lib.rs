// Copyright (c) 2024 Botho Foundation

//! Value types shared by the CPoS consensus protocol.
//!
//! Everything here is immutable: updating an order or a belief returns a new
//! value. Signed payloads are reference counted so copies stay cheap.

#![deny(missing_docs)]

mod belief;
mod block;
mod constants;
mod error;
mod hash;
mod order;
mod signed;
mod stake;

pub use crate::{
    belief::{Belief, SignedBelief},
    block::{Block, SignedBlock, SignedTransaction, Transaction},
    constants::*,
    error::OrderError,
    hash::{ContentHasher, Hash},
    order::{Order, SignedOrder},
    signed::{KeyPair, Signable, Signature, Signed},
    stake::{StakeSnapshot, StakeTable},
};
pub use bth_common::PeerId;
