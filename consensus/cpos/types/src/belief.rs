// Copyright (c) 2024 Botho Foundation

//! The gossip unit: every known peer's latest signed order.

use crate::{
    hash::{ContentHasher, Hash},
    order::{Order, SignedOrder},
    signed::{Signable, Signed},
};
use bth_common::PeerId;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// An immutable map from peer identity to that peer's latest signed order.
///
/// Updating a belief produces a new value. The map sits behind an `Arc`, so
/// an unchanged belief can be handed back as the very same reference and
/// compared with [`Belief::ptr_eq`].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Belief {
    orders: Arc<BTreeMap<PeerId, SignedOrder>>,
}

/// A belief signed by the peer that holds it.
pub type SignedBelief = Signed<Belief>;

impl Belief {
    /// Build a belief keyed by each order's signer. Later entries for the
    /// same signer overwrite earlier ones.
    pub fn create(orders: impl IntoIterator<Item = SignedOrder>) -> Self {
        let orders = orders
            .into_iter()
            .map(|order| (*order.signer(), order))
            .collect();
        Self {
            orders: Arc::new(orders),
        }
    }

    /// The order known for `peer`, if any.
    pub fn get_order(&self, peer: &PeerId) -> Option<&Order> {
        self.orders.get(peer).map(|signed| signed.value())
    }

    /// The signed order known for `peer`, if any.
    pub fn get_signed_order(&self, peer: &PeerId) -> Option<&SignedOrder> {
        self.orders.get(peer)
    }

    /// Read-only view of the whole map.
    pub fn orders(&self) -> &BTreeMap<PeerId, SignedOrder> {
        &self.orders
    }

    /// Number of peers known.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// True if no peer is known.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// A copy with `order` stored under its signer.
    pub fn with_order(&self, order: SignedOrder) -> Self {
        let mut orders = (*self.orders).clone();
        orders.insert(*order.signer(), order);
        Self {
            orders: Arc::new(orders),
        }
    }

    /// Whether both beliefs are the same reference.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.orders, &other.orders)
    }
}

impl FromIterator<SignedOrder> for Belief {
    fn from_iter<I: IntoIterator<Item = SignedOrder>>(iter: I) -> Self {
        Self::create(iter)
    }
}

impl Signable for Belief {
    const DOMAIN: &'static [u8] = b"bth-cpos-belief";

    fn content_hash(&self) -> Hash {
        let mut hasher = ContentHasher::new(Self::DOMAIN);
        hasher.u64(self.orders.len() as u64);
        for (peer, order) in self.orders.iter() {
            hasher
                .bytes(peer.as_ref())
                .hash(&order.hash())
                .bytes(&order.signature().to_bytes());
        }
        hasher.finalize()
    }
}

impl fmt::Debug for Belief {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.orders.iter().map(|(peer, order)| (peer, order.value())))
            .finish()
    }
}
