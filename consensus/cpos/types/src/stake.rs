// Copyright (c) 2024 Botho Foundation

//! Stake weights read by the merge.

use bth_common::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only voting weights derived from agreed ledger state.
pub trait StakeSnapshot {
    /// Stake held by `peer`. Unknown peers hold zero.
    fn stake_of(&self, peer: &PeerId) -> u64;

    /// Sum of all stake.
    fn total_stake(&self) -> u64;
}

/// A fixed stake table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeTable {
    stakes: BTreeMap<PeerId, u64>,
    total: u64,
}

impl StakeTable {
    /// Build a table from `(peer, stake)` pairs. Repeated peers accumulate.
    pub fn new(stakes: impl IntoIterator<Item = (PeerId, u64)>) -> Self {
        let mut table = Self::default();
        for (peer, stake) in stakes {
            table.add(peer, stake);
        }
        table
    }

    /// Equal stake for each of `peers`.
    pub fn uniform(peers: impl IntoIterator<Item = PeerId>, stake: u64) -> Self {
        Self::new(peers.into_iter().map(|peer| (peer, stake)))
    }

    /// Add `stake` to `peer`, saturating.
    pub fn add(&mut self, peer: PeerId, stake: u64) {
        let entry = self.stakes.entry(peer).or_default();
        *entry = entry.saturating_add(stake);
        self.total = self.total.saturating_add(stake);
    }

    /// Iterate over `(peer, stake)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &u64)> {
        self.stakes.iter()
    }
}

impl StakeSnapshot for StakeTable {
    fn stake_of(&self, peer: &PeerId) -> u64 {
        self.stakes.get(peer).copied().unwrap_or(0)
    }

    fn total_stake(&self) -> u64 {
        self.total
    }
}

impl<S: StakeSnapshot + ?Sized> StakeSnapshot for &S {
    fn stake_of(&self, peer: &PeerId) -> u64 {
        (**self).stake_of(peer)
    }

    fn total_stake(&self) -> u64 {
        (**self).total_stake()
    }
}

impl FromIterator<(PeerId, u64)> for StakeTable {
    fn from_iter<I: IntoIterator<Item = (PeerId, u64)>>(iter: I) -> Self {
        Self::new(iter)
    }
}
