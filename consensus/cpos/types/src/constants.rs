// Copyright (c) 2024 Botho Foundation

//! Consensus levels and the default protocol parameters.

/// Number of entries in an order's consensus point vector.
pub const CONSENSUS_LEVELS: usize = 4;

/// Level 0: blocks this peer has locally accepted into its order.
pub const LEVEL_BLOCKS: usize = 0;

/// Level 1: the proposal point, backed by a stake majority.
pub const LEVEL_PROPOSAL: usize = 1;

/// Level 2: agreement that a majority has proposed.
pub const LEVEL_CONSENSUS: usize = 2;

/// Deepest level. Blocks below it are final and may be executed.
pub const LEVEL_FINALITY: usize = CONSENSUS_LEVELS - 1;

/// Basis-point denominator for stake thresholds.
pub const THRESHOLD_DENOMINATOR_BPS: u32 = 10_000;

/// Default support needed to advance the proposal point: more than 50%.
pub const DEFAULT_PROPOSAL_THRESHOLD_BPS: u32 = 5_000;

/// Default support needed to advance levels above the proposal point:
/// more than two thirds.
pub const DEFAULT_CONSENSUS_THRESHOLD_BPS: u32 = 6_667;

/// Default minimum age (ms) of a held block before a peer may abandon it
/// for a plurality winner that has not yet been proposed.
pub const DEFAULT_KEEP_PROPOSAL_TIME_MS: u64 = 100;

/// Whether `support` strictly exceeds `threshold_bps` of `total`.
///
/// Computed in 128-bit integers so every peer reaches the same answer for
/// any stake distribution.
pub fn exceeds_threshold(support: u64, total: u64, threshold_bps: u32) -> bool {
    if total == 0 {
        return false;
    }
    (support as u128) * (THRESHOLD_DENOMINATOR_BPS as u128)
        > (total as u128) * (threshold_bps as u128)
}
