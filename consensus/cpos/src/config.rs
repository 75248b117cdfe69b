// Copyright (c) 2024 Botho Foundation

//! Consensus parameters.

use bth_consensus_cpos_types::{
    DEFAULT_CONSENSUS_THRESHOLD_BPS, DEFAULT_KEEP_PROPOSAL_TIME_MS,
    DEFAULT_PROPOSAL_THRESHOLD_BPS, LEVEL_PROPOSAL, THRESHOLD_DENOMINATOR_BPS,
};
use displaydoc::Display;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use thiserror::Error;

/// Errors loading or validating a [`ConsensusConfig`].
#[derive(Debug, Display, Error)]
pub enum ConfigError {
    /// Failed to read config file: {0}
    Io(#[from] std::io::Error),

    /// Failed to parse config: {0}
    Parse(#[from] toml::de::Error),

    /// Proposal threshold {0} bps must be at least half of all stake
    ProposalThresholdTooLow(u32),

    /// Threshold {0} bps must be below 10000
    ThresholdTooHigh(u32),

    /// Consensus threshold {consensus} bps is below proposal threshold {proposal} bps
    ConsensusBelowProposal {
        /// Proposal threshold
        proposal: u32,
        /// Consensus threshold
        consensus: u32,
    },
}

/// Tunable parameters of the merge.
///
/// Thresholds are fractions of total stake in basis points; support must
/// strictly exceed them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsensusConfig {
    /// Support needed to advance the proposal point.
    pub proposal_threshold_bps: u32,

    /// Support needed to advance every level above the proposal point.
    pub consensus_threshold_bps: u32,

    /// How long (ms of block age) a peer holds an unconfirmed proposal
    /// before it may switch to a plurality winner.
    pub keep_proposal_time_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            proposal_threshold_bps: DEFAULT_PROPOSAL_THRESHOLD_BPS,
            consensus_threshold_bps: DEFAULT_CONSENSUS_THRESHOLD_BPS,
            keep_proposal_time_ms: DEFAULT_KEEP_PROPOSAL_TIME_MS,
        }
    }
}

impl ConsensusConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Check the thresholds describe a usable protocol.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for threshold in [self.proposal_threshold_bps, self.consensus_threshold_bps] {
            if threshold >= THRESHOLD_DENOMINATOR_BPS {
                return Err(ConfigError::ThresholdTooHigh(threshold));
            }
        }
        if self.proposal_threshold_bps < THRESHOLD_DENOMINATOR_BPS / 2 {
            return Err(ConfigError::ProposalThresholdTooLow(
                self.proposal_threshold_bps,
            ));
        }
        if self.consensus_threshold_bps < self.proposal_threshold_bps {
            return Err(ConfigError::ConsensusBelowProposal {
                proposal: self.proposal_threshold_bps,
                consensus: self.consensus_threshold_bps,
            });
        }
        Ok(())
    }

    /// Threshold that support must exceed to advance `level`.
    pub fn threshold_bps(&self, level: usize) -> u32 {
        if level <= LEVEL_PROPOSAL {
            self.proposal_threshold_bps
        } else {
            self.consensus_threshold_bps
        }
    }
}
