//! Consensus constants (§6 "Constants that are part of consensus") and
//! node-local configuration, loaded the way `dxid-config::DxidConfig::load`
//! loads its TOML + environment-override stack.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Every constant that must match bit-for-bit across peers. These are not
/// node preferences: two peers disagreeing on any field here will diverge
/// on the very first block that exercises it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub block_interval_secs: u64,
    pub active_delegate_count: u32,
    pub max_undo_history: u64,
    /// `block_num -> block_id`, hex-encoded for serde-friendliness.
    pub checkpoints: BTreeMap<u64, String>,
    /// Matching-engine rule version by head block number (§9 "Consensus
    /// rule versioning"); ascending, first entry must be `0`.
    pub fork_heights: Vec<ForkHeightEntry>,
    pub min_market_depth: u64,
    pub max_short_apr_pct: u16,
    pub max_short_period_secs: u64,
    pub blocks_per_hour: u64,
    pub required_fee: u64,
    pub base_pay_per_block: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuleSet {
    V1,
    V2,
    V7,
    Current,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkHeightEntry {
    pub height: u64,
    pub rule_set: RuleSet,
}

impl ConsensusParams {
    /// The rule set active at `head_block_num`, selected purely by block
    /// number per §9 ("rules must not be chosen by any wall-clock
    /// condition"). `fork_heights` must be sorted ascending by `height`.
    pub fn rule_set_at(&self, head_block_num: u64) -> RuleSet {
        self.fork_heights
            .iter()
            .rev()
            .find(|e| e.height <= head_block_num)
            .map(|e| e.rule_set)
            .unwrap_or(RuleSet::V1)
    }

    /// Reference constants used by tests and as a starting point for real
    /// deployments, matching the BitShares mainnet's historical values
    /// where the original source pins them (blocks-per-hour, max short
    /// APR, depth floor).
    pub fn reference() -> Self {
        ConsensusParams {
            block_interval_secs: 30,
            active_delegate_count: 101,
            max_undo_history: 10_000,
            checkpoints: BTreeMap::new(),
            fork_heights: vec![
                ForkHeightEntry { height: 0, rule_set: RuleSet::V1 },
                ForkHeightEntry { height: 100_000, rule_set: RuleSet::V2 },
                ForkHeightEntry { height: 500_000, rule_set: RuleSet::V7 },
                ForkHeightEntry { height: 900_000, rule_set: RuleSet::Current },
            ],
            min_market_depth: 10 * 100_000,
            max_short_apr_pct: 25,
            max_short_period_secs: 60 * 60 * 24 * 30,
            blocks_per_hour: 3600 / 30,
            required_fee: 10_000,
            base_pay_per_block: 50_000,
        }
    }
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self::reference()
    }
}

/// Node-local knobs: data directory, genesis path, relay fee, block
/// production budget. Unlike `ConsensusParams` these may differ between
/// honest peers without causing a fork.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: String,
    pub genesis_path: String,
    pub relay_fee: u64,
    pub max_block_size_bytes: u64,
    pub block_production_deadline_secs: f64,
    pub consensus: ConsensusParams,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("DPCHAIN").separator("__"));
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn example() -> Self {
        NodeConfig {
            data_dir: "./data".to_string(),
            genesis_path: "./genesis.json".to_string(),
            relay_fee: 1_000,
            max_block_size_bytes: 2 * 1024 * 1024,
            block_production_deadline_secs: 2.0,
            consensus: ConsensusParams::reference(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_set_selected_by_height_not_clock() {
        let params = ConsensusParams::reference();
        assert_eq!(params.rule_set_at(0), RuleSet::V1);
        assert_eq!(params.rule_set_at(99_999), RuleSet::V1);
        assert_eq!(params.rule_set_at(100_000), RuleSet::V2);
        assert_eq!(params.rule_set_at(500_001), RuleSet::V7);
        assert_eq!(params.rule_set_at(1_000_000), RuleSet::Current);
    }
}
