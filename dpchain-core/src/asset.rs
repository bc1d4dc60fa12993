use crate::ids::{AccountId, AssetId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Issuer {
    Account(AccountId),
    /// A market-issued (BitAsset-style) asset has no issuer account; supply
    /// changes only through market settlement.
    MarketIssued,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub symbol: String,
    pub name: String,
    pub precision: u8,
    pub issuer: Issuer,
    pub current_share_supply: u64,
    pub maximum_share_supply: u64,
    pub collected_fees: u64,
}

impl Asset {
    pub fn is_market_issued(&self) -> bool {
        matches!(self.issuer, Issuer::MarketIssued)
    }

    pub fn invariant_ok(&self) -> bool {
        self.current_share_supply <= self.maximum_share_supply
    }

    /// Room left to issue before hitting `maximum_share_supply`.
    pub fn issuable_remaining(&self) -> u64 {
        self.maximum_share_supply.saturating_sub(self.current_share_supply)
    }
}

pub fn base_asset() -> Asset {
    Asset {
        id: crate::ids::BASE_ASSET_ID,
        symbol: "BASE".to_string(),
        name: "Base asset".to_string(),
        precision: 5,
        issuer: Issuer::Account(0),
        current_share_supply: 0,
        maximum_share_supply: u64::MAX,
        collected_fees: 0,
    }
}
