use crate::ids::{AccountId, Address, AssetId};
use crate::order::OrderType;
use crate::price::Price;
use serde::{Deserialize, Serialize};

/// Rolling per-pair status, re-derived each block (§3 "Market status").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStatus {
    pub quote_asset_id: AssetId,
    pub base_asset_id: AssetId,
    pub avg_price_1h: Option<Price>,
    pub ask_depth: u64,
    pub bid_depth: u64,
    pub last_error: Option<String>,
}

impl MarketStatus {
    pub fn new(quote_asset_id: AssetId, base_asset_id: AssetId) -> Self {
        MarketStatus {
            quote_asset_id,
            base_asset_id,
            avg_price_1h: None,
            ask_depth: 0,
            bid_depth: 0,
            last_error: None,
        }
    }

    /// The lower bound a short may sell at, derived from `avg_price_1h` in
    /// the original engine's feed-bootstrap fallback.
    pub fn minimum_ask(&self) -> Option<Price> {
        self.avg_price_1h
    }

    /// The upper bound used to clamp the feed-smoothing rule (§4.E
    /// "Feed-price smoothing"), paired with `minimum_ask`.
    pub fn maximum_bid(&self) -> Option<Price> {
        self.avg_price_1h
    }
}

/// One matched trade, appended to the block's audit log (§4.E "Output
/// invariants").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTransaction {
    pub bid_type: OrderType,
    pub ask_type: OrderType,
    pub bid_owner: Address,
    pub ask_owner: Address,
    pub bid_price: Price,
    pub ask_price: Price,
    pub bid_paid: u64,
    pub bid_received: u64,
    pub ask_paid: u64,
    pub ask_received: u64,
    pub fees_collected: u64,
}

impl MarketTransaction {
    pub fn invariants_ok(&self) -> bool {
        self.bid_paid >= self.ask_received && self.ask_paid >= self.bid_received
    }
}

/// A delegate's price submission for a market-issued asset (§4.E
/// "feed price").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeed {
    pub delegate_id: AccountId,
    pub price: Price,
    pub published_at: u64,
}
