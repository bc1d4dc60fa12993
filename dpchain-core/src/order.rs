use crate::ids::Address;
use crate::price::Price;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Bid,
    Ask,
    Short,
    Cover,
}

/// Storage key for an order: `(price, owner_address)`, per §3. Ordering is
/// ascending by price then owner; callers needing descending iteration
/// (bids, shorts) read the map in reverse rather than storing a `Reverse`
/// wrapper, matching the teacher's order-book idiom of one `BTreeMap` per
/// side read in the direction that side needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub price: Price,
    pub owner: Address,
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.price.cmp(&other.price).then_with(|| self.owner.cmp(&other.owner))
    }
}

/// A bid, ask, or short order. `balance` is the remaining amount in the
/// unit the order consumes: base-asset units for bids and for a short's
/// collateral draw, quote-asset units for asks, matching §3's "Order"
/// definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_type: OrderType,
    pub key: OrderKey,
    pub balance: u64,
    /// Optional limit recorded on short orders only (§4.D bid/ask/short).
    pub short_limit: Option<Price>,
}


/// A cover order: an outstanding debt position collateralized in base
/// asset, created by matching a short (§3 "Order (bid, ask, short,
/// cover)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverPosition {
    pub key: OrderKey,
    /// Debt owed in quote asset.
    pub payoff_balance: u64,
    pub collateral_balance: u64,
    /// Origination APR, in basis points, capped by the configured ceiling.
    pub interest_apr_bps: u16,
    pub origin_timestamp: u64,
    /// Force-liquidatable once this timestamp passes (§4.E "Margin-call
    /// trigger").
    pub expiration: u64,
}

impl CoverPosition {
    pub fn call_price(&self, quote_asset_id: u32, base_asset_id: u32) -> Price {
        // call price = debt / (2/3 * collateral), per §4.E's 3:1 initial
        // collateralization rule restated as a call-price formula.
        let effective_collateral = (self.collateral_balance as u128 * 2) / 3;
        let denom = effective_collateral.max(1) as u64;
        Price::new(self.payoff_balance, denom, quote_asset_id, base_asset_id)
    }
}
