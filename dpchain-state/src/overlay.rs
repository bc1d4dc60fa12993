//! The overlay shape shared by a pending state's local writes and by the
//! undo record those writes produce (§3 "Undo state", §4.C).

use dpchain_core::{
    Account, AccountId, Asset, AssetId, Balance, BalanceId, Block, BlockId, BlockRecord,
    CoverPosition, DelegateSlate, EvaluationRecord, ForkNode, MarketStatus, Order, OrderKey,
    SlateId, TransactionId, TransactionLocation,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every table the chain state store exposes, shaped as `key -> Option<value>`
/// where `None` represents a tombstone (the key did not exist, or was
/// removed). The same shape serves two purposes: as a pending state's local
/// write buffer, and — once built from the values a write's *parent* held
/// beforehand — as the undo record for a committed block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Overlay {
    pub assets: BTreeMap<AssetId, Option<Asset>>,
    pub accounts: BTreeMap<AccountId, Option<Account>>,
    pub account_names: BTreeMap<String, Option<AccountId>>,
    pub balances: BTreeMap<BalanceId, Option<Balance>>,
    pub slates: BTreeMap<SlateId, Option<DelegateSlate>>,
    pub bids: BTreeMap<OrderKey, Option<Order>>,
    pub asks: BTreeMap<OrderKey, Option<Order>>,
    pub shorts: BTreeMap<OrderKey, Option<Order>>,
    pub covers: BTreeMap<OrderKey, Option<CoverPosition>>,
    pub market_status: BTreeMap<(AssetId, AssetId), Option<MarketStatus>>,
    pub properties: BTreeMap<String, Option<serde_json::Value>>,
    pub accumulated_fees: BTreeMap<AssetId, Option<u64>>,
    pub fork_nodes: BTreeMap<BlockId, Option<ForkNode>>,
    pub block_records: BTreeMap<BlockId, Option<BlockRecord>>,
    pub blocks: BTreeMap<BlockId, Option<Block>>,
    pub transaction_locations: BTreeMap<TransactionId, Option<TransactionLocation>>,
    pub evaluation_records: BTreeMap<TransactionId, Option<EvaluationRecord>>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
            && self.accounts.is_empty()
            && self.account_names.is_empty()
            && self.balances.is_empty()
            && self.slates.is_empty()
            && self.bids.is_empty()
            && self.asks.is_empty()
            && self.shorts.is_empty()
            && self.covers.is_empty()
            && self.market_status.is_empty()
            && self.properties.is_empty()
            && self.accumulated_fees.is_empty()
            && self.fork_nodes.is_empty()
            && self.block_records.is_empty()
            && self.blocks.is_empty()
            && self.transaction_locations.is_empty()
            && self.evaluation_records.is_empty()
    }

    /// Plays every entry into `store`. Used both by `apply_changes()` (writes
    /// flowing down into the parent) and by block-pop (an undo record played
    /// back to reverse a block).
    pub fn apply_to(&self, store: &mut dyn crate::store::ChainStore) {
        for (&k, v) in &self.assets {
            store.store_asset(k, v.clone());
        }
        for (&k, v) in &self.accounts {
            store.store_account(k, v.clone());
        }
        for (k, v) in &self.account_names {
            store.store_account_name_index(k, *v);
        }
        for (&k, v) in &self.balances {
            store.store_balance(k, v.clone());
        }
        for (&k, v) in &self.slates {
            store.store_slate(k, v.clone());
        }
        for (&k, v) in &self.bids {
            store.store_bid(k, v.clone());
        }
        for (&k, v) in &self.asks {
            store.store_ask(k, v.clone());
        }
        for (&k, v) in &self.shorts {
            store.store_short(k, v.clone());
        }
        for (&k, v) in &self.covers {
            store.store_collateral(k, v.clone());
        }
        for (&(quote, base), v) in &self.market_status {
            store.store_market_status(quote, base, v.clone());
        }
        for (k, v) in &self.properties {
            store.store_property(k, v.clone());
        }
        for (&k, v) in &self.accumulated_fees {
            store.store_accumulated_fees(k, v.unwrap_or(0));
        }
        for (&k, v) in &self.fork_nodes {
            store.store_fork_node(k, v.clone());
        }
        for (&k, v) in &self.block_records {
            store.store_block_record(k, v.clone());
        }
        for (&k, v) in &self.blocks {
            store.store_full_block(k, v.clone());
        }
        for (&k, v) in &self.transaction_locations {
            store.store_transaction_location(k, *v);
        }
        for (&k, v) in &self.evaluation_records {
            store.store_evaluation_record(k, v.clone());
        }
    }
}
