//! Pending chain state (§4.C): a copy-on-write overlay over a parent
//! `ChainStore`. Reads that miss locally delegate to the parent and are not
//! cached; writes are captured in `self.writes` and only reach the parent
//! once `apply_changes()` runs.

use crate::overlay::Overlay;
use crate::store::ChainStore;
use dpchain_core::{
    Account, AccountId, Asset, AssetId, Balance, BalanceId, Block, BlockId, BlockRecord,
    CoverPosition, DelegateSlate, EvaluationRecord, ForkNode, MarketStatus, Order, OrderKey,
    SlateId, TransactionId, TransactionLocation,
};
use std::collections::{BTreeMap, BTreeSet};

pub struct PendingChainState<'p> {
    parent: &'p mut dyn ChainStore,
    writes: Overlay,
    dirty_markets: BTreeSet<(AssetId, AssetId)>,
    now_override: Option<u64>,
}

impl<'p> PendingChainState<'p> {
    pub fn new(parent: &'p mut dyn ChainStore) -> Self {
        PendingChainState {
            parent,
            writes: Overlay::default(),
            dirty_markets: BTreeSet::new(),
            now_override: None,
        }
    }

    fn mark_dirty(&mut self, quote: AssetId, base: AssetId) {
        self.dirty_markets.insert((quote, base));
    }

    /// §4.C: "`get_undo_state(out)` populates `out` with, for every key this
    /// pending state wrote, the value the parent held before (or the
    /// tombstone if absent)." Queried fresh against the parent, never cached.
    pub fn get_undo_state(&self) -> Overlay {
        let mut undo = Overlay::default();
        for &k in self.writes.assets.keys() {
            undo.assets.insert(k, self.parent.get_asset(k));
        }
        for &k in self.writes.accounts.keys() {
            undo.accounts.insert(k, self.parent.get_account(k));
        }
        for k in self.writes.account_names.keys() {
            undo.account_names
                .insert(k.clone(), self.parent.get_account_id_by_name(k));
        }
        for &k in self.writes.balances.keys() {
            undo.balances.insert(k, self.parent.get_balance(k));
        }
        for &k in self.writes.slates.keys() {
            undo.slates.insert(k, self.parent.get_slate(k));
        }
        for &k in self.writes.bids.keys() {
            undo.bids.insert(k, self.parent.get_bid(k));
        }
        for &k in self.writes.asks.keys() {
            undo.asks.insert(k, self.parent.get_ask(k));
        }
        for &k in self.writes.shorts.keys() {
            undo.shorts.insert(k, self.parent.get_short(k));
        }
        for &k in self.writes.covers.keys() {
            undo.covers.insert(k, self.parent.get_collateral(k));
        }
        for &(quote, base) in self.writes.market_status.keys() {
            undo.market_status
                .insert((quote, base), self.parent.get_market_status(quote, base));
        }
        for k in self.writes.properties.keys() {
            undo.properties.insert(k.clone(), self.parent.get_property(k));
        }
        for &k in self.writes.accumulated_fees.keys() {
            undo.accumulated_fees.insert(k, Some(self.parent.get_accumulated_fees(k)));
        }
        for &k in self.writes.fork_nodes.keys() {
            undo.fork_nodes.insert(k, self.parent.get_fork_node(k));
        }
        for &k in self.writes.block_records.keys() {
            undo.block_records.insert(k, self.parent.get_block_record(k));
        }
        for &k in self.writes.blocks.keys() {
            undo.blocks.insert(k, self.parent.get_full_block(k));
        }
        for &k in self.writes.transaction_locations.keys() {
            undo.transaction_locations
                .insert(k, self.parent.get_transaction_location(k));
        }
        for &k in self.writes.evaluation_records.keys() {
            undo.evaluation_records
                .insert(k, self.parent.get_evaluation_record(k));
        }
        undo
    }

    /// §4.C: "`apply_changes()` plays every local mutation into the parent
    /// exactly once; repeated application is a no-op."
    pub fn apply_changes(&mut self) {
        if self.writes.is_empty() {
            return;
        }
        self.writes.apply_to(self.parent);
        tracing::debug!(dirty_markets = self.dirty_markets.len(), "pending state applied to parent");
        self.writes = Overlay::default();
        self.dirty_markets.clear();
    }

    fn merge_orders(
        parent_items: Vec<(OrderKey, Order)>,
        writes: &BTreeMap<OrderKey, Option<Order>>,
        quote: AssetId,
        base: AssetId,
    ) -> Vec<(OrderKey, Order)> {
        let mut merged: BTreeMap<OrderKey, Order> = parent_items.into_iter().collect();
        for (k, v) in writes {
            if k.price.quote_asset_id != quote || k.price.base_asset_id != base {
                continue;
            }
            match v {
                Some(val) => {
                    merged.insert(*k, val.clone());
                }
                None => {
                    merged.remove(k);
                }
            }
        }
        merged.into_iter().collect()
    }
}

impl<'p> ChainStore for PendingChainState<'p> {
    fn get_asset(&self, id: AssetId) -> Option<Asset> {
        match self.writes.assets.get(&id) {
            Some(v) => v.clone(),
            None => self.parent.get_asset(id),
        }
    }
    fn store_asset(&mut self, id: AssetId, asset: Option<Asset>) {
        self.writes.assets.insert(id, asset);
    }

    fn get_account(&self, id: AccountId) -> Option<Account> {
        match self.writes.accounts.get(&id) {
            Some(v) => v.clone(),
            None => self.parent.get_account(id),
        }
    }
    fn store_account(&mut self, id: AccountId, account: Option<Account>) {
        self.writes.accounts.insert(id, account);
    }
    fn get_account_id_by_name(&self, name: &str) -> Option<AccountId> {
        match self.writes.account_names.get(name) {
            Some(v) => *v,
            None => self.parent.get_account_id_by_name(name),
        }
    }
    fn store_account_name_index(&mut self, name: &str, id: Option<AccountId>) {
        self.writes.account_names.insert(name.to_string(), id);
    }
    fn iter_accounts(&self) -> Vec<Account> {
        let mut merged: BTreeMap<AccountId, Account> =
            self.parent.iter_accounts().into_iter().map(|a| (a.id, a)).collect();
        for (k, v) in &self.writes.accounts {
            match v {
                Some(val) => {
                    merged.insert(*k, val.clone());
                }
                None => {
                    merged.remove(k);
                }
            }
        }
        merged.into_values().collect()
    }

    fn get_balance(&self, id: BalanceId) -> Option<Balance> {
        match self.writes.balances.get(&id) {
            Some(v) => v.clone(),
            None => self.parent.get_balance(id),
        }
    }
    fn store_balance(&mut self, id: BalanceId, balance: Option<Balance>) {
        self.writes.balances.insert(id, balance);
    }

    fn get_slate(&self, id: SlateId) -> Option<DelegateSlate> {
        match self.writes.slates.get(&id) {
            Some(v) => v.clone(),
            None => self.parent.get_slate(id),
        }
    }
    fn store_slate(&mut self, id: SlateId, slate: Option<DelegateSlate>) {
        self.writes.slates.insert(id, slate);
    }

    fn get_bid(&self, key: OrderKey) -> Option<Order> {
        match self.writes.bids.get(&key) {
            Some(v) => v.clone(),
            None => self.parent.get_bid(key),
        }
    }
    fn store_bid(&mut self, key: OrderKey, order: Option<Order>) {
        self.mark_dirty(key.price.quote_asset_id, key.price.base_asset_id);
        self.writes.bids.insert(key, order);
    }
    fn get_ask(&self, key: OrderKey) -> Option<Order> {
        match self.writes.asks.get(&key) {
            Some(v) => v.clone(),
            None => self.parent.get_ask(key),
        }
    }
    fn store_ask(&mut self, key: OrderKey, order: Option<Order>) {
        self.mark_dirty(key.price.quote_asset_id, key.price.base_asset_id);
        self.writes.asks.insert(key, order);
    }
    fn get_short(&self, key: OrderKey) -> Option<Order> {
        match self.writes.shorts.get(&key) {
            Some(v) => v.clone(),
            None => self.parent.get_short(key),
        }
    }
    fn store_short(&mut self, key: OrderKey, order: Option<Order>) {
        self.mark_dirty(key.price.quote_asset_id, key.price.base_asset_id);
        self.writes.shorts.insert(key, order);
    }
    fn get_collateral(&self, key: OrderKey) -> Option<CoverPosition> {
        match self.writes.covers.get(&key) {
            Some(v) => v.clone(),
            None => self.parent.get_collateral(key),
        }
    }
    fn store_collateral(&mut self, key: OrderKey, cover: Option<CoverPosition>) {
        self.mark_dirty(key.price.quote_asset_id, key.price.base_asset_id);
        self.writes.covers.insert(key, cover);
    }

    fn iter_bids(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)> {
        Self::merge_orders(self.parent.iter_bids(quote, base), &self.writes.bids, quote, base)
    }
    fn iter_asks(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)> {
        Self::merge_orders(self.parent.iter_asks(quote, base), &self.writes.asks, quote, base)
    }
    fn iter_shorts(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)> {
        Self::merge_orders(self.parent.iter_shorts(quote, base), &self.writes.shorts, quote, base)
    }
    fn iter_collateral(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, CoverPosition)> {
        let mut merged: BTreeMap<OrderKey, CoverPosition> =
            self.parent.iter_collateral(quote, base).into_iter().collect();
        for (k, v) in &self.writes.covers {
            if k.price.quote_asset_id != quote || k.price.base_asset_id != base {
                continue;
            }
            match v {
                Some(val) => {
                    merged.insert(*k, val.clone());
                }
                None => {
                    merged.remove(k);
                }
            }
        }
        merged.into_iter().collect()
    }

    fn get_market_status(&self, quote: AssetId, base: AssetId) -> Option<MarketStatus> {
        match self.writes.market_status.get(&(quote, base)) {
            Some(v) => v.clone(),
            None => self.parent.get_market_status(quote, base),
        }
    }
    fn store_market_status(&mut self, quote: AssetId, base: AssetId, status: Option<MarketStatus>) {
        self.mark_dirty(quote, base);
        self.writes.market_status.insert((quote, base), status);
    }

    fn get_property(&self, key: &str) -> Option<serde_json::Value> {
        match self.writes.properties.get(key) {
            Some(v) => v.clone(),
            None => self.parent.get_property(key),
        }
    }
    fn store_property(&mut self, key: &str, value: Option<serde_json::Value>) {
        self.writes.properties.insert(key.to_string(), value);
    }

    fn get_accumulated_fees(&self, asset_id: AssetId) -> u64 {
        match self.writes.accumulated_fees.get(&asset_id) {
            Some(v) => v.unwrap_or(0),
            None => self.parent.get_accumulated_fees(asset_id),
        }
    }
    fn store_accumulated_fees(&mut self, asset_id: AssetId, amount: u64) {
        self.writes.accumulated_fees.insert(asset_id, Some(amount));
    }

    fn get_fork_node(&self, id: BlockId) -> Option<ForkNode> {
        match self.writes.fork_nodes.get(&id) {
            Some(v) => v.clone(),
            None => self.parent.get_fork_node(id),
        }
    }
    fn store_fork_node(&mut self, id: BlockId, node: Option<ForkNode>) {
        self.writes.fork_nodes.insert(id, node);
    }

    fn get_block_record(&self, id: BlockId) -> Option<BlockRecord> {
        match self.writes.block_records.get(&id) {
            Some(v) => v.clone(),
            None => self.parent.get_block_record(id),
        }
    }
    fn store_block_record(&mut self, id: BlockId, record: Option<BlockRecord>) {
        self.writes.block_records.insert(id, record);
    }
    fn get_block_ids_at(&self, block_num: u64) -> Vec<BlockId> {
        self.parent.get_block_ids_at(block_num)
    }
    fn store_block_ids_at(&mut self, block_num: u64, ids: Vec<BlockId>) {
        self.parent.store_block_ids_at(block_num, ids);
    }

    fn get_full_block(&self, id: BlockId) -> Option<Block> {
        match self.writes.blocks.get(&id) {
            Some(v) => v.clone(),
            None => self.parent.get_full_block(id),
        }
    }
    fn store_full_block(&mut self, id: BlockId, block: Option<Block>) {
        self.writes.blocks.insert(id, block);
    }

    fn get_transaction_location(&self, id: TransactionId) -> Option<TransactionLocation> {
        match self.writes.transaction_locations.get(&id) {
            Some(v) => *v,
            None => self.parent.get_transaction_location(id),
        }
    }
    fn store_transaction_location(&mut self, id: TransactionId, loc: Option<TransactionLocation>) {
        self.writes.transaction_locations.insert(id, loc);
    }

    fn get_evaluation_record(&self, id: TransactionId) -> Option<EvaluationRecord> {
        match self.writes.evaluation_records.get(&id) {
            Some(v) => v.clone(),
            None => self.parent.get_evaluation_record(id),
        }
    }
    fn store_evaluation_record(&mut self, id: TransactionId, rec: Option<EvaluationRecord>) {
        self.writes.evaluation_records.insert(id, rec);
    }

    fn get_undo_state(&self, block_id: BlockId) -> Option<Overlay> {
        self.parent.get_undo_state(block_id)
    }
    fn store_undo_state(&mut self, block_id: BlockId, undo: Option<Overlay>) {
        self.parent.store_undo_state(block_id, undo);
    }

    fn now(&self) -> u64 {
        self.now_override.unwrap_or_else(|| self.parent.now())
    }
    fn set_now(&mut self, now: u64) {
        self.now_override = Some(now);
    }

    fn get_dirty_markets(&self) -> Vec<(AssetId, AssetId)> {
        self.dirty_markets.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChainStore;

    #[test]
    fn writes_are_local_until_applied() {
        let mut store = MemoryChainStore::new();
        let asset = dpchain_core::asset::base_asset();
        {
            let mut pending = PendingChainState::new(&mut store);
            pending.store_asset(0, Some(asset.clone()));
            assert_eq!(pending.get_asset(0).unwrap().id, 0);
        }
        assert!(store.get_asset(0).is_none(), "parent untouched before apply_changes");

        {
            let mut pending = PendingChainState::new(&mut store);
            pending.store_asset(0, Some(asset.clone()));
            pending.apply_changes();
        }
        assert!(store.get_asset(0).is_some());
    }

    #[test]
    fn undo_state_captures_prior_value() {
        let mut store = MemoryChainStore::new();
        let mut original = dpchain_core::asset::base_asset();
        original.current_share_supply = 10;
        store.store_asset(0, Some(original.clone()));

        let mut updated = original.clone();
        updated.current_share_supply = 20;
        let undo = {
            let mut pending = PendingChainState::new(&mut store);
            pending.store_asset(0, Some(updated));
            let undo = pending.get_undo_state();
            pending.apply_changes();
            undo
        };
        assert_eq!(store.get_asset(0).unwrap().current_share_supply, 20);

        undo.apply_to(&mut store);
        assert_eq!(store.get_asset(0).unwrap().current_share_supply, 10);
    }

    #[test]
    fn apply_changes_is_idempotent() {
        let mut store = MemoryChainStore::new();
        let asset = dpchain_core::asset::base_asset();
        let mut pending = PendingChainState::new(&mut store);
        pending.store_asset(0, Some(asset));
        pending.apply_changes();
        pending.apply_changes();
    }

    #[test]
    fn order_writes_mark_pair_dirty() {
        let mut store = MemoryChainStore::new();
        let mut pending = PendingChainState::new(&mut store);
        let key = OrderKey {
            price: dpchain_core::Price::new(1, 1, 1, 0),
            owner: [2u8; 20],
        };
        pending.store_ask(
            key,
            Some(Order {
                order_type: dpchain_core::OrderType::Ask,
                key,
                balance: 50,
                short_limit: None,
            }),
        );
        assert_eq!(pending.get_dirty_markets(), vec![(1, 0)]);
    }
}
