//! The chain state store (§4.B): an abstract ordered key-value mapping over
//! every persisted table (assets, balances, accounts, orders, blocks, fork
//! data, undo deltas). `ChainStore` is the seam; `MemoryChainStore` is the
//! in-memory reference implementation used by tests and by `dpchain-node`
//! (a durable backend is explicitly out of scope per §1).

use crate::overlay::Overlay;
use dpchain_core::{
    Account, AccountId, Asset, AssetId, Balance, BalanceId, Block, BlockId, BlockRecord,
    CoverPosition, DelegateSlate, EvaluationRecord, ForkNode, MarketStatus, Order, OrderKey,
    SlateId, TransactionId, TransactionLocation,
};
use std::collections::BTreeMap;

/// Abstract ordered mapping over every consensus-relevant table. All
/// `store_*` methods take `Option<T>`: `None` removes the key, matching
/// §4.C's "`store_*` into a null/default value removes the key".
pub trait ChainStore: Send + Sync {
    fn get_asset(&self, id: AssetId) -> Option<Asset>;
    fn store_asset(&mut self, id: AssetId, asset: Option<Asset>);

    fn get_account(&self, id: AccountId) -> Option<Account>;
    fn store_account(&mut self, id: AccountId, account: Option<Account>);
    fn get_account_id_by_name(&self, name: &str) -> Option<AccountId>;
    fn store_account_name_index(&mut self, name: &str, id: Option<AccountId>);
    /// Every known account, unordered. Used by the active-delegate-set
    /// refresh (§4.F step 8), which has no other way to rank delegates by
    /// vote without a full scan.
    fn iter_accounts(&self) -> Vec<Account>;

    fn get_balance(&self, id: BalanceId) -> Option<Balance>;
    fn store_balance(&mut self, id: BalanceId, balance: Option<Balance>);

    fn get_slate(&self, id: SlateId) -> Option<DelegateSlate>;
    fn store_slate(&mut self, id: SlateId, slate: Option<DelegateSlate>);

    fn get_bid(&self, key: OrderKey) -> Option<Order>;
    fn store_bid(&mut self, key: OrderKey, order: Option<Order>);
    fn get_ask(&self, key: OrderKey) -> Option<Order>;
    fn store_ask(&mut self, key: OrderKey, order: Option<Order>);
    fn get_short(&self, key: OrderKey) -> Option<Order>;
    fn store_short(&mut self, key: OrderKey, order: Option<Order>);
    fn get_collateral(&self, key: OrderKey) -> Option<CoverPosition>;
    fn store_collateral(&mut self, key: OrderKey, cover: Option<CoverPosition>);

    /// Ascending-by-key snapshot of every bid/ask/short/cover for one
    /// `(quote, base)` pair — the material the market engine's four cursors
    /// (§4.E "Iterators") scan. Implementations materialize into a `Vec`
    /// rather than exposing a lazy cursor, which is sufficient for an
    /// in-memory reference store and keeps the trait object-safe.
    fn iter_bids(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)>;
    fn iter_asks(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)>;
    fn iter_shorts(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)>;
    fn iter_collateral(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, CoverPosition)>;

    fn get_market_status(&self, quote: AssetId, base: AssetId) -> Option<MarketStatus>;
    fn store_market_status(&mut self, quote: AssetId, base: AssetId, status: Option<MarketStatus>);

    fn get_property(&self, key: &str) -> Option<serde_json::Value>;
    fn store_property(&mut self, key: &str, value: Option<serde_json::Value>);

    fn get_accumulated_fees(&self, asset_id: AssetId) -> u64;
    fn store_accumulated_fees(&mut self, asset_id: AssetId, amount: u64);

    fn get_fork_node(&self, id: BlockId) -> Option<ForkNode>;
    fn store_fork_node(&mut self, id: BlockId, node: Option<ForkNode>);

    fn get_block_record(&self, id: BlockId) -> Option<BlockRecord>;
    fn store_block_record(&mut self, id: BlockId, record: Option<BlockRecord>);
    fn get_block_ids_at(&self, block_num: u64) -> Vec<BlockId>;
    fn store_block_ids_at(&mut self, block_num: u64, ids: Vec<BlockId>);

    fn get_full_block(&self, id: BlockId) -> Option<Block>;
    fn store_full_block(&mut self, id: BlockId, block: Option<Block>);

    fn get_transaction_location(&self, id: TransactionId) -> Option<TransactionLocation>;
    fn store_transaction_location(&mut self, id: TransactionId, loc: Option<TransactionLocation>);

    fn get_evaluation_record(&self, id: TransactionId) -> Option<EvaluationRecord>;
    fn store_evaluation_record(&mut self, id: TransactionId, rec: Option<EvaluationRecord>);

    /// Undo deltas, retained for the last N blocks (the undo horizon, §3
    /// "Undo state"); eviction is the block processor's responsibility.
    fn get_undo_state(&self, block_id: BlockId) -> Option<Overlay>;
    fn store_undo_state(&mut self, block_id: BlockId, undo: Option<Overlay>);

    fn now(&self) -> u64;
    fn set_now(&mut self, now: u64);

    /// Both derived from the `"head_block_num"`/`"random_seed"` properties so
    /// `PendingChainState` gets them for free by delegating `get_property`
    /// through the overlay chain.
    fn get_head_block_num(&self) -> u64 {
        self.get_property("head_block_num")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }
    fn get_current_random_seed(&self) -> [u8; 32] {
        self.get_property("random_seed")
            .and_then(|v| serde_json::from_value::<[u8; 32]>(v).ok())
            .unwrap_or([0u8; 32])
    }

    /// Pairs written since the last time this was drained. Only
    /// `PendingChainState` tracks dirtiness meaningfully; the committed store
    /// has nothing pending once a block lands, so it always returns empty.
    fn get_dirty_markets(&self) -> Vec<(AssetId, AssetId)> {
        Vec::new()
    }
}

/// In-memory reference `ChainStore`. Every table is a `BTreeMap`, giving the
/// deterministic ordering the market engine's price-sorted cursors and the
/// fork tree's per-height bucket scans need for free.
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    assets: BTreeMap<AssetId, Asset>,
    accounts: BTreeMap<AccountId, Account>,
    account_names: BTreeMap<String, AccountId>,
    balances: BTreeMap<BalanceId, Balance>,
    slates: BTreeMap<SlateId, DelegateSlate>,
    bids: BTreeMap<OrderKey, Order>,
    asks: BTreeMap<OrderKey, Order>,
    shorts: BTreeMap<OrderKey, Order>,
    covers: BTreeMap<OrderKey, CoverPosition>,
    market_status: BTreeMap<(AssetId, AssetId), MarketStatus>,
    properties: BTreeMap<String, serde_json::Value>,
    accumulated_fees: BTreeMap<AssetId, u64>,
    fork_nodes: BTreeMap<BlockId, ForkNode>,
    block_records: BTreeMap<BlockId, BlockRecord>,
    block_ids_at: BTreeMap<u64, Vec<BlockId>>,
    blocks: BTreeMap<BlockId, Block>,
    transaction_locations: BTreeMap<TransactionId, TransactionLocation>,
    evaluation_records: BTreeMap<TransactionId, EvaluationRecord>,
    undo_states: BTreeMap<BlockId, Overlay>,
    now: u64,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn orders_for_pair(map: &BTreeMap<OrderKey, Order>, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)> {
        map.iter()
            .filter(|(k, _)| k.price.quote_asset_id == quote && k.price.base_asset_id == base)
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

impl ChainStore for MemoryChainStore {
    fn get_asset(&self, id: AssetId) -> Option<Asset> {
        self.assets.get(&id).cloned()
    }
    fn store_asset(&mut self, id: AssetId, asset: Option<Asset>) {
        match asset {
            Some(a) => {
                self.assets.insert(id, a);
            }
            None => {
                self.assets.remove(&id);
            }
        }
    }

    fn get_account(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(&id).cloned()
    }
    fn store_account(&mut self, id: AccountId, account: Option<Account>) {
        match account {
            Some(a) => {
                self.accounts.insert(id, a);
            }
            None => {
                self.accounts.remove(&id);
            }
        }
    }
    fn get_account_id_by_name(&self, name: &str) -> Option<AccountId> {
        self.account_names.get(name).copied()
    }
    fn store_account_name_index(&mut self, name: &str, id: Option<AccountId>) {
        match id {
            Some(id) => {
                self.account_names.insert(name.to_string(), id);
            }
            None => {
                self.account_names.remove(name);
            }
        }
    }
    fn iter_accounts(&self) -> Vec<Account> {
        self.accounts.values().cloned().collect()
    }

    fn get_balance(&self, id: BalanceId) -> Option<Balance> {
        self.balances.get(&id).cloned()
    }
    fn store_balance(&mut self, id: BalanceId, balance: Option<Balance>) {
        match balance {
            Some(b) => {
                self.balances.insert(id, b);
            }
            None => {
                self.balances.remove(&id);
            }
        }
    }

    fn get_slate(&self, id: SlateId) -> Option<DelegateSlate> {
        self.slates.get(&id).cloned()
    }
    fn store_slate(&mut self, id: SlateId, slate: Option<DelegateSlate>) {
        match slate {
            Some(s) => {
                self.slates.insert(id, s);
            }
            None => {
                self.slates.remove(&id);
            }
        }
    }

    fn get_bid(&self, key: OrderKey) -> Option<Order> {
        self.bids.get(&key).cloned()
    }
    fn store_bid(&mut self, key: OrderKey, order: Option<Order>) {
        match order {
            Some(o) => {
                self.bids.insert(key, o);
            }
            None => {
                self.bids.remove(&key);
            }
        }
    }
    fn get_ask(&self, key: OrderKey) -> Option<Order> {
        self.asks.get(&key).cloned()
    }
    fn store_ask(&mut self, key: OrderKey, order: Option<Order>) {
        match order {
            Some(o) => {
                self.asks.insert(key, o);
            }
            None => {
                self.asks.remove(&key);
            }
        }
    }
    fn get_short(&self, key: OrderKey) -> Option<Order> {
        self.shorts.get(&key).cloned()
    }
    fn store_short(&mut self, key: OrderKey, order: Option<Order>) {
        match order {
            Some(o) => {
                self.shorts.insert(key, o);
            }
            None => {
                self.shorts.remove(&key);
            }
        }
    }
    fn get_collateral(&self, key: OrderKey) -> Option<CoverPosition> {
        self.covers.get(&key).cloned()
    }
    fn store_collateral(&mut self, key: OrderKey, cover: Option<CoverPosition>) {
        match cover {
            Some(c) => {
                self.covers.insert(key, c);
            }
            None => {
                self.covers.remove(&key);
            }
        }
    }

    fn iter_bids(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)> {
        Self::orders_for_pair(&self.bids, quote, base)
    }
    fn iter_asks(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)> {
        Self::orders_for_pair(&self.asks, quote, base)
    }
    fn iter_shorts(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)> {
        Self::orders_for_pair(&self.shorts, quote, base)
    }
    fn iter_collateral(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, CoverPosition)> {
        self.covers
            .iter()
            .filter(|(k, _)| k.price.quote_asset_id == quote && k.price.base_asset_id == base)
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    fn get_market_status(&self, quote: AssetId, base: AssetId) -> Option<MarketStatus> {
        self.market_status.get(&(quote, base)).cloned()
    }
    fn store_market_status(&mut self, quote: AssetId, base: AssetId, status: Option<MarketStatus>) {
        match status {
            Some(s) => {
                self.market_status.insert((quote, base), s);
            }
            None => {
                self.market_status.remove(&(quote, base));
            }
        }
    }

    fn get_property(&self, key: &str) -> Option<serde_json::Value> {
        self.properties.get(key).cloned()
    }
    fn store_property(&mut self, key: &str, value: Option<serde_json::Value>) {
        match value {
            Some(v) => {
                self.properties.insert(key.to_string(), v);
            }
            None => {
                self.properties.remove(key);
            }
        }
    }

    fn get_accumulated_fees(&self, asset_id: AssetId) -> u64 {
        self.accumulated_fees.get(&asset_id).copied().unwrap_or(0)
    }
    fn store_accumulated_fees(&mut self, asset_id: AssetId, amount: u64) {
        if amount == 0 {
            self.accumulated_fees.remove(&asset_id);
        } else {
            self.accumulated_fees.insert(asset_id, amount);
        }
    }

    fn get_fork_node(&self, id: BlockId) -> Option<ForkNode> {
        self.fork_nodes.get(&id).cloned()
    }
    fn store_fork_node(&mut self, id: BlockId, node: Option<ForkNode>) {
        match node {
            Some(n) => {
                self.fork_nodes.insert(id, n);
            }
            None => {
                self.fork_nodes.remove(&id);
            }
        }
    }

    fn get_block_record(&self, id: BlockId) -> Option<BlockRecord> {
        self.block_records.get(&id).cloned()
    }
    fn store_block_record(&mut self, id: BlockId, record: Option<BlockRecord>) {
        match record {
            Some(r) => {
                self.block_records.insert(id, r);
            }
            None => {
                self.block_records.remove(&id);
            }
        }
    }
    fn get_block_ids_at(&self, block_num: u64) -> Vec<BlockId> {
        self.block_ids_at.get(&block_num).cloned().unwrap_or_default()
    }
    fn store_block_ids_at(&mut self, block_num: u64, ids: Vec<BlockId>) {
        if ids.is_empty() {
            self.block_ids_at.remove(&block_num);
        } else {
            self.block_ids_at.insert(block_num, ids);
        }
    }

    fn get_full_block(&self, id: BlockId) -> Option<Block> {
        self.blocks.get(&id).cloned()
    }
    fn store_full_block(&mut self, id: BlockId, block: Option<Block>) {
        match block {
            Some(b) => {
                self.blocks.insert(id, b);
            }
            None => {
                self.blocks.remove(&id);
            }
        }
    }

    fn get_transaction_location(&self, id: TransactionId) -> Option<TransactionLocation> {
        self.transaction_locations.get(&id).copied()
    }
    fn store_transaction_location(&mut self, id: TransactionId, loc: Option<TransactionLocation>) {
        match loc {
            Some(l) => {
                self.transaction_locations.insert(id, l);
            }
            None => {
                self.transaction_locations.remove(&id);
            }
        }
    }

    fn get_evaluation_record(&self, id: TransactionId) -> Option<EvaluationRecord> {
        self.evaluation_records.get(&id).cloned()
    }
    fn store_evaluation_record(&mut self, id: TransactionId, rec: Option<EvaluationRecord>) {
        match rec {
            Some(r) => {
                self.evaluation_records.insert(id, r);
            }
            None => {
                self.evaluation_records.remove(&id);
            }
        }
    }

    fn get_undo_state(&self, block_id: BlockId) -> Option<Overlay> {
        self.undo_states.get(&block_id).cloned()
    }
    fn store_undo_state(&mut self, block_id: BlockId, undo: Option<Overlay>) {
        match undo {
            Some(u) => {
                self.undo_states.insert(block_id, u);
            }
            None => {
                self.undo_states.remove(&block_id);
            }
        }
    }

    fn now(&self) -> u64 {
        self.now
    }
    fn set_now(&mut self, now: u64) {
        self.now = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpchain_core::{Address, OrderType, Price};

    fn key(n: u64, d: u64, owner: Address) -> OrderKey {
        OrderKey {
            price: Price::new(n, d, 1, 0),
            owner,
        }
    }

    #[test]
    fn store_none_removes_key() {
        let mut store = MemoryChainStore::new();
        let asset = dpchain_core::asset::base_asset();
        store.store_asset(0, Some(asset.clone()));
        assert!(store.get_asset(0).is_some());
        store.store_asset(0, None);
        assert!(store.get_asset(0).is_none());
    }

    #[test]
    fn orders_filtered_by_pair() {
        let mut store = MemoryChainStore::new();
        let owner = [1u8; 20];
        let order = Order {
            order_type: OrderType::Ask,
            key: key(1, 1, owner),
            balance: 100,
            short_limit: None,
        };
        store.store_ask(order.key, Some(order));
        assert_eq!(store.iter_asks(1, 0).len(), 1);
        assert_eq!(store.iter_asks(2, 0).len(), 0);
    }
}
