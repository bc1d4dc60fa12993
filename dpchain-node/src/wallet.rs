//! §6 "Wallet boundary". §1 puts key management, transaction construction,
//! and history scanning out of scope; this module is the trait shape a
//! wallet process would be written against to reach those capabilities on
//! a running node, mirroring the teacher's own `WalletStore` role of
//! sitting beside the chain rather than inside it (`dxid-wallet` holds
//! keys and signs; it never reaches into `dxid-storage` directly).

use dpchain_core::{
    Account, AccountId, Asset, AssetId, Balance, BalanceId, ChainResult, EvaluationRecord,
    ForkNode, MarketStatus, Order, OrderKey,
};

/// §6 "`store_pending_transaction(tx, override_limits) -> evaluation`" plus
/// the read-only accessors over accounts, assets, balances, orders, market
/// status, and the fork list. `Node` implements this directly; a wallet
/// process talks to whatever RPC transport (out of scope, §1) forwards
/// these calls to a running node.
pub trait WalletBoundary: Send + Sync {
    fn store_pending_transaction(
        &self,
        txn: dpchain_core::SignedTransaction,
        override_limits: bool,
    ) -> ChainResult<EvaluationRecord>;

    fn get_account(&self, id: AccountId) -> Option<Account>;
    fn get_asset(&self, id: AssetId) -> Option<Asset>;
    fn get_balance(&self, id: BalanceId) -> Option<Balance>;
    fn get_market_status(&self, quote: AssetId, base: AssetId) -> Option<MarketStatus>;
    fn get_bids(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)>;
    fn get_asks(&self, quote: AssetId, base: AssetId) -> Vec<(OrderKey, Order)>;
    fn get_fork_node(&self, id: dpchain_core::BlockId) -> Option<ForkNode>;
}
