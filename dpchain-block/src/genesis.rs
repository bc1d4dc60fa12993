//! Genesis application: seeds a fresh `ChainStore` from a `Genesis`
//! document (§6 "Genesis format"). Grounded on
//! `original_source/libraries/blockchain/chain_database.cpp`'s genesis
//! path (`chain_database::open`'s `is_new_data_dir` branch, not pulled
//! into the retrieval pack in full, but mirrored here via the same
//! primitives this workspace already has: base asset, per-address
//! balances, named delegate accounts, the genesis fork node).

use dpchain_core::{
    asset::base_asset, Account, Asset, Balance, ChainError, ChainResult, DelegateInfo, ForkNode,
    Genesis, Issuer, WithdrawCondition, ZERO_BLOCK_ID, ZERO_SLATE_ID,
};
use dpchain_state::ChainStore;

/// Property key recording the chain id a store was seeded with, checked on
/// every open against the genesis file's own `chain_id()` (§6 "Mismatch
/// between stored chain id and genesis chain id fails open with
/// `wrong_chain_id`").
pub const CHAIN_ID_PROPERTY: &str = "chain_id";
pub const DATABASE_VERSION_PROPERTY: &str = "database_version";
pub const ACTIVE_DELEGATES_PROPERTY: &str = "active_delegate_list";
pub const REQUIRED_CONFIRMATIONS_PROPERTY: &str = "required_confirmations";
pub const HEAD_BLOCK_ID_PROPERTY: &str = "head_block_id";
pub const DIRTY_MARKETS_PROPERTY: &str = "dirty_markets";

/// Bumped whenever a stored layout changes in a way that invalidates
/// existing data (§6 "Persistence"). A lower stored version fails with
/// `new_database_version`; this workspace has only ever shipped one.
pub const CURRENT_DATABASE_VERSION: u64 = 1;

/// Applies `genesis` to an empty `store`, or validates that an
/// already-seeded `store` was built from the same genesis (§6 "Mismatch
/// between stored chain id and genesis chain id fails open with
/// `wrong_chain_id`").
pub fn open_or_init(genesis: &Genesis, store: &mut dyn ChainStore) -> ChainResult<()> {
    let chain_id = genesis.chain_id();

    if let Some(stored_version) = store.get_property(DATABASE_VERSION_PROPERTY) {
        let stored_version = stored_version.as_u64().unwrap_or(0);
        if stored_version > CURRENT_DATABASE_VERSION {
            return Err(ChainError::NewDatabaseVersion);
        }
        let stored_chain_id: [u8; 32] = store
            .get_property(CHAIN_ID_PROPERTY)
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or(ChainError::WrongChainId)?;
        if stored_chain_id != chain_id {
            return Err(ChainError::WrongChainId);
        }
        return Ok(());
    }

    init_genesis(genesis, store, chain_id)
}

fn init_genesis(genesis: &Genesis, store: &mut dyn ChainStore, chain_id: [u8; 32]) -> ChainResult<()> {
    store.set_now(genesis.timestamp);

    let mut base = base_asset();
    base.symbol = genesis.base_symbol.clone();
    base.name = genesis.base_name.clone();
    base.precision = genesis.base_precision;
    let total: u64 = genesis
        .initial_balances
        .iter()
        .try_fold(0u64, |acc, b| acc.checked_add(b.amount))
        .ok_or(ChainError::AdditionOverflow)?;
    base.current_share_supply = total;
    base.maximum_share_supply = u64::MAX;
    store.store_asset(base.id, Some(base));

    for balance in &genesis.initial_balances {
        let condition = WithdrawCondition {
            owner: balance.owner,
            asset_id: 0,
        };
        store.store_balance(
            condition.id(),
            Some(Balance {
                condition,
                amount: balance.amount,
                slate_id: ZERO_SLATE_ID,
                created_at: genesis.timestamp,
                last_update: genesis.timestamp,
            }),
        );
    }

    let mut active_delegate_ids = Vec::with_capacity(genesis.delegates.len());
    for (idx, delegate) in genesis.delegates.iter().enumerate() {
        let id = idx as u32 + 1;
        let account = Account {
            id,
            name: delegate.name.clone(),
            owner_key: delegate.owner_public_key.clone(),
            active_keys: Vec::new(),
            delegate_info: Some(DelegateInfo {
                pay_rate_pct: delegate.pay_rate_pct.min(100),
                pay_balance: 0,
                votes_for: 0,
                blocks_produced: 0,
                blocks_missed: 0,
                last_block_num_produced: 0,
                next_secret_hash: dpchain_core::unused_secret_hash_marker(),
            }),
        };
        store.store_account_name_index(&delegate.name, Some(id));
        store.store_account(id, Some(account));
        active_delegate_ids.push(id);
    }
    store.store_property(
        "next_account_id",
        Some(serde_json::json!(active_delegate_ids.len() as u32 + 1)),
    );

    let next_asset_id = genesis.market_issued_assets.len() as u32 + 1;
    for (idx, asset_def) in genesis.market_issued_assets.iter().enumerate() {
        let id = idx as u32 + 1;
        store.store_asset(
            id,
            Some(Asset {
                id,
                symbol: asset_def.symbol.clone(),
                name: asset_def.name.clone(),
                precision: asset_def.precision,
                issuer: Issuer::MarketIssued,
                current_share_supply: 0,
                maximum_share_supply: asset_def.maximum_share_supply,
                collected_fees: 0,
            }),
        );
    }
    store.store_property("next_asset_id", Some(serde_json::json!(next_asset_id)));

    store.store_property(
        ACTIVE_DELEGATES_PROPERTY,
        Some(serde_json::json!(active_delegate_ids)),
    );
    store.store_property(
        REQUIRED_CONFIRMATIONS_PROPERTY,
        Some(serde_json::json!(active_delegate_ids.len() as u64 * 2)),
    );
    store.store_property("head_block_num", Some(serde_json::json!(0u64)));
    store.store_property(HEAD_BLOCK_ID_PROPERTY, Some(serde_json::json!(ZERO_BLOCK_ID)));
    store.store_property("head_timestamp", Some(serde_json::json!(genesis.timestamp)));
    store.store_property("random_seed", Some(serde_json::json!([0u8; 32])));
    store.store_property(DIRTY_MARKETS_PROPERTY, Some(serde_json::json!(Vec::<(u32, u32)>::new())));
    store.store_property(CHAIN_ID_PROPERTY, Some(serde_json::json!(chain_id)));
    store.store_property(DATABASE_VERSION_PROPERTY, Some(serde_json::json!(CURRENT_DATABASE_VERSION)));

    store.store_fork_node(ZERO_BLOCK_ID, Some(ForkNode::genesis()));

    tracing::info!(delegates = active_delegate_ids.len(), ?chain_id, "genesis applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpchain_core::{GenesisBalance, GenesisDelegate};
    use dpchain_state::MemoryChainStore;

    fn sample_genesis() -> Genesis {
        Genesis {
            timestamp: 1_600_000_000,
            base_symbol: "BASE".into(),
            base_name: "Base asset".into(),
            base_precision: 5,
            initial_balances: vec![
                GenesisBalance { owner: [1u8; 20], amount: 1_000_000 },
                GenesisBalance { owner: [2u8; 20], amount: 0 },
            ],
            delegates: vec![GenesisDelegate {
                name: "delegate1".into(),
                owner_public_key: vec![9u8; 32],
                pay_rate_pct: 100,
            }],
            market_issued_assets: vec![],
        }
    }

    #[test]
    fn seeds_base_asset_and_balances() {
        let genesis = sample_genesis();
        let mut store = MemoryChainStore::new();
        open_or_init(&genesis, &mut store).unwrap();
        let base = store.get_asset(0).unwrap();
        assert_eq!(base.current_share_supply, 1_000_000);
        let bal = store
            .get_balance(WithdrawCondition { owner: [1u8; 20], asset_id: 0 }.id())
            .unwrap();
        assert_eq!(bal.amount, 1_000_000);
        assert!(store.get_account(1).unwrap().is_delegate());
    }

    #[test]
    fn reopen_with_matching_chain_id_is_a_no_op() {
        let genesis = sample_genesis();
        let mut store = MemoryChainStore::new();
        open_or_init(&genesis, &mut store).unwrap();
        open_or_init(&genesis, &mut store).unwrap();
        assert_eq!(store.get_asset(0).unwrap().current_share_supply, 1_000_000);
    }

    #[test]
    fn reopen_with_different_genesis_fails() {
        let genesis = sample_genesis();
        let mut store = MemoryChainStore::new();
        open_or_init(&genesis, &mut store).unwrap();
        let mut other = sample_genesis();
        other.base_symbol = "OTHER".into();
        let err = open_or_init(&other, &mut store).unwrap_err();
        assert_eq!(err, ChainError::WrongChainId);
    }
}
