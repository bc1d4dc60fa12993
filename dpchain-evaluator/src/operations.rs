//! Per-operation semantics (§4.D). Each handler mutates the pending state
//! directly and appends to the evaluation record; the caller (`lib.rs`)
//! owns fee computation and signature verification, which need the full
//! operation list rather than any single operation's result.

use dpchain_core::{
    Account, ActiveKey, Address, Asset, AssetId, Balance, ChainError, ChainResult, DelegateInfo,
    EvaluationRecord, Issuer, Operation, Order, OrderKey, OrderType, Price, SlateId,
    WithdrawCondition, BASE_ASSET_ID, ZERO_SLATE_ID,
};
use dpchain_crypto::CryptoProvider;
use dpchain_state::ChainStore;

pub(crate) fn evaluate_operation(
    crypto: &dyn CryptoProvider,
    op: &Operation,
    state: &mut dyn ChainStore,
    now: u64,
    record: &mut EvaluationRecord,
    base_withdrawn: &mut u64,
    base_deposited: &mut u64,
) -> ChainResult<()> {
    match op {
        Operation::Withdraw { owner, asset_id, amount } => {
            withdraw_from_balance(state, *owner, *asset_id, *amount, now)?;
            record.required_signatures.push(*owner);
            if *asset_id == BASE_ASSET_ID {
                *base_withdrawn = base_withdrawn.checked_add(*amount).ok_or(ChainError::AdditionOverflow)?;
            }
            Ok(())
        }
        Operation::Deposit { owner, asset_id, amount, slate_id } => {
            if *amount == 0 {
                return Err(ChainError::UnsupportedChainOperation);
            }
            if state.get_asset(*asset_id).is_none() {
                return Err(ChainError::AssetTypeMismatch);
            }
            deposit_to_balance(state, *owner, *asset_id, *amount, *slate_id, now)?;
            if *asset_id == BASE_ASSET_ID {
                *base_deposited = base_deposited.checked_add(*amount).ok_or(ChainError::AdditionOverflow)?;
            }
            Ok(())
        }
        Operation::RegisterAccount { name, owner_key, is_delegate, pay_rate_pct } => {
            register_account(state, name, owner_key.clone(), *is_delegate, *pay_rate_pct)
        }
        Operation::UpdateAccount { account_id, new_active_key, pay_rate_pct } => {
            update_account(crypto, state, *account_id, new_active_key.clone(), *pay_rate_pct, now, record)
        }
        Operation::CreateAsset { symbol, name, precision, issuer, maximum_share_supply } => {
            create_asset(crypto, state, symbol, name, *precision, *issuer, *maximum_share_supply, record)
        }
        Operation::UpdateAsset { asset_id, maximum_share_supply } => {
            update_asset(crypto, state, *asset_id, *maximum_share_supply, record)
        }
        Operation::IssueAsset { asset_id, amount, to } => {
            issue_asset(crypto, state, *asset_id, *amount, *to, now, record)
        }
        Operation::Bid { owner, price, amount } => {
            evaluate_order(state, OrderType::Bid, *owner, *price, *amount, now, record)
        }
        Operation::Ask { owner, price, amount } => {
            evaluate_order(state, OrderType::Ask, *owner, *price, *amount, now, record)
        }
        Operation::Short { owner, price_limit, amount, quote_asset_id } => {
            evaluate_short(state, *owner, *price_limit, *amount, *quote_asset_id, now, record)
        }
        Operation::WithdrawPay { delegate_id, amount } => {
            withdraw_pay(crypto, state, *delegate_id, *amount, now, record)
        }
    }
}

fn withdraw_from_balance(
    state: &mut dyn ChainStore,
    owner: Address,
    asset_id: AssetId,
    amount: u64,
    now: u64,
) -> ChainResult<()> {
    let condition = WithdrawCondition { owner, asset_id };
    let id = condition.id();
    let mut balance = state.get_balance(id).ok_or(ChainError::InsufficientFunds)?;
    if balance.amount < amount {
        return Err(ChainError::InsufficientFunds);
    }
    balance.amount -= amount;
    balance.last_update = now;
    state.store_balance(id, Some(balance));
    Ok(())
}

fn deposit_to_balance(
    state: &mut dyn ChainStore,
    owner: Address,
    asset_id: AssetId,
    amount: u64,
    slate_id: SlateId,
    now: u64,
) -> ChainResult<()> {
    let condition = WithdrawCondition { owner, asset_id };
    let id = condition.id();
    match state.get_balance(id) {
        Some(mut balance) => {
            balance.amount = balance.amount.checked_add(amount).ok_or(ChainError::AdditionOverflow)?;
            balance.last_update = now;
            if slate_id != ZERO_SLATE_ID {
                balance.slate_id = slate_id;
            }
            state.store_balance(id, Some(balance));
        }
        None => {
            state.store_balance(
                id,
                Some(Balance {
                    condition,
                    amount,
                    slate_id,
                    created_at: now,
                    last_update: now,
                }),
            );
        }
    }
    Ok(())
}

fn next_id(state: &mut dyn ChainStore, property: &str, floor: u32) -> u32 {
    let current = state
        .get_property(property)
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(floor);
    state.store_property(property, Some(serde_json::json!(current + 1)));
    current
}

fn register_account(
    state: &mut dyn ChainStore,
    name: &str,
    owner_key: Vec<u8>,
    is_delegate: bool,
    pay_rate_pct: u8,
) -> ChainResult<()> {
    if state.get_account_id_by_name(name).is_some() {
        return Err(ChainError::UnsupportedChainOperation);
    }
    if pay_rate_pct > 100 {
        return Err(ChainError::UnsupportedChainOperation);
    }
    let id = next_id(state, "next_account_id", 1);
    let delegate_info = is_delegate.then(|| DelegateInfo {
        pay_rate_pct,
        pay_balance: 0,
        votes_for: 0,
        blocks_produced: 0,
        blocks_missed: 0,
        last_block_num_produced: 0,
        next_secret_hash: dpchain_core::unused_secret_hash_marker(),
    });
    let account = Account {
        id,
        name: name.to_string(),
        owner_key,
        active_keys: Vec::new(),
        delegate_info,
    };
    state.store_account_name_index(name, Some(id));
    state.store_account(id, Some(account));
    Ok(())
}

fn update_account(
    crypto: &dyn CryptoProvider,
    state: &mut dyn ChainStore,
    account_id: u32,
    new_active_key: Option<Vec<u8>>,
    pay_rate_pct: Option<u8>,
    now: u64,
    record: &mut EvaluationRecord,
) -> ChainResult<()> {
    let mut account = state.get_account(account_id).ok_or(ChainError::UnsupportedChainOperation)?;
    let signer_key = account.current_active_key(now).ok_or(ChainError::UnsupportedChainOperation)?;
    let signer = crypto
        .address_from_public_key(signer_key)
        .map_err(|_| ChainError::InvalidAddress)?;
    record.required_signatures.push(signer);

    if let Some(key) = new_active_key {
        account.active_keys.push(ActiveKey {
            public_key: key,
            valid_from: now,
        });
    }
    if let Some(rate) = pay_rate_pct {
        if rate > 100 {
            return Err(ChainError::UnsupportedChainOperation);
        }
        let info = account.delegate_info.as_mut().ok_or(ChainError::UnsupportedChainOperation)?;
        info.pay_rate_pct = rate;
    }
    state.store_account(account_id, Some(account));
    Ok(())
}

fn symbol_exists(state: &dyn ChainStore, symbol: &str, next_asset_id: u32) -> bool {
    (0..next_asset_id).any(|id| state.get_asset(id).map(|a| a.symbol == symbol).unwrap_or(false))
}

fn create_asset(
    crypto: &dyn CryptoProvider,
    state: &mut dyn ChainStore,
    symbol: &str,
    name: &str,
    precision: u8,
    issuer: Issuer,
    maximum_share_supply: u64,
    record: &mut EvaluationRecord,
) -> ChainResult<()> {
    let peek_next = state.get_property("next_asset_id").and_then(|v| v.as_u64()).unwrap_or(1) as u32;
    if symbol_exists(state, symbol, peek_next) {
        return Err(ChainError::UnsupportedChainOperation);
    }
    if let Issuer::Account(account_id) = issuer {
        let account = state.get_account(account_id).ok_or(ChainError::UnsupportedChainOperation)?;
        let signer = crypto
            .address_from_public_key(&account.owner_key)
            .map_err(|_| ChainError::InvalidAddress)?;
        record.required_signatures.push(signer);
    }
    let id = next_id(state, "next_asset_id", 1);
    let asset = Asset {
        id,
        symbol: symbol.to_string(),
        name: name.to_string(),
        precision,
        issuer,
        current_share_supply: 0,
        maximum_share_supply,
        collected_fees: 0,
    };
    state.store_asset(id, Some(asset));
    Ok(())
}

fn update_asset(
    crypto: &dyn CryptoProvider,
    state: &mut dyn ChainStore,
    asset_id: AssetId,
    maximum_share_supply: Option<u64>,
    record: &mut EvaluationRecord,
) -> ChainResult<()> {
    let mut asset = state.get_asset(asset_id).ok_or(ChainError::UnsupportedChainOperation)?;
    let Issuer::Account(issuer_id) = asset.issuer else {
        return Err(ChainError::UnsupportedChainOperation);
    };
    let issuer = state.get_account(issuer_id).ok_or(ChainError::UnsupportedChainOperation)?;
    let signer = crypto
        .address_from_public_key(&issuer.owner_key)
        .map_err(|_| ChainError::InvalidAddress)?;
    record.required_signatures.push(signer);

    if let Some(new_max) = maximum_share_supply {
        if new_max < asset.current_share_supply {
            return Err(ChainError::UnsupportedChainOperation);
        }
        asset.maximum_share_supply = new_max;
    }
    state.store_asset(asset_id, Some(asset));
    Ok(())
}

fn issue_asset(
    crypto: &dyn CryptoProvider,
    state: &mut dyn ChainStore,
    asset_id: AssetId,
    amount: u64,
    to: Address,
    now: u64,
    record: &mut EvaluationRecord,
) -> ChainResult<()> {
    let mut asset = state.get_asset(asset_id).ok_or(ChainError::UnsupportedChainOperation)?;
    if asset.is_market_issued() {
        return Err(ChainError::UnsupportedChainOperation);
    }
    let Issuer::Account(issuer_id) = asset.issuer else {
        return Err(ChainError::UnsupportedChainOperation);
    };
    let issuer = state.get_account(issuer_id).ok_or(ChainError::UnsupportedChainOperation)?;
    let signer = crypto
        .address_from_public_key(&issuer.owner_key)
        .map_err(|_| ChainError::InvalidAddress)?;
    record.required_signatures.push(signer);

    if amount > asset.issuable_remaining() {
        return Err(ChainError::UnsupportedChainOperation);
    }
    asset.current_share_supply = asset.current_share_supply.checked_add(amount).ok_or(ChainError::AdditionOverflow)?;
    state.store_asset(asset_id, Some(asset));
    deposit_to_balance(state, to, asset_id, amount, ZERO_SLATE_ID, now)
}

/// Shared bid/ask handling: positive `amount` withdraws from `owner` and
/// augments the order; negative `amount` refunds `-amount` and shrinks or
/// removes it (§4.D "bid / ask / short").
fn evaluate_order(
    state: &mut dyn ChainStore,
    order_type: OrderType,
    owner: Address,
    price: Price,
    amount: i64,
    now: u64,
    record: &mut EvaluationRecord,
) -> ChainResult<()> {
    if price.base_asset_id >= price.quote_asset_id {
        return Err(ChainError::UnsupportedChainOperation);
    }
    let asset_id = match order_type {
        OrderType::Bid => price.base_asset_id,
        OrderType::Ask => price.quote_asset_id,
        _ => unreachable!("evaluate_order only handles bid/ask"),
    };
    let key = OrderKey { price, owner };
    record.required_signatures.push(owner);

    match amount.cmp(&0) {
        std::cmp::Ordering::Greater => {
            let add = amount as u64;
            withdraw_from_balance(state, owner, asset_id, add, now)?;
            let mut order = get_order(state, order_type, key).unwrap_or(Order {
                order_type,
                key,
                balance: 0,
                short_limit: None,
            });
            order.balance = order.balance.checked_add(add).ok_or(ChainError::AdditionOverflow)?;
            store_order(state, order_type, key, Some(order));
            Ok(())
        }
        std::cmp::Ordering::Less => {
            let refund = (-amount) as u64;
            let mut order = get_order(state, order_type, key).ok_or(ChainError::UnsupportedChainOperation)?;
            if refund > order.balance {
                return Err(ChainError::InsufficientFunds);
            }
            order.balance -= refund;
            deposit_to_balance(state, owner, asset_id, refund, ZERO_SLATE_ID, now)?;
            if order.balance == 0 {
                store_order(state, order_type, key, None);
            } else {
                store_order(state, order_type, key, Some(order));
            }
            Ok(())
        }
        std::cmp::Ordering::Equal => Err(ChainError::UnsupportedChainOperation),
    }
}

fn evaluate_short(
    state: &mut dyn ChainStore,
    owner: Address,
    price_limit: Option<Price>,
    amount: i64,
    quote_asset_id: AssetId,
    now: u64,
    record: &mut EvaluationRecord,
) -> ChainResult<()> {
    if quote_asset_id <= BASE_ASSET_ID {
        return Err(ChainError::UnsupportedChainOperation);
    }
    let quote_asset = state.get_asset(quote_asset_id).ok_or(ChainError::UnsupportedChainOperation)?;
    if !quote_asset.is_market_issued() {
        return Err(ChainError::AssetTypeMismatch);
    }
    // Unlimited shorts sort behind every limited one (§4.E short_itr is
    // "desc by limit price or feed-anchored order"): key them at the
    // highest representable price so a real limit always outranks them.
    let key_price = price_limit.unwrap_or(Price::new(u64::MAX, 1, quote_asset_id, BASE_ASSET_ID));
    let key = OrderKey { price: key_price, owner };
    record.required_signatures.push(owner);

    match amount.cmp(&0) {
        std::cmp::Ordering::Greater => {
            let add = amount as u64;
            withdraw_from_balance(state, owner, BASE_ASSET_ID, add, now)?;
            let mut order = state.get_short(key).unwrap_or(Order {
                order_type: OrderType::Short,
                key,
                balance: 0,
                short_limit: price_limit,
            });
            order.balance = order.balance.checked_add(add).ok_or(ChainError::AdditionOverflow)?;
            state.store_short(key, Some(order));
            Ok(())
        }
        std::cmp::Ordering::Less => {
            let refund = (-amount) as u64;
            let mut order = state.get_short(key).ok_or(ChainError::UnsupportedChainOperation)?;
            if refund > order.balance {
                return Err(ChainError::InsufficientFunds);
            }
            order.balance -= refund;
            deposit_to_balance(state, owner, BASE_ASSET_ID, refund, ZERO_SLATE_ID, now)?;
            if order.balance == 0 {
                state.store_short(key, None);
            } else {
                state.store_short(key, Some(order));
            }
            Ok(())
        }
        std::cmp::Ordering::Equal => Err(ChainError::UnsupportedChainOperation),
    }
}

fn withdraw_pay(
    crypto: &dyn CryptoProvider,
    state: &mut dyn ChainStore,
    delegate_id: u32,
    amount: u64,
    now: u64,
    record: &mut EvaluationRecord,
) -> ChainResult<()> {
    let mut account = state.get_account(delegate_id).ok_or(ChainError::UnsupportedChainOperation)?;
    let mut info = account.delegate_info.clone().ok_or(ChainError::UnsupportedChainOperation)?;
    if amount > info.pay_balance {
        return Err(ChainError::InsufficientFunds);
    }
    info.pay_balance -= amount;
    account.delegate_info = Some(info);

    let payout_address = crypto
        .address_from_public_key(&account.owner_key)
        .map_err(|_| ChainError::InvalidAddress)?;
    record.required_signatures.push(payout_address);

    state.store_account(delegate_id, Some(account));
    deposit_to_balance(state, payout_address, BASE_ASSET_ID, amount, ZERO_SLATE_ID, now)
}

fn get_order(state: &dyn ChainStore, order_type: OrderType, key: OrderKey) -> Option<Order> {
    match order_type {
        OrderType::Bid => state.get_bid(key),
        OrderType::Ask => state.get_ask(key),
        OrderType::Short => state.get_short(key),
        OrderType::Cover => None,
    }
}

fn store_order(state: &mut dyn ChainStore, order_type: OrderType, key: OrderKey, order: Option<Order>) {
    match order_type {
        OrderType::Bid => state.store_bid(key, order),
        OrderType::Ask => state.store_ask(key, order),
        OrderType::Short => state.store_short(key, order),
        OrderType::Cover => {}
    }
}
