//! The block processor (§4.F): header verification, delegate production
//! accounting, the market pass, the transaction pass, and commit/undo.
//!
//! Grounded on `original_source/libraries/blockchain/chain_database.cpp`'s
//! `extend_chain`/`verify_header`/`update_delegate_production_info`/
//! `pay_delegate`/`execute_markets`/`update_active_delegate_list`/
//! `update_random_seed`/`save_undo_state`/`pop_block`.

use std::cmp::Reverse;
use std::sync::Arc;

use dpchain_config::{ConsensusParams, RuleSet};
use dpchain_core::{
    AccountId, AssetId, Block, BlockId, BlockRecord, ChainError, ChainResult, TransactionLocation,
    BASE_ASSET_ID, ZERO_BLOCK_ID,
};
use dpchain_crypto::CryptoProvider;
use dpchain_evaluator::TransactionEvaluator;
use dpchain_fork::ForkTree;
use dpchain_market::feed::FeedSet;
use dpchain_market::MarketEngine;
use dpchain_observer::{BlockSummary, ObserverBus};
use dpchain_state::{ChainStore, PendingChainState};

use crate::genesis::{ACTIVE_DELEGATES_PROPERTY, DIRTY_MARKETS_PROPERTY, HEAD_BLOCK_ID_PROPERTY, REQUIRED_CONFIRMATIONS_PROPERTY};

/// External collaborator supplying delegate price feeds for a market-issued
/// asset (§1: feed assembly is out of scope; the evaluator-side "publish
/// feed" machinery isn't part of the transaction set here).
pub trait FeedProvider {
    fn feed_set(&self, quote_asset_id: AssetId) -> FeedSet;
}

/// A `FeedProvider` with nothing to report; useful for chains or tests with
/// no market-issued assets.
pub struct NoFeeds;

impl FeedProvider for NoFeeds {
    fn feed_set(&self, _quote_asset_id: AssetId) -> FeedSet {
        FeedSet::default()
    }
}

pub struct BlockProcessor {
    crypto: Arc<dyn CryptoProvider>,
    params: ConsensusParams,
    chain_id: [u8; 32],
    observers: Arc<ObserverBus>,
    /// §9 "Skip signature verification": a boot-time-only switch, honoured
    /// solely while replaying already-accepted blocks. There is no setter;
    /// flipping it after construction would defeat the point.
    skip_signature_verification: bool,
}

impl BlockProcessor {
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        params: ConsensusParams,
        chain_id: [u8; 32],
        observers: Arc<ObserverBus>,
    ) -> Self {
        BlockProcessor {
            crypto,
            params,
            chain_id,
            observers,
            skip_signature_verification: false,
        }
    }

    pub fn replaying(mut self, skip_signature_verification: bool) -> Self {
        self.skip_signature_verification = skip_signature_verification;
        self
    }

    /// §4.F: performs all twelve steps, or reverts and marks the block
    /// invalid on the first failure.
    pub fn extend_chain(
        &self,
        store: &mut dyn ChainStore,
        block: Block,
        feeds: &dyn FeedProvider,
    ) -> ChainResult<BlockSummary> {
        let block_id = block.header.id();
        match self.try_extend(store, &block, feeds) {
            Ok(summary) => Ok(summary),
            Err(err) => {
                let mut tree = ForkTree::new(store);
                tree.store_and_index(block_id, &block.header);
                tree.mark_invalid(block_id, err.to_string());
                Err(err)
            }
        }
    }

    fn try_extend(
        &self,
        store: &mut dyn ChainStore,
        block: &Block,
        feeds: &dyn FeedProvider,
    ) -> ChainResult<BlockSummary> {
        let block_id = block.header.id();
        let head_block_num = store.get_head_block_num();
        let head_block_id: BlockId = store
            .get_property(HEAD_BLOCK_ID_PROPERTY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(ZERO_BLOCK_ID);
        let head_timestamp = store.get_property("head_timestamp").and_then(|v| v.as_u64()).unwrap_or(0);

        self.verify_checkpoint(block.header.block_num, block_id)?;
        self.verify_header(store, block, head_block_num, head_block_id, head_timestamp)?;

        let mut pending = PendingChainState::new(store);
        pending.set_now(block.header.timestamp);

        self.update_delegate_production_info(&mut pending, block, head_block_num, head_timestamp)?;
        self.pay_delegate(&mut pending, block)?;

        let market_transactions = self.run_market_pass(&mut pending, block.header.timestamp, feeds)?;

        let evaluator = TransactionEvaluator::new(self.crypto.clone(), self.chain_id, self.params.required_fee)
            .with_skip_signature_verification(self.skip_signature_verification);
        let mut total_fees: u64 = 0;
        for (index, txn) in block.transactions.iter().enumerate() {
            let record = evaluator.evaluate(txn, &mut pending)?;
            pending.store_transaction_location(
                txn.id(),
                Some(TransactionLocation {
                    block_num: block.header.block_num,
                    index: index as u32,
                }),
            );
            total_fees = total_fees
                .checked_add(record.fees_collected.values().sum())
                .ok_or(ChainError::AdditionOverflow)?;
        }

        self.update_active_delegate_list(&mut pending, block)?;
        self.update_random_seed(&mut pending, block)?;

        let undo = pending.get_undo_state();
        pending.apply_changes();

        self.save_undo_state(store, block_id, block.header.block_num, undo);

        store.store_property("head_block_num", Some(serde_json::json!(block.header.block_num)));
        store.store_property(HEAD_BLOCK_ID_PROPERTY, Some(serde_json::json!(block_id)));
        store.store_property("head_timestamp", Some(serde_json::json!(block.header.timestamp)));
        store.store_full_block(block_id, Some(block.clone()));

        let record = BlockRecord {
            header: block.header.clone(),
            transaction_ids: block.transactions.iter().map(|t| t.id()).collect(),
            size_bytes: serde_json::to_vec(block).map(|b| b.len() as u64).unwrap_or(0),
            latency_secs: 0,
            total_fees,
            processing_time_micros: 0,
        };
        store.store_block_record(block_id, Some(record.clone()));
        let mut block_ids = store.get_block_ids_at(block.header.block_num);
        if !block_ids.contains(&block_id) {
            block_ids.push(block_id);
        }
        store.store_block_ids_at(block.header.block_num, block_ids);

        let mut tree = ForkTree::new(store);
        tree.store_and_index(block_id, &block.header);
        tree.mark_included(block_id, true);

        let summary = BlockSummary {
            block_id,
            record,
            market_transactions,
        };
        self.observers.notify_block_applied(summary.clone());
        tracing::info!(block_num = block.header.block_num, ?block_id, total_fees, "block committed");
        Ok(summary)
    }

    fn verify_checkpoint(&self, block_num: u64, block_id: BlockId) -> ChainResult<()> {
        if let Some(expected_hex) = self.params.checkpoints.get(&block_num) {
            let expected = hex::decode(expected_hex).map_err(|_| ChainError::FailedCheckpointVerification)?;
            if expected != block_id.as_slice() {
                return Err(ChainError::FailedCheckpointVerification);
            }
        }
        Ok(())
    }

    fn verify_header(
        &self,
        store: &dyn ChainStore,
        block: &Block,
        head_block_num: u64,
        head_block_id: BlockId,
        head_timestamp: u64,
    ) -> ChainResult<()> {
        if block.header.block_num != head_block_num + 1 {
            return Err(ChainError::BlockNumbersNotSequential);
        }
        if block.header.previous != head_block_id {
            return Err(ChainError::InvalidPreviousBlockId);
        }
        if block.header.timestamp % self.params.block_interval_secs != 0 {
            return Err(ChainError::InvalidBlockTime);
        }
        if head_block_num > 0 && block.header.timestamp <= head_timestamp {
            return Err(ChainError::TimeInPast);
        }
        let now = store.now();
        if block.header.timestamp > now + 2 * self.params.block_interval_secs {
            return Err(ChainError::TimeInFuture);
        }
        if !block.verify_digest() {
            return Err(ChainError::InvalidBlockDigest);
        }

        let active = self.active_delegate_list(store);
        let expected_signer = self.slot_signee(block.header.timestamp, &active)?;
        if block.header.signer != expected_signer {
            return Err(ChainError::InvalidDelegateSignee);
        }
        if !self.skip_signature_verification {
            let account = store.get_account(block.header.signer).ok_or(ChainError::InvalidDelegateSignee)?;
            let key = account
                .current_active_key(block.header.timestamp)
                .ok_or(ChainError::InvalidDelegateSignee)?;
            let ok = self
                .crypto
                .verify_signature(key, &block.header.signing_digest(), &block.header.signature)
                .map_err(|_| ChainError::InvalidSignature)?;
            if !ok {
                return Err(ChainError::InvalidSignature);
            }
        }
        Ok(())
    }

    fn active_delegate_list(&self, store: &dyn ChainStore) -> Vec<AccountId> {
        store
            .get_property(ACTIVE_DELEGATES_PROPERTY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn slot_signee(&self, timestamp: u64, active: &[AccountId]) -> ChainResult<AccountId> {
        if active.is_empty() {
            return Err(ChainError::Internal("no active delegates".into()));
        }
        let slot = (timestamp / self.params.block_interval_secs) as usize % active.len();
        Ok(active[slot])
    }

    /// §4.F step 4. Missed slots first (this block's delegate order hasn't
    /// been reshuffled yet, per §9's "use `get_active_delegates()` for slots
    /// strictly before a reshuffle boundary" note), then the producing
    /// delegate's own bookkeeping.
    fn update_delegate_production_info(
        &self,
        pending: &mut PendingChainState,
        block: &Block,
        head_block_num: u64,
        head_timestamp: u64,
    ) -> ChainResult<()> {
        let active = self.active_delegate_list(pending);
        let n = active.len().max(1) as u64;
        let mut required_confirmations = pending
            .get_property(REQUIRED_CONFIRMATIONS_PROPERTY)
            .and_then(|v| v.as_i64())
            .unwrap_or(n as i64 * 2);

        let mut slot_ts = if head_block_num > 0 {
            head_timestamp + self.params.block_interval_secs
        } else {
            block.header.timestamp
        };
        while slot_ts < block.header.timestamp {
            let missed_id = self.slot_signee(slot_ts, &active)?;
            let mut delegate = pending.get_account(missed_id).ok_or(ChainError::Internal("missing delegate".into()))?;
            let info = delegate.delegate_info.as_mut().ok_or(ChainError::Internal("signee is not a delegate".into()))?;
            info.blocks_missed += 1;
            pending.store_account(missed_id, Some(delegate));
            required_confirmations += 2;
            slot_ts += self.params.block_interval_secs;
        }

        let signer_id = block.header.signer;
        let mut delegate = pending.get_account(signer_id).ok_or(ChainError::InvalidDelegateSignee)?;
        let info = delegate
            .delegate_info
            .as_mut()
            .ok_or(ChainError::InvalidDelegateSignee)?;
        if info.blocks_produced > 0 {
            let hash = self.crypto.ripemd160(&block.header.previous_secret);
            if hash != info.next_secret_hash {
                return Err(ChainError::InvalidDelegateSignee);
            }
        }
        info.blocks_produced += 1;
        info.next_secret_hash = self.crypto.ripemd160(&block.header.random_seed_hash);
        info.last_block_num_produced = block.header.block_num;
        pending.store_account(signer_id, Some(delegate));

        required_confirmations -= 1;
        let upper_bound = n as i64 * 2;
        required_confirmations = required_confirmations.clamp(1, upper_bound.max(1));
        pending.store_property(REQUIRED_CONFIRMATIONS_PROPERTY, Some(serde_json::json!(required_confirmations)));
        Ok(())
    }

    /// §4.F step 5, branching accumulated-fees sign behaviour by fork height
    /// per §9's hardfork open question: pre-fork subtracts the amount
    /// actually paid out; post-fork subtracts the full scheduled pay
    /// regardless of the delegate's pay rate.
    fn pay_delegate(&self, pending: &mut PendingChainState, block: &Block) -> ChainResult<()> {
        let pending_pay = self.params.base_pay_per_block;
        let signer_id = block.header.signer;
        let mut delegate = pending.get_account(signer_id).ok_or(ChainError::InvalidDelegateSignee)?;
        let info = delegate
            .delegate_info
            .as_mut()
            .ok_or(ChainError::InvalidDelegateSignee)?;
        if info.pay_rate_pct > 100 {
            return Err(ChainError::Internal("pay rate out of range".into()));
        }
        let pay = (pending_pay * info.pay_rate_pct as u64) / 100;
        info.pay_balance = info.pay_balance.checked_add(pay).ok_or(ChainError::AdditionOverflow)?;
        info.votes_for = info.votes_for.checked_add(pay).ok_or(ChainError::AdditionOverflow)?;
        pending.store_account(signer_id, Some(delegate));

        let prior_fees = pending.get_accumulated_fees(BASE_ASSET_ID);
        let subtracted = match self.params.rule_set_at(block.header.block_num) {
            RuleSet::V1 => pay,
            RuleSet::V2 | RuleSet::V7 | RuleSet::Current => pending_pay,
        };
        pending.store_accumulated_fees(BASE_ASSET_ID, prior_fees.saturating_sub(subtracted));

        let mut base = pending.get_asset(BASE_ASSET_ID).ok_or(ChainError::Internal("base asset missing".into()))?;
        base.current_share_supply = base.current_share_supply.saturating_sub(pending_pay - pay);
        pending.store_asset(BASE_ASSET_ID, Some(base));
        Ok(())
    }

    /// §4.F step 6, against the persisted cross-block `dirty_markets`
    /// property (the in-memory `PendingChainState::get_dirty_markets()`
    /// only ever sees writes made during this call's own lifetime, so the
    /// pairs a *previous* block left dirty have to be carried forward
    /// explicitly — see DESIGN.md).
    fn run_market_pass(
        &self,
        pending: &mut PendingChainState,
        now: u64,
        feeds: &dyn FeedProvider,
    ) -> ChainResult<Vec<dpchain_core::MarketTransaction>> {
        let mut dirty: Vec<(AssetId, AssetId)> = pending
            .get_property(DIRTY_MARKETS_PROPERTY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        dirty.sort();
        dirty.dedup();

        let mut transactions = Vec::new();
        let mut still_dirty = Vec::new();
        for (quote, base) in dirty {
            let feed_set = feeds.feed_set(quote);
            // Run this pair's pass against a nested overlay rather than
            // `pending` directly: a market-layer failure (§4.E insufficient
            // feeds/depth) must leave the pair with *no* effect — no
            // balance credits, no order/cover mutations, no emitted
            // transactions — only the market status (stamped with the
            // failure reason by `MarketEngine::fail_pair`) is meant to
            // survive. Applying the child overlay into `pending` only on
            // success is what makes that true; on failure the child (and
            // everything it wrote except the status, recovered below) is
            // simply dropped.
            let mut child = PendingChainState::new(&mut *pending);
            let mut engine = MarketEngine::new(&mut child, quote, base, now, &self.params);
            match engine.run(&feed_set) {
                Ok(mut emitted) => {
                    let still_has_orders = pair_has_open_orders(&child, quote, base);
                    child.apply_changes();
                    transactions.append(&mut emitted);
                    if still_has_orders {
                        still_dirty.push((quote, base));
                    }
                }
                Err(err) if err.is_market_layer() => {
                    if let Some(status) = child.get_market_status(quote, base) {
                        pending.store_market_status(quote, base, Some(status));
                    }
                    still_dirty.push((quote, base));
                }
                Err(err) => return Err(err),
            }
        }

        let newly_created = pending.get_dirty_markets();
        still_dirty.extend(newly_created);
        still_dirty.sort();
        still_dirty.dedup();
        pending.store_property(DIRTY_MARKETS_PROPERTY, Some(serde_json::json!(still_dirty)));
        Ok(transactions)
    }

    /// §4.F step 8. Replicated with this workspace's blake3 primitive in
    /// place of the original's sha256 (`CryptoProvider` has no sha256 seam;
    /// the shuffle shape — 4-wide Fisher-Yates chunks reseeded each round —
    /// is preserved, only the digest changes).
    fn update_active_delegate_list(&self, pending: &mut PendingChainState, block: &Block) -> ChainResult<()> {
        let n = self.params.active_delegate_count.max(1) as u64;
        if block.header.block_num % n != 0 {
            return Ok(());
        }
        let mut ranked: Vec<_> = pending
            .iter_accounts()
            .into_iter()
            .filter(|a| a.is_delegate())
            .collect();
        ranked.sort_by_key(|a| {
            let votes = a.delegate_info.as_ref().map(|d| d.votes_for).unwrap_or(0);
            (Reverse(votes), a.id)
        });
        ranked.truncate(n as usize);
        let mut active: Vec<AccountId> = ranked.into_iter().map(|a| a.id).collect();

        let num = active.len();
        if num > 0 {
            let seed = pending.get_current_random_seed();
            let mut rand_seed = self.crypto.blake3(&seed);
            let mut i = 0usize;
            while i < num {
                let mut x = 0usize;
                while x < 4 && i < num {
                    let swap_with = rand_seed[x] as usize % num;
                    active.swap(i, swap_with);
                    x += 1;
                    i += 1;
                }
                rand_seed = self.crypto.blake3(&rand_seed);
            }
        }
        pending.store_property(ACTIVE_DELEGATES_PROPERTY, Some(serde_json::json!(active)));
        Ok(())
    }

    /// §4.F step 9.
    fn update_random_seed(&self, pending: &mut PendingChainState, block: &Block) -> ChainResult<()> {
        let current = pending.get_current_random_seed();
        let mut payload = Vec::with_capacity(64);
        payload.extend_from_slice(&block.header.previous_secret);
        payload.extend_from_slice(&current);
        let folded = self.crypto.blake3(&payload);
        let seed20 = self.crypto.ripemd160(&folded);
        let mut seed = [0u8; 32];
        seed[..20].copy_from_slice(&seed20);
        pending.store_property("random_seed", Some(serde_json::json!(seed)));
        Ok(())
    }

    /// §4.F step 10. Skipped once the head has fallen behind the newest
    /// checkpoint, matching `save_undo_state`'s early return.
    fn save_undo_state(
        &self,
        store: &mut dyn ChainStore,
        block_id: BlockId,
        block_num: u64,
        undo: dpchain_state::Overlay,
    ) {
        if let Some(&last_checkpoint) = self.params.checkpoints.keys().last() {
            if block_num < last_checkpoint {
                return;
            }
        }
        store.store_undo_state(block_id, Some(undo));
        if block_num > self.params.max_undo_history {
            let evict_num = block_num - self.params.max_undo_history;
            for old_id in store.get_block_ids_at(evict_num) {
                store.store_undo_state(old_id, None);
            }
        }
    }

    /// §4.F "pop_block": reads the head's undo state, applies it, and
    /// backs the head pointer up by one.
    pub fn pop_block(&self, store: &mut dyn ChainStore) -> ChainResult<BlockId> {
        let head_block_id: BlockId = store
            .get_property(HEAD_BLOCK_ID_PROPERTY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(ZERO_BLOCK_ID);
        if head_block_id == ZERO_BLOCK_ID {
            return Err(ChainError::Internal("cannot pop genesis".into()));
        }
        let undo = store
            .get_undo_state(head_block_id)
            .ok_or(ChainError::BlockOlderThanUndoHistory)?;
        undo.apply_to(store);

        let popped_header = store
            .get_full_block(head_block_id)
            .map(|b| b.header)
            .ok_or(ChainError::KeyNotFound)?;
        let new_head_num = popped_header.block_num.saturating_sub(1);
        store.store_property("head_block_num", Some(serde_json::json!(new_head_num)));
        store.store_property(HEAD_BLOCK_ID_PROPERTY, Some(serde_json::json!(popped_header.previous)));

        let mut tree = ForkTree::new(store);
        tree.mark_included(head_block_id, false);

        self.observers.notify_state_changed(undo);
        tracing::info!(block_num = popped_header.block_num, ?head_block_id, "block popped");
        Ok(head_block_id)
    }

    /// §4.G "Switching forks": pop back to the shared ancestor, then extend
    /// forward along `target`'s history. Blocks along the new path must
    /// already be known to the store (delivered and indexed via
    /// `ForkTree::store_and_index` before this is called).
    pub fn switch_to_fork(
        &self,
        store: &mut dyn ChainStore,
        target: BlockId,
        feeds: &dyn FeedProvider,
    ) -> ChainResult<Vec<BlockSummary>> {
        let history = {
            let tree = ForkTree::new(store);
            tree.get_fork_history(target)?
        };
        let common_ancestor = *history.last().expect("history always has at least one entry");

        loop {
            let head_id: BlockId = store
                .get_property(HEAD_BLOCK_ID_PROPERTY)
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or(ZERO_BLOCK_ID);
            if head_id == common_ancestor {
                break;
            }
            self.pop_block(store)?;
        }

        let mut summaries = Vec::new();
        for id in history.into_iter().rev().skip(1) {
            let block = store.get_full_block(id).ok_or(ChainError::KeyNotFound)?;
            summaries.push(self.extend_chain(store, block, feeds)?);
        }
        Ok(summaries)
    }
}

fn pair_has_open_orders(store: &dyn ChainStore, quote: AssetId, base: AssetId) -> bool {
    !store.iter_bids(quote, base).is_empty()
        || !store.iter_asks(quote, base).is_empty()
        || !store.iter_shorts(quote, base).is_empty()
        || !store.iter_collateral(quote, base).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::open_or_init;
    use dpchain_core::{Genesis, GenesisBalance, GenesisDelegate};
    use dpchain_crypto::{generate_keypair, DefaultCryptoProvider};
    use dpchain_state::MemoryChainStore;

    fn setup() -> (MemoryChainStore, Vec<u8>, Vec<u8>, AccountId, [u8; 32]) {
        let (pk, sk) = generate_keypair();
        let crypto = DefaultCryptoProvider::new();
        let owner_address = crypto.address_from_public_key(&pk).unwrap();
        let genesis = Genesis {
            timestamp: 0,
            base_symbol: "BASE".into(),
            base_name: "Base".into(),
            base_precision: 5,
            initial_balances: vec![GenesisBalance { owner: owner_address, amount: 1_000_000 }],
            delegates: vec![GenesisDelegate {
                name: "delegate1".into(),
                owner_public_key: pk.clone(),
                pay_rate_pct: 100,
            }],
            market_issued_assets: vec![],
        };
        let mut store = MemoryChainStore::new();
        open_or_init(&genesis, &mut store).unwrap();
        let chain_id = genesis.chain_id();
        (store, pk, sk, 1, chain_id)
    }

    fn signed_header(
        crypto: &DefaultCryptoProvider,
        sk: &[u8],
        block_num: u64,
        previous: BlockId,
        timestamp: u64,
        signer: AccountId,
        previous_secret: [u8; 32],
        random_seed_hash: [u8; 32],
        transactions_digest: [u8; 32],
    ) -> dpchain_core::BlockHeader {
        let mut header = dpchain_core::BlockHeader {
            block_num,
            previous,
            timestamp,
            signer,
            signature: Vec::new(),
            random_seed_hash,
            previous_secret,
            transactions_digest,
        };
        let digest = header.signing_digest();
        header.signature = crypto.sign_message(sk, &digest).unwrap();
        header
    }

    #[test]
    fn first_block_pays_delegate_and_advances_head() {
        let (mut store, _pk, sk, delegate_id, chain_id) = setup();
        let crypto = DefaultCryptoProvider::new();
        let params = ConsensusParams {
            active_delegate_count: 1,
            ..ConsensusParams::reference()
        };
        let processor = BlockProcessor::new(Arc::new(crypto.clone()), params, chain_id, Arc::new(ObserverBus::new()));

        let block = Block {
            header: signed_header(
                &crypto,
                &sk,
                1,
                ZERO_BLOCK_ID,
                30,
                delegate_id,
                [0u8; 32],
                [7u8; 32],
                [0u8; 32],
            ),
            transactions: vec![],
        };
        let summary = processor.extend_chain(&mut store, block, &NoFeeds).unwrap();
        assert_eq!(summary.record.header.block_num, 1);
        assert_eq!(store.get_head_block_num(), 1);
        let delegate = store.get_account(delegate_id).unwrap();
        let info = delegate.delegate_info.unwrap();
        assert_eq!(info.blocks_produced, 1);
        assert!(info.pay_balance > 0);
    }

    #[test]
    fn wrong_signer_is_rejected_and_marked_invalid() {
        let (mut store, _pk, sk, _delegate_id, chain_id) = setup();
        let crypto = DefaultCryptoProvider::new();
        let params = ConsensusParams {
            active_delegate_count: 1,
            ..ConsensusParams::reference()
        };
        let processor = BlockProcessor::new(Arc::new(crypto.clone()), params, chain_id, Arc::new(ObserverBus::new()));

        let block = Block {
            header: signed_header(&crypto, &sk, 1, ZERO_BLOCK_ID, 30, 99, [0u8; 32], [7u8; 32], [0u8; 32]),
            transactions: vec![],
        };
        let err = processor.extend_chain(&mut store, block.clone(), &NoFeeds).unwrap_err();
        assert_eq!(err, ChainError::InvalidDelegateSignee);
        assert!(!store.get_fork_node(block.header.id()).unwrap().is_valid);
    }

    #[test]
    fn pop_block_restores_pre_block_state() {
        let (mut store, _pk, sk, delegate_id, chain_id) = setup();
        let crypto = DefaultCryptoProvider::new();
        let params = ConsensusParams {
            active_delegate_count: 1,
            ..ConsensusParams::reference()
        };
        let processor = BlockProcessor::new(Arc::new(crypto.clone()), params, chain_id, Arc::new(ObserverBus::new()));

        let block = Block {
            header: signed_header(&crypto, &sk, 1, ZERO_BLOCK_ID, 30, delegate_id, [0u8; 32], [7u8; 32], [0u8; 32]),
            transactions: vec![],
        };
        processor.extend_chain(&mut store, block, &NoFeeds).unwrap();
        assert_eq!(store.get_head_block_num(), 1);

        processor.pop_block(&mut store).unwrap();
        assert_eq!(store.get_head_block_num(), 0);
        let delegate = store.get_account(delegate_id).unwrap();
        assert_eq!(delegate.delegate_info.unwrap().blocks_produced, 0);
    }
}
