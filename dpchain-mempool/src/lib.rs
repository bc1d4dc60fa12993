//! The pending-transaction mempool (§4.H): a fee-sorted index of
//! transactions evaluated against a running pending state layered on the
//! current head, revalidated wholesale whenever the head moves.
//!
//! Grounded on `original_source/libraries/blockchain/chain_database.cpp`'s
//! `store_pending_transaction`/`revalidate_pending`/`get_pending_transactions`
//! and its private `fee_index` comparator (highest fee first, lowest
//! transaction id breaking ties).

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dpchain_config::ConsensusParams;
use dpchain_core::{ChainError, ChainResult, SignedTransaction, TransactionId};
use dpchain_crypto::CryptoProvider;
use dpchain_evaluator::TransactionEvaluator;
use dpchain_state::{ChainStore, PendingChainState};
use parking_lot::RwLock;

/// Past this many queued transactions, the effective relay fee scales up
/// quadratically with the overage rather than staying flat — the original
/// chain's way of making spam exponentially expensive once the queue is
/// already full, without an outright cap. The constant itself isn't present
/// in the retrieval pack's excerpted headers; 2000 matches the historical
/// BitShares default (`BTS_BLOCKCHAIN_MAX_PENDING_QUEUE_SIZE`) this logic is
/// grounded on.
pub const MAX_PENDING_QUEUE_SIZE: usize = 2_000;

struct MempoolInner {
    transactions: BTreeMap<TransactionId, SignedTransaction>,
    fee_index: BTreeSet<(Reverse<u64>, TransactionId)>,
}

impl MempoolInner {
    fn new() -> Self {
        MempoolInner {
            transactions: BTreeMap::new(),
            fee_index: BTreeSet::new(),
        }
    }

    fn insert(&mut self, id: TransactionId, txn: SignedTransaction, fees: u64) {
        self.transactions.insert(id, txn);
        self.fee_index.insert((Reverse(fees), id));
    }

    fn remove(&mut self, id: TransactionId) {
        if let Some(existing_fees) = self.fee_for(id) {
            self.fee_index.remove(&(Reverse(existing_fees), id));
        }
        self.transactions.remove(&id);
    }

    fn fee_for(&self, id: TransactionId) -> Option<u64> {
        self.fee_index
            .iter()
            .find(|(_, tx_id)| *tx_id == id)
            .map(|(Reverse(fees), _)| *fees)
    }
}

/// §4.H. Transactions are replayed into a fresh `PendingChainState` layered
/// over the caller's head on every `accept`/`revalidate` call rather than
/// keeping one long-lived overlay between calls — `PendingChainState`
/// borrows its parent store for its own lifetime, which doesn't compose
/// with a mempool that outlives any single borrow of the head store. The
/// fee evaluation this produces is identical either way: each transaction
/// still sees every earlier-accepted transaction's effects.
pub struct Mempool {
    crypto: Arc<dyn CryptoProvider>,
    chain_id: [u8; 32],
    relay_fee: u64,
    required_fee: u64,
    inner: RwLock<MempoolInner>,
}

impl Mempool {
    pub fn new(crypto: Arc<dyn CryptoProvider>, chain_id: [u8; 32], params: &ConsensusParams, relay_fee: u64) -> Self {
        Mempool {
            crypto,
            chain_id,
            relay_fee,
            required_fee: params.required_fee,
            inner: RwLock::new(MempoolInner::new()),
        }
    }

    fn evaluator(&self, required_fee: u64) -> TransactionEvaluator {
        TransactionEvaluator::new(self.crypto.clone(), self.chain_id, required_fee)
    }

    /// Replays every currently-held transaction, in fee order, into a fresh
    /// overlay on `head`, and returns it alongside the ids that should be
    /// evaluated next (i.e. none — this is purely the "rebuild the running
    /// state" half of `revalidate_pending`).
    fn rebuild_running_state<'p>(&self, head: &'p mut dyn ChainStore, skip: Option<TransactionId>) -> PendingChainState<'p> {
        let mut state = PendingChainState::new(head);
        let evaluator = self.evaluator(self.relay_fee);
        let inner = self.inner.read();
        for (_, id) in &inner.fee_index {
            if Some(*id) == skip {
                continue;
            }
            if let Some(txn) = inner.transactions.get(id) {
                let _ = evaluator.evaluate(txn, &mut state);
            }
        }
        state
    }

    /// §4.H "On accept": rejects duplicates, evaluates against the running
    /// state with the queue-overage-scaled relay fee, and folds the
    /// transaction's effects into that state for every evaluation after it.
    pub fn accept(&self, txn: SignedTransaction, head: &mut dyn ChainStore) -> ChainResult<()> {
        self.accept_inner(txn, head, true)
    }

    /// §6 wallet boundary "`store_pending_transaction(tx, override_limits)`":
    /// skips the queue-overage relay-fee scaling, gating solely on the
    /// consensus-minimum `required_fee` — a trusted local wallet's own
    /// transactions get first claim on a congested queue rather than
    /// competing with relayed ones at the scaled rate.
    pub fn accept_override(&self, txn: SignedTransaction, head: &mut dyn ChainStore) -> ChainResult<()> {
        self.accept_inner(txn, head, false)
    }

    fn accept_inner(&self, txn: SignedTransaction, head: &mut dyn ChainStore, scale_by_queue: bool) -> ChainResult<()> {
        let id = txn.id();
        {
            let inner = self.inner.read();
            if inner.transactions.contains_key(&id) {
                return Err(ChainError::DuplicateTransaction);
            }
        }

        let required_fee = if scale_by_queue {
            let queue_len = self.inner.read().transactions.len();
            if queue_len > MAX_PENDING_QUEUE_SIZE {
                let overage = (queue_len - MAX_PENDING_QUEUE_SIZE) as u64;
                self.relay_fee.saturating_mul(overage).saturating_mul(overage)
            } else {
                self.relay_fee
            }
            .max(self.required_fee)
        } else {
            self.required_fee
        };

        let mut running = self.rebuild_running_state(head, None);
        let evaluator = self.evaluator(required_fee);
        let record = evaluator.evaluate(&txn, &mut running)?;
        let fees: u64 = record.fees_collected.values().sum();

        self.inner.write().insert(id, txn, fees);
        tracing::debug!(?id, fees, required_fee, "transaction accepted into mempool");
        Ok(())
    }

    /// §4.H "On new head": discards every transaction that no longer
    /// evaluates cleanly against the new head, in fee order so earlier
    /// (higher-fee) transactions get first claim on any now-scarcer inputs.
    pub fn revalidate(&self, head: &mut dyn ChainStore) {
        let ids: Vec<TransactionId> = {
            let inner = self.inner.read();
            inner.fee_index.iter().map(|(_, id)| *id).collect()
        };
        let mut discarded = Vec::new();
        let mut kept = Vec::new();

        {
            let mut state = PendingChainState::new(head);
            let evaluator = self.evaluator(self.relay_fee);
            let inner = self.inner.read();
            for id in ids {
                let Some(txn) = inner.transactions.get(&id).cloned() else { continue };
                match evaluator.evaluate(&txn, &mut state) {
                    Ok(record) => {
                        let fees: u64 = record.fees_collected.values().sum();
                        kept.push((id, txn, fees));
                    }
                    Err(_) => discarded.push(id),
                }
            }
        }

        let mut inner = self.inner.write();
        *inner = MempoolInner::new();
        for (id, txn, fees) in kept {
            inner.insert(id, txn, fees);
        }
        if !discarded.is_empty() {
            tracing::debug!(discarded = discarded.len(), "discarded stale pending transactions on new head");
        }
    }

    /// §4.H: the fee-ordered list block production walks.
    pub fn get_pending_transactions(&self) -> Vec<SignedTransaction> {
        let inner = self.inner.read();
        inner
            .fee_index
            .iter()
            .filter_map(|(_, id)| inner.transactions.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpchain_config::ConsensusParams;
    use dpchain_core::{Balance, Operation, Transaction, TxSignature, WithdrawCondition, BASE_ASSET_ID, ZERO_SLATE_ID};
    use dpchain_crypto::{generate_keypair, DefaultCryptoProvider};
    use dpchain_state::MemoryChainStore;

    fn sign(txn: &Transaction, chain_id: &[u8; 32], sk: &[u8], pk: &[u8]) -> SignedTransaction {
        let crypto = DefaultCryptoProvider::new();
        let unsigned = SignedTransaction {
            transaction: txn.clone(),
            signatures: vec![],
        };
        let digest = unsigned.digest(chain_id);
        let signature = crypto.sign_message(sk, &digest).unwrap();
        SignedTransaction {
            transaction: txn.clone(),
            signatures: vec![TxSignature {
                public_key: pk.to_vec(),
                signature,
            }],
        }
    }

    fn funded_store(owner: [u8; 20], amount: u64) -> MemoryChainStore {
        let mut store = MemoryChainStore::new();
        store.set_now(100);
        let condition = WithdrawCondition { owner, asset_id: BASE_ASSET_ID };
        store.store_balance(
            condition.id(),
            Some(Balance {
                condition,
                amount,
                slate_id: ZERO_SLATE_ID,
                created_at: 0,
                last_update: 0,
            }),
        );
        store
    }

    #[test]
    fn accepts_and_lists_by_fee_descending() {
        let (pk, sk) = generate_keypair();
        let crypto = Arc::new(DefaultCryptoProvider::new());
        let owner = crypto.address_from_public_key(&pk).unwrap();
        let mut store = funded_store(owner, 10_000);
        let chain_id = [3u8; 32];
        let params = ConsensusParams { required_fee: 0, ..ConsensusParams::reference() };
        let mempool = Mempool::new(crypto, chain_id, &params, 10);

        let small = Transaction {
            operations: vec![Operation::Withdraw { owner, asset_id: BASE_ASSET_ID, amount: 50 }],
            expiration: 200,
        };
        let big = Transaction {
            operations: vec![Operation::Withdraw { owner, asset_id: BASE_ASSET_ID, amount: 500 }],
            expiration: 200,
        };
        mempool.accept(sign(&small, &chain_id, &sk, &pk), &mut store).unwrap();
        mempool.accept(sign(&big, &chain_id, &sk, &pk), &mut store).unwrap();

        let pending = mempool.get_pending_transactions();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].transaction.operations.len(), 1);
        match &pending[0].transaction.operations[0] {
            Operation::Withdraw { amount, .. } => assert_eq!(*amount, 500),
            _ => panic!("expected withdraw"),
        }
    }

    #[test]
    fn duplicate_transaction_rejected() {
        let (pk, sk) = generate_keypair();
        let crypto = Arc::new(DefaultCryptoProvider::new());
        let owner = crypto.address_from_public_key(&pk).unwrap();
        let mut store = funded_store(owner, 10_000);
        let chain_id = [4u8; 32];
        let params = ConsensusParams { required_fee: 0, ..ConsensusParams::reference() };
        let mempool = Mempool::new(crypto, chain_id, &params, 10);

        let txn = Transaction {
            operations: vec![Operation::Withdraw { owner, asset_id: BASE_ASSET_ID, amount: 50 }],
            expiration: 200,
        };
        let signed = sign(&txn, &chain_id, &sk, &pk);
        mempool.accept(signed.clone(), &mut store).unwrap();
        let err = mempool.accept(signed, &mut store).unwrap_err();
        assert_eq!(err, ChainError::DuplicateTransaction);
    }

    #[test]
    fn revalidate_drops_transactions_that_no_longer_pass() {
        let (pk, sk) = generate_keypair();
        let crypto = Arc::new(DefaultCryptoProvider::new());
        let owner = crypto.address_from_public_key(&pk).unwrap();
        let mut store = funded_store(owner, 100);
        let chain_id = [5u8; 32];
        let params = ConsensusParams { required_fee: 0, ..ConsensusParams::reference() };
        let mempool = Mempool::new(crypto, chain_id, &params, 10);

        let txn = Transaction {
            operations: vec![Operation::Withdraw { owner, asset_id: BASE_ASSET_ID, amount: 50 }],
            expiration: 200,
        };
        mempool.accept(sign(&txn, &chain_id, &sk, &pk), &mut store).unwrap();
        assert_eq!(mempool.len(), 1);

        // Balance drained by a block landing: the pending withdraw can no
        // longer be covered.
        let condition = WithdrawCondition { owner, asset_id: BASE_ASSET_ID };
        store.store_balance(condition.id(), Some(Balance {
            condition,
            amount: 0,
            slate_id: ZERO_SLATE_ID,
            created_at: 0,
            last_update: 0,
        }));
        mempool.revalidate(&mut store);
        assert_eq!(mempool.len(), 0);
    }
}
