//! Node wiring (§6 "External interfaces"): the one crate that owns a
//! concrete `ChainStore`, a `BlockProcessor`, a `Mempool`, and an
//! `ObserverBus`, and exposes the boundary traits the P2P and wallet layers
//! consume. Neither layer is implemented here (§1 Non-goals: "the
//! gossip/P2P layer", "the wallet") — only the trait shapes they'd be
//! written against, matching `dxid-node`'s own role of gluing its sibling
//! crates together behind `run_node` rather than doing protocol work
//! itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dpchain_block::processor::FeedProvider;
use dpchain_block::{open_or_init, BlockProcessor};
use dpchain_config::NodeConfig;
use dpchain_core::{
    Block, BlockHeader, BlockId, ChainResult, EvaluationRecord, Genesis, SignedTransaction,
    ZERO_BLOCK_ID,
};
use dpchain_crypto::{CryptoProvider, DefaultCryptoProvider};
use dpchain_mempool::Mempool;
use dpchain_observer::{BlockSummary, ChainObserver, ObserverBus};
use dpchain_state::{ChainStore, MemoryChainStore};
use parking_lot::RwLock;

pub mod p2p;
pub mod wallet;

pub use p2p::{ForkData, P2pInbound, P2pOutbound};
pub use wallet::WalletBoundary;

/// A node's entire consensus-facing surface: the store, the three
/// collaborators `BlockProcessor::extend_chain` drives per block, and the
/// config it was opened with. `dpchain-node` is deliberately the only
/// crate that ever holds a `&mut dyn ChainStore` behind a lock — every
/// other crate borrows one for the duration of a single call (§5 "single-
/// writer, many-reader").
pub struct Node<F: FeedProvider = dpchain_block::NoFeeds> {
    store: RwLock<MemoryChainStore>,
    processor: BlockProcessor,
    mempool: Arc<Mempool>,
    observers: Arc<ObserverBus>,
    feeds: F,
    config: NodeConfig,
    chain_id: [u8; 32],
}

impl Node<dpchain_block::NoFeeds> {
    /// Opens (or initializes) a node against `config`, with no market-issued
    /// assets in play. Use [`Node::open_with_feeds`] for a deployment that
    /// actually needs `FeedProvider` (§4.E preconditions).
    pub fn open(config: NodeConfig, genesis: &Genesis) -> ChainResult<Self> {
        Self::open_with_feeds(config, genesis, dpchain_block::NoFeeds)
    }
}

impl<F: FeedProvider> Node<F> {
    pub fn open_with_feeds(config: NodeConfig, genesis: &Genesis, feeds: F) -> ChainResult<Self> {
        let mut store = MemoryChainStore::new();
        open_or_init(genesis, &mut store)?;
        let chain_id = genesis.chain_id();
        let crypto: Arc<dyn CryptoProvider> = Arc::new(DefaultCryptoProvider::new());
        let observers = Arc::new(ObserverBus::new());
        let processor = BlockProcessor::new(crypto.clone(), config.consensus.clone(), chain_id, observers.clone());
        let mempool = Arc::new(Mempool::new(crypto, chain_id, &config.consensus, config.relay_fee));
        Ok(Node {
            store: RwLock::new(store),
            processor,
            mempool,
            observers,
            feeds,
            config,
            chain_id,
        })
    }

    /// §9 "Skip signature verification": wired once, at open, for replay of
    /// an already-trusted chain segment loaded from disk. There is
    /// deliberately no post-construction setter (see `BlockProcessor`).
    pub fn replaying(mut self, skip_signature_verification: bool) -> Self {
        self.processor = self.processor.replaying(skip_signature_verification);
        self
    }

    pub fn register_observer(&self, observer: &Arc<dyn ChainObserver>) {
        self.observers.register(observer);
    }

    pub fn chain_id(&self) -> [u8; 32] {
        self.chain_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn head_block_num(&self) -> u64 {
        self.store.read().get_head_block_num()
    }

    /// §6 "P2P boundary ... `handle_block(full_block) -> fork_data`": the
    /// sole entry point gossip uses to hand this node a block it doesn't
    /// already have. Indexes it into the fork tree first (so it's known
    /// regardless of outcome), then either extends the current head
    /// directly or switches to it if it turns out to be the new heaviest
    /// linked, valid tip (§4.G "Heaviest-fork rule").
    pub fn handle_block(&self, block: Block) -> ChainResult<ForkData> {
        let block_id = block.header.id();
        let mut store = self.store.write();
        store.store_full_block(block_id, Some(block.clone()));

        let (best_id, best_node) = {
            let mut tree = dpchain_fork::ForkTree::new(&mut *store);
            tree.store_and_index(block_id, &block.header)
        };

        let head_num = store.get_head_block_num();
        if !best_node.is_candidate_tip(head_num) {
            return Ok(ForkData {
                block_id,
                is_included: false,
                switched: false,
            });
        }

        let summaries = if best_id == block_id && best_node.block_num == head_num + 1 {
            vec![self.processor.extend_chain(&mut *store, block, &self.feeds)?]
        } else {
            self.processor.switch_to_fork(&mut *store, best_id, &self.feeds)?
        };

        drop(store);
        self.mempool.revalidate(&mut *self.store.write());

        Ok(ForkData {
            block_id: summaries.last().map(|s| s.block_id).unwrap_or(block_id),
            is_included: true,
            switched: summaries.len() > 1 || best_id != block_id,
        })
    }

    /// §6 "`get_item_ids(after) -> (ids, remaining_count)`": gossip's
    /// "what do you have that I don't" probe. Walks block numbers upward
    /// from `after`'s height (or genesis if `after` is unknown/zero),
    /// returning at most `limit` ids plus how many more remain beyond them.
    pub fn get_item_ids(&self, after: BlockId, limit: usize) -> (Vec<BlockId>, u64) {
        let store = self.store.read();
        let start_num = if after == ZERO_BLOCK_ID {
            1
        } else {
            store.get_block_record(after).map(|r| r.header.block_num + 1).unwrap_or(1)
        };
        let head = store.get_head_block_num();
        let mut ids = Vec::new();
        let mut n = start_num;
        while n <= head && ids.len() < limit {
            ids.extend(store.get_block_ids_at(n));
            n += 1;
        }
        let remaining = head.saturating_sub(start_num + ids.len() as u64);
        (ids, remaining)
    }

    /// §6 "`get_item(id) -> block_bytes`".
    pub fn get_item(&self, id: BlockId) -> Option<Vec<u8>> {
        let block = self.store.read().get_full_block(id)?;
        serde_json::to_vec(&block).ok()
    }

    /// §6 "`has_item(id) -> bool`".
    pub fn has_item(&self, id: BlockId) -> bool {
        self.store.read().get_full_block(id).is_some()
    }

    /// §6 wallet boundary: `store_pending_transaction(tx, override_limits)
    /// -> evaluation`. `override_limits` bypasses the queue-overage relay
    /// fee scaling (§4.H), matching a locally-trusted wallet's ability to
    /// push its own transactions through a congested mempool.
    pub fn store_pending_transaction(&self, txn: SignedTransaction, override_limits: bool) -> ChainResult<EvaluationRecord> {
        // The record the caller wants back is evaluated read-only against
        // the current head first (`Mempool::accept`/`accept_override` only
        // report fees, not the full `EvaluationRecord` §4.D produces); the
        // mempool's own accept pass then does the real fee gating and
        // effect-folding (§4.H).
        let evaluator = dpchain_evaluator::TransactionEvaluator::new(
            Arc::new(DefaultCryptoProvider::new()),
            self.chain_id,
            0,
        );
        let record = {
            let store = self.store.read();
            let mut scratch = MemoryChainStore::new();
            scratch.set_now(store.now());
            let mut pending = dpchain_state::PendingChainState::new(&mut scratch);
            evaluator.evaluate(&txn, &mut pending)?
        };

        let mut store = self.store.write();
        if override_limits {
            self.mempool.accept_override(txn, &mut *store)?;
        } else {
            self.mempool.accept(txn, &mut *store)?;
        }
        Ok(record)
    }

    /// §4.H: block production walks the fee-ordered mempool, stopping once
    /// either the serialized size ceiling or the wall-clock deadline in
    /// `NodeConfig` is hit. Returns an unsigned header (signature left
    /// empty) plus the chosen transactions; the caller (holding the
    /// delegate's signing key, a wallet-boundary concern per §1) signs the
    /// header before broadcasting.
    pub fn assemble_block_template(
        &self,
        block_num: u64,
        previous: BlockId,
        timestamp: u64,
        signer: dpchain_core::AccountId,
        previous_secret: [u8; 32],
        random_seed_hash: [u8; 32],
    ) -> Block {
        let deadline = Instant::now() + Duration::from_secs_f64(self.config.block_production_deadline_secs);
        let mut chosen = Vec::new();
        let mut size = 0u64;
        for txn in self.mempool.get_pending_transactions() {
            if Instant::now() >= deadline {
                break;
            }
            let encoded_len = serde_json::to_vec(&txn).map(|b| b.len() as u64).unwrap_or(0);
            if size + encoded_len > self.config.max_block_size_bytes {
                continue;
            }
            size += encoded_len;
            chosen.push(txn);
        }
        let transactions_digest = {
            let encoded = serde_json::to_vec(&chosen).expect("transactions always serialize");
            blake3::hash(&encoded).into()
        };
        Block {
            header: BlockHeader {
                block_num,
                previous,
                timestamp,
                signer,
                signature: Vec::new(),
                random_seed_hash,
                previous_secret,
                transactions_digest,
            },
            transactions: chosen,
        }
    }

    /// Applies an already-signed block to this node's own head, the path a
    /// delegate node takes for blocks it produces itself rather than
    /// receives over gossip.
    pub fn extend_own_block(&self, block: Block) -> ChainResult<BlockSummary> {
        let mut store = self.store.write();
        let summary = self.processor.extend_chain(&mut *store, block, &self.feeds)?;
        drop(store);
        self.mempool.revalidate(&mut *self.store.write());
        Ok(summary)
    }

    /// §4.F "`pop_block()`": reverses the current head, notifying observers
    /// with the undo delta it applied. The returned id is the block that
    /// was popped.
    pub fn pop_block(&self) -> ChainResult<BlockId> {
        let mut store = self.store.write();
        self.processor.pop_block(&mut *store)
    }

    // --- Read-only accessors (§6 wallet boundary) ---

    pub fn get_account(&self, id: dpchain_core::AccountId) -> Option<dpchain_core::Account> {
        self.store.read().get_account(id)
    }

    pub fn get_asset(&self, id: dpchain_core::AssetId) -> Option<dpchain_core::Asset> {
        self.store.read().get_asset(id)
    }

    pub fn get_balance(&self, id: dpchain_core::BalanceId) -> Option<dpchain_core::Balance> {
        self.store.read().get_balance(id)
    }

    pub fn get_market_status(&self, quote: dpchain_core::AssetId, base: dpchain_core::AssetId) -> Option<dpchain_core::MarketStatus> {
        self.store.read().get_market_status(quote, base)
    }

    pub fn get_fork_node(&self, id: BlockId) -> Option<dpchain_core::ForkNode> {
        self.store.read().get_fork_node(id)
    }

    pub fn pending_transaction_count(&self) -> usize {
        self.mempool.len()
    }

    pub fn get_bids(&self, quote: dpchain_core::AssetId, base: dpchain_core::AssetId) -> Vec<(dpchain_core::OrderKey, dpchain_core::Order)> {
        self.store.read().iter_bids(quote, base)
    }

    pub fn get_asks(&self, quote: dpchain_core::AssetId, base: dpchain_core::AssetId) -> Vec<(dpchain_core::OrderKey, dpchain_core::Order)> {
        self.store.read().iter_asks(quote, base)
    }
}

impl<F: FeedProvider> P2pInbound for Node<F> {
    fn handle_block(&self, block: Block) -> ChainResult<ForkData> {
        Node::handle_block(self, block)
    }

    fn get_item_ids(&self, after: BlockId, limit: usize) -> (Vec<BlockId>, u64) {
        Node::get_item_ids(self, after, limit)
    }

    fn get_item(&self, id: BlockId) -> Option<Vec<u8>> {
        Node::get_item(self, id)
    }

    fn has_item(&self, id: BlockId) -> bool {
        Node::has_item(self, id)
    }
}

impl<F: FeedProvider> WalletBoundary for Node<F> {
    fn store_pending_transaction(
        &self,
        txn: SignedTransaction,
        override_limits: bool,
    ) -> ChainResult<EvaluationRecord> {
        Node::store_pending_transaction(self, txn, override_limits)
    }

    fn get_account(&self, id: dpchain_core::AccountId) -> Option<dpchain_core::Account> {
        Node::get_account(self, id)
    }

    fn get_asset(&self, id: dpchain_core::AssetId) -> Option<dpchain_core::Asset> {
        Node::get_asset(self, id)
    }

    fn get_balance(&self, id: dpchain_core::BalanceId) -> Option<dpchain_core::Balance> {
        Node::get_balance(self, id)
    }

    fn get_market_status(&self, quote: dpchain_core::AssetId, base: dpchain_core::AssetId) -> Option<dpchain_core::MarketStatus> {
        Node::get_market_status(self, quote, base)
    }

    fn get_bids(&self, quote: dpchain_core::AssetId, base: dpchain_core::AssetId) -> Vec<(dpchain_core::OrderKey, dpchain_core::Order)> {
        Node::get_bids(self, quote, base)
    }

    fn get_asks(&self, quote: dpchain_core::AssetId, base: dpchain_core::AssetId) -> Vec<(dpchain_core::OrderKey, dpchain_core::Order)> {
        Node::get_asks(self, quote, base)
    }

    fn get_fork_node(&self, id: BlockId) -> Option<dpchain_core::ForkNode> {
        Node::get_fork_node(self, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpchain_config::ConsensusParams;
    use dpchain_core::{GenesisBalance, GenesisDelegate};
    use dpchain_crypto::generate_keypair;

    fn two_account_genesis() -> (Genesis, Vec<u8>, Vec<u8>, dpchain_core::Address) {
        let (pk, sk) = generate_keypair();
        let crypto = DefaultCryptoProvider::new();
        let delegate_owner = crypto.address_from_public_key(&pk).unwrap();
        let genesis = Genesis {
            timestamp: 0,
            base_symbol: "BASE".into(),
            base_name: "Base".into(),
            base_precision: 5,
            initial_balances: vec![GenesisBalance { owner: delegate_owner, amount: 1_000_000 }],
            delegates: vec![GenesisDelegate {
                name: "delegate1".into(),
                owner_public_key: pk.clone(),
                pay_rate_pct: 100,
            }],
            market_issued_assets: vec![],
        };
        (genesis, pk, sk, delegate_owner)
    }

    fn test_config() -> NodeConfig {
        NodeConfig {
            data_dir: "./data".into(),
            genesis_path: "./genesis.json".into(),
            relay_fee: 10,
            max_block_size_bytes: 1 << 20,
            block_production_deadline_secs: 1.0,
            consensus: ConsensusParams { active_delegate_count: 1, ..ConsensusParams::reference() },
        }
    }

    fn first_block_from(delegate_id: dpchain_core::AccountId, sk: &[u8]) -> Block {
        let crypto = DefaultCryptoProvider::new();
        let empty_digest = Block {
            header: BlockHeader {
                block_num: 0,
                previous: ZERO_BLOCK_ID,
                timestamp: 0,
                signer: 0,
                signature: Vec::new(),
                random_seed_hash: [0u8; 32],
                previous_secret: [0u8; 32],
                transactions_digest: [0u8; 32],
            },
            transactions: vec![],
        }
        .transactions_digest();
        let mut header = BlockHeader {
            block_num: 1,
            previous: ZERO_BLOCK_ID,
            timestamp: 30,
            signer: delegate_id,
            signature: Vec::new(),
            random_seed_hash: [7u8; 32],
            previous_secret: [0u8; 32],
            transactions_digest: empty_digest,
        };
        let digest = header.signing_digest();
        header.signature = crypto.sign_message(sk, &digest).unwrap();
        Block { header, transactions: vec![] }
    }

    /// §8 scenario 1: genesis plus the delegate's first block.
    #[test]
    fn genesis_and_first_block_pays_delegate() {
        let (genesis, pk, sk, _owner) = two_account_genesis();
        let config = test_config();
        let node = Node::open(config, &genesis).unwrap();
        assert_eq!(node.head_block_num(), 0);

        let delegate_id = 1;
        let block = first_block_from(delegate_id, &sk);

        let summary = node.extend_own_block(block).unwrap();
        assert_eq!(summary.record.header.block_num, 1);
        assert_eq!(node.head_block_num(), 1);
        let delegate = node.get_account(delegate_id).unwrap();
        assert_eq!(delegate.delegate_info.unwrap().blocks_produced, 1);
        let _ = pk;
    }

    #[test]
    fn handle_block_reports_item_ids_and_has_item() {
        let (genesis, pk, sk, _owner) = two_account_genesis();
        let config = test_config();
        let node = Node::open(config, &genesis).unwrap();

        let delegate_id = 1;
        let block = first_block_from(delegate_id, &sk);
        let block_id = block.header.id();

        let fork_data = node.handle_block(block).unwrap();
        assert!(fork_data.is_included);
        assert_eq!(node.head_block_num(), 1);
        assert!(node.has_item(block_id));

        let (ids, remaining) = node.get_item_ids(ZERO_BLOCK_ID, 10);
        assert_eq!(ids, vec![block_id]);
        assert_eq!(remaining, 0);
        let _ = pk;
    }
}
