//! The observer bus (§4.I): fan-out of block-applied / state-changed
//! notifications to external subscribers. Observers hold no ownership over
//! the chain (§3 "Ownership") — they register a weak reference and are
//! silently dropped from the bus once their `Arc` goes away.
//!
//! Dispatch is scheduled onto the async runtime rather than run inline, so
//! it lands after the current non-suspendable block-processing section
//! completes (§5 "Suspension points") and observer callbacks are free to
//! suspend without blocking the block pipeline.

use dpchain_core::{BlockId, BlockRecord, MarketTransaction};
use dpchain_state::Overlay;
use std::sync::{Arc, RwLock, Weak};

/// What `BlockProcessor::extend_chain` hands observers once a block commits.
#[derive(Debug, Clone)]
pub struct BlockSummary {
    pub block_id: BlockId,
    pub record: BlockRecord,
    pub market_transactions: Vec<MarketTransaction>,
}

pub trait ChainObserver: Send + Sync {
    fn block_applied(&self, summary: &BlockSummary);
    fn state_changed(&self, undo: &Overlay);
}

/// Ordering guarantee (§5): for any two blocks committed, their
/// `block_applied` notifications are spawned in commit order. Since each
/// notification is an independent task, this bounds the *dispatch* order,
/// not necessarily the order in which tasks finish running on the executor.
#[derive(Default)]
pub struct ObserverBus {
    observers: RwLock<Vec<Weak<dyn ChainObserver>>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        ObserverBus {
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, observer: &Arc<dyn ChainObserver>) {
        self.observers.write().unwrap().push(Arc::downgrade(observer));
    }

    pub fn notify_block_applied(&self, summary: BlockSummary) {
        let summary = Arc::new(summary);
        for observer in self.live_observers() {
            let summary = summary.clone();
            tokio::spawn(async move {
                observer.block_applied(&summary);
            });
        }
    }

    pub fn notify_state_changed(&self, undo: Overlay) {
        let undo = Arc::new(undo);
        for observer in self.live_observers() {
            let undo = undo.clone();
            tokio::spawn(async move {
                observer.state_changed(&undo);
            });
        }
    }

    fn live_observers(&self) -> Vec<Arc<dyn ChainObserver>> {
        let mut guard = self.observers.write().unwrap();
        guard.retain(|w| w.strong_count() > 0);
        guard.iter().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl ChainObserver for Counter {
        fn block_applied(&self, _summary: &BlockSummary) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn state_changed(&self, _undo: &Overlay) {
            self.0.fetch_add(100, Ordering::SeqCst);
        }
    }

    fn summary() -> BlockSummary {
        BlockSummary {
            block_id: [1u8; 32],
            record: dpchain_core::BlockRecord {
                header: dpchain_core::BlockHeader {
                    block_num: 1,
                    previous: [0u8; 32],
                    timestamp: 30,
                    signer: 0,
                    signature: vec![],
                    random_seed_hash: [0u8; 32],
                    previous_secret: [0u8; 32],
                    transactions_digest: [0u8; 32],
                },
                transaction_ids: vec![],
                size_bytes: 0,
                latency_secs: 0,
                total_fees: 0,
                processing_time_micros: 0,
            },
            market_transactions: vec![],
        }
    }

    #[tokio::test]
    async fn registered_observer_receives_notifications() {
        let bus = ObserverBus::new();
        let concrete = Arc::new(Counter(AtomicUsize::new(0)));
        let handle = concrete.clone();
        let trait_obj: Arc<dyn ChainObserver> = concrete;
        bus.register(&trait_obj);

        bus.notify_block_applied(summary());
        bus.notify_state_changed(Overlay::default());
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(handle.0.load(Ordering::SeqCst), 101);
    }

    #[tokio::test]
    async fn dropped_observer_is_pruned() {
        let bus = ObserverBus::new();
        {
            let counter: Arc<dyn ChainObserver> = Arc::new(Counter(AtomicUsize::new(0)));
            bus.register(&counter);
        }
        assert_eq!(bus.live_observers().len(), 0);
    }
}
