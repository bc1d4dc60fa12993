//! The fork tree (§4.G): bookkeeping for every block the node has ever
//! heard of, linked or not, valid or not, so the block processor can
//! decide whether an incoming block extends the current head or starts a
//! heavier side chain worth switching to.
//!
//! Grounded on `original_source/libraries/blockchain/chain_database.cpp`'s
//! `store_and_index`/`recursive_mark_as_linked`/`mark_invalid`/
//! `recursive_mark_as_invalid`/`get_fork_history`. The C++ `_fork_db` is a
//! raw LevelDB table of `block_fork_data`; here it's just more rows behind
//! `ChainStore::{get,store}_fork_node`, so `ForkTree` holds no state of its
//! own beyond the store reference.

use dpchain_core::{BlockHeader, BlockId, ChainError, ChainResult, ForkNode, ZERO_BLOCK_ID};
use dpchain_state::ChainStore;

pub struct ForkTree<'s> {
    state: &'s mut dyn ChainStore,
}

impl<'s> ForkTree<'s> {
    pub fn new(state: &'s mut dyn ChainStore) -> Self {
        ForkTree { state }
    }

    /// Indexes a newly received block header into the tree. Returns the id
    /// and node of the highest-numbered block in whichever linked fork this
    /// insertion affects — itself, if this insertion didn't resolve a
    /// missing link (the common case of a fresh block extending a known
    /// chain), or the best descendant if it did.
    pub fn store_and_index(&mut self, block_id: BlockId, header: &BlockHeader) -> (BlockId, ForkNode) {
        let mut prev_node = self
            .state
            .get_fork_node(header.previous)
            .unwrap_or_else(|| ForkNode::placeholder(header.block_num.saturating_sub(1), ZERO_BLOCK_ID));
        if !prev_node.next_ids.contains(&block_id) {
            prev_node.next_ids.push(block_id);
        }
        self.state.store_fork_node(header.previous, Some(prev_node.clone()));

        let existing = self.state.get_fork_node(block_id);
        let mut current = existing.clone().unwrap_or_else(|| ForkNode {
            block_num: header.block_num,
            previous_id: header.previous,
            next_ids: Vec::new(),
            is_known: true,
            is_linked: prev_node.is_linked,
            is_valid: true,
            is_included: false,
            invalid_reason: None,
        });
        current.is_known = true;

        if let Some(prior) = existing {
            if !prior.is_linked && prev_node.is_linked {
                current.is_linked = true;
                self.state.store_fork_node(block_id, Some(current.clone()));
                return self.recursive_mark_linked(block_id, current);
            }
        }
        self.state.store_fork_node(block_id, Some(current.clone()));
        (block_id, current)
    }

    fn recursive_mark_linked(&mut self, id: BlockId, node: ForkNode) -> (BlockId, ForkNode) {
        let mut best = (id, node.clone());
        let mut frontier = node.next_ids;
        while !frontier.is_empty() {
            let mut next_frontier = Vec::new();
            for child_id in frontier {
                let mut child = match self.state.get_fork_node(child_id) {
                    Some(c) => c,
                    None => continue,
                };
                child.is_linked = true;
                next_frontier.extend(child.next_ids.iter().copied());
                self.state.store_fork_node(child_id, Some(child.clone()));
                if child.block_num > best.1.block_num {
                    best = (child_id, child);
                }
            }
            frontier = next_frontier;
        }
        best
    }

    /// Marks `block_id` invalid and propagates invalidity to every
    /// descendant already known in the tree — an invalid ancestor taints
    /// the whole subtree regardless of whether each descendant was
    /// individually checked.
    pub fn mark_invalid(&mut self, block_id: BlockId, reason: String) {
        let mut node = match self.state.get_fork_node(block_id) {
            Some(n) => n,
            None => return,
        };
        node.is_valid = false;
        node.invalid_reason = Some(reason.clone());
        let children = node.next_ids.clone();
        self.state.store_fork_node(block_id, Some(node));

        let mut frontier = children;
        while !frontier.is_empty() {
            let mut next_frontier = Vec::new();
            for id in frontier {
                if let Some(mut child) = self.state.get_fork_node(id) {
                    child.is_valid = false;
                    child.invalid_reason = Some(reason.clone());
                    next_frontier.extend(child.next_ids.iter().copied());
                    self.state.store_fork_node(id, Some(child));
                }
            }
            frontier = next_frontier;
        }
    }

    pub fn mark_included(&mut self, block_id: BlockId, included: bool) {
        if let Some(mut node) = self.state.get_fork_node(block_id) {
            node.is_included = included;
            if included {
                node.is_valid = true;
            }
            self.state.store_fork_node(block_id, Some(node));
        }
    }

    /// Walks previous-links from `id` back to the most recent included
    /// block, returning the path in descending order (`id` first, the
    /// already-included ancestor last). The block processor pops back to
    /// that ancestor, then replays the rest of the path forward.
    pub fn get_fork_history(&self, id: BlockId) -> ChainResult<Vec<BlockId>> {
        let mut history = vec![id];
        let mut current = self.state.get_fork_node(id).ok_or(ChainError::KeyNotFound)?;
        loop {
            history.push(current.previous_id);
            if current.previous_id == ZERO_BLOCK_ID {
                return Ok(history);
            }
            let prev = self
                .state
                .get_fork_node(current.previous_id)
                .ok_or(ChainError::KeyNotFound)?;
            if !prev.is_linked {
                return Err(ChainError::Internal(
                    "fork history hit an unlinked dead end".into(),
                ));
            }
            if prev.is_included {
                return Ok(history);
            }
            current = prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpchain_state::MemoryChainStore;

    fn header(block_num: u64, previous: BlockId, nonce: u8) -> BlockHeader {
        BlockHeader {
            block_num,
            previous,
            timestamp: block_num * 30,
            signer: 0,
            signature: vec![nonce],
            random_seed_hash: [nonce; 32],
            previous_secret: [nonce; 32],
            transactions_digest: [0u8; 32],
        }
    }

    #[test]
    fn fresh_chain_links_immediately() {
        let mut store = MemoryChainStore::new();
        store.store_fork_node(ZERO_BLOCK_ID, Some(ForkNode::genesis()));
        let mut tree = ForkTree::new(&mut store);

        let h1 = header(1, ZERO_BLOCK_ID, 1);
        let id1 = h1.id();
        let (best_id, best_node) = tree.store_and_index(id1, &h1);
        assert_eq!(best_id, id1);
        assert!(best_node.is_linked);
        assert!(best_node.is_candidate_tip(0));
    }

    #[test]
    fn out_of_order_block_resolves_link_on_parent_arrival() {
        let mut store = MemoryChainStore::new();
        store.store_fork_node(ZERO_BLOCK_ID, Some(ForkNode::genesis()));

        let h1 = header(1, ZERO_BLOCK_ID, 1);
        let id1 = h1.id();
        let h2 = header(2, id1, 2);
        let id2 = h2.id();

        // h2 arrives before h1: its fork node starts out unlinked.
        {
            let mut tree = ForkTree::new(&mut store);
            let (_, node2) = tree.store_and_index(id2, &h2);
            assert!(!node2.is_linked);
        }
        // h1 then arrives, resolving the missing link for h2.
        {
            let mut tree = ForkTree::new(&mut store);
            let (best_id, best_node) = tree.store_and_index(id1, &h1);
            assert_eq!(best_id, id2);
            assert!(best_node.is_linked);
        }
        assert!(store.get_fork_node(id2).unwrap().is_linked);
    }

    #[test]
    fn mark_invalid_propagates_to_descendants() {
        let mut store = MemoryChainStore::new();
        store.store_fork_node(ZERO_BLOCK_ID, Some(ForkNode::genesis()));
        let h1 = header(1, ZERO_BLOCK_ID, 1);
        let id1 = h1.id();
        let h2 = header(2, id1, 2);
        let id2 = h2.id();
        {
            let mut tree = ForkTree::new(&mut store);
            tree.store_and_index(id1, &h1);
            tree.store_and_index(id2, &h2);
        }
        let mut tree = ForkTree::new(&mut store);
        tree.mark_invalid(id1, "double spend".to_string());
        assert!(!store.get_fork_node(id1).unwrap().is_valid);
        assert!(!store.get_fork_node(id2).unwrap().is_valid);
    }

    #[test]
    fn fork_history_stops_at_included_ancestor() {
        let mut store = MemoryChainStore::new();
        let mut genesis = ForkNode::genesis();
        genesis.is_included = true;
        store.store_fork_node(ZERO_BLOCK_ID, Some(genesis));
        let h1 = header(1, ZERO_BLOCK_ID, 1);
        let id1 = h1.id();
        let h2 = header(2, id1, 2);
        let id2 = h2.id();
        {
            let mut tree = ForkTree::new(&mut store);
            tree.store_and_index(id1, &h1);
            tree.store_and_index(id2, &h2);
            tree.mark_included(id1, true);
        }
        let tree = ForkTree::new(&mut store);
        let history = tree.get_fork_history(id2).unwrap();
        assert_eq!(history, vec![id2, id1]);
    }
}
