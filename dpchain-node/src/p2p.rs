//! §6 "P2P boundary (consumed, not defined here)". §1 puts the actual
//! gossip/peer-discovery/inventory protocol out of scope, so this module
//! holds only the trait shapes a gossip crate would be written against —
//! mirroring the teacher's own `NetworkService` trait in
//! `dxid-network/src/lib.rs` (a plain `async_trait` interface, separate
//! from whatever concrete swarm implements it), minus the libp2p swarm
//! itself.

use async_trait::async_trait;
use dpchain_core::{Block, BlockId, ChainResult};

/// What `Node::handle_block` hands back to the gossip layer: whether the
/// delivered block ended up included in the committed chain, and whether
/// accepting it triggered a fork switch (§4.G "Heaviest-fork rule").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkData {
    pub block_id: BlockId,
    pub is_included: bool,
    pub switched: bool,
}

/// §6 "callbacks the gossip layer invokes on the core": `handle_block`,
/// `get_item_ids`, `get_item`, `has_item`. `Node` implements this directly
/// (see `dpchain-node::Node::handle_block` etc.) rather than through a
/// separate adapter, since none of these calls suspend (§5 "Suspension
/// points" — a block push is non-suspendable end to end).
pub trait P2pInbound: Send + Sync {
    fn handle_block(&self, block: Block) -> ChainResult<ForkData>;
    fn get_item_ids(&self, after: BlockId, limit: usize) -> (Vec<BlockId>, u64);
    fn get_item(&self, id: BlockId) -> Option<Vec<u8>>;
    fn has_item(&self, id: BlockId) -> bool;
}

/// §6 "observer notifications outward": `sync_status(type, remaining)` and
/// `connection_count_changed(n)`. These run the other direction from
/// [`P2pInbound`] — the core calls *out* to whatever gossip implementation
/// is listening — so, like the teacher's `NetworkService::broadcast_*`,
/// they're modeled as async: a real implementation may need to suspend to
/// push the notification onto the swarm.
#[async_trait]
pub trait P2pOutbound: Send + Sync {
    async fn sync_status(&self, sync_type: SyncType, remaining: u64);
    async fn connection_count_changed(&self, count: usize);
}

/// The kind of sync activity a `sync_status` notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    Blockchain,
    Mempool,
}
