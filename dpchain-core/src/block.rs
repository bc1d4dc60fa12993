use crate::ids::{AccountId, BlockId, Secret};
use crate::transaction::SignedTransaction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub block_num: u64,
    pub previous: BlockId,
    pub timestamp: u64,
    pub signer: AccountId,
    pub signature: Vec<u8>,
    /// The signer's new commitment, stored into their `DelegateInfo::next_secret_hash`
    /// on this block landing (§4.F step 4): next time this delegate produces,
    /// `ripemd160(that block's previous_secret) == random_seed_hash` must hold.
    pub random_seed_hash: [u8; 32],
    /// Pre-image of the signer's previously stored `next_secret_hash`
    /// (§4.F step 4); also folds into the random seed update (§4.F step 9).
    pub previous_secret: Secret,
    /// Commitment to the block's transaction list, checked against
    /// `Block::transactions_digest()` during header verification
    /// (`ChainError::InvalidBlockDigest`) so a header can't be paired with a
    /// transaction list it never signed for.
    pub transactions_digest: [u8; 32],
}

impl BlockHeader {
    pub fn id(&self) -> BlockId {
        let encoded = serde_json::to_vec(self).expect("header always serializes");
        blake3::hash(&encoded).into()
    }

    /// What `signature` actually signs: every field but the signature
    /// itself, since a signature can't cover its own bytes.
    pub fn signing_digest(&self) -> [u8; 32] {
        let mut unsigned = self.clone();
        unsigned.signature = Vec::new();
        let encoded = serde_json::to_vec(&unsigned).expect("header always serializes");
        blake3::hash(&encoded).into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<SignedTransaction>,
}

impl Block {
    pub fn transactions_digest(&self) -> [u8; 32] {
        let encoded = serde_json::to_vec(&self.transactions).expect("transactions always serialize");
        blake3::hash(&encoded).into()
    }

    pub fn verify_digest(&self) -> bool {
        self.header.transactions_digest == self.transactions_digest()
    }
}

/// The durable, audit-facing record of a committed block (§3 "Block
/// record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub header: BlockHeader,
    pub transaction_ids: Vec<crate::ids::TransactionId>,
    pub size_bytes: u64,
    pub latency_secs: i64,
    pub total_fees: u64,
    pub processing_time_micros: u64,
}

/// Per-block-id fork-tree metadata (§3 "Fork-tree node").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkNode {
    pub block_num: u64,
    pub previous_id: BlockId,
    pub next_ids: Vec<BlockId>,
    pub is_known: bool,
    pub is_linked: bool,
    pub is_valid: bool,
    pub is_included: bool,
    pub invalid_reason: Option<String>,
}

impl ForkNode {
    pub fn genesis() -> Self {
        ForkNode {
            block_num: 0,
            previous_id: crate::ids::ZERO_BLOCK_ID,
            next_ids: Vec::new(),
            is_known: true,
            is_linked: true,
            is_valid: true,
            is_included: true,
            invalid_reason: None,
        }
    }

    pub fn placeholder(block_num: u64, previous_id: BlockId) -> Self {
        ForkNode {
            block_num,
            previous_id,
            next_ids: Vec::new(),
            is_known: false,
            is_linked: previous_id == crate::ids::ZERO_BLOCK_ID,
            is_valid: true,
            is_included: false,
            invalid_reason: None,
        }
    }

    pub fn is_candidate_tip(&self, current_head_block_num: u64) -> bool {
        self.is_linked && self.is_valid && self.block_num > current_head_block_num
    }
}
