use crate::ids::{AccountId, Address, AssetId, SecretHash, TransactionId};
use crate::price::Price;
use serde::{Deserialize, Serialize};

/// One operation within a transaction, dispatched by tag in the evaluator
/// (§4.D "Per-operation semantics").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    Withdraw {
        owner: Address,
        asset_id: AssetId,
        amount: u64,
    },
    Deposit {
        owner: Address,
        asset_id: AssetId,
        amount: u64,
        slate_id: crate::ids::SlateId,
    },
    RegisterAccount {
        name: String,
        owner_key: Vec<u8>,
        is_delegate: bool,
        pay_rate_pct: u8,
    },
    UpdateAccount {
        account_id: AccountId,
        new_active_key: Option<Vec<u8>>,
        pay_rate_pct: Option<u8>,
    },
    CreateAsset {
        symbol: String,
        name: String,
        precision: u8,
        issuer: crate::asset::Issuer,
        maximum_share_supply: u64,
    },
    UpdateAsset {
        asset_id: AssetId,
        maximum_share_supply: Option<u64>,
    },
    IssueAsset {
        asset_id: AssetId,
        amount: u64,
        to: Address,
    },
    /// Positive `amount` creates/augments the order; negative (encoded via
    /// `cancel`) refunds the owner and removes it, per §4.D.
    Bid {
        owner: Address,
        price: Price,
        amount: i64,
    },
    Ask {
        owner: Address,
        price: Price,
        amount: i64,
    },
    Short {
        owner: Address,
        price_limit: Option<Price>,
        amount: i64,
        quote_asset_id: AssetId,
    },
    WithdrawPay {
        delegate_id: AccountId,
        amount: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub operations: Vec<Operation>,
    /// Transactions expire and become unreplayable after this timestamp.
    pub expiration: u64,
}

/// Ed25519 has no public-key recovery, unlike the secp256k1 signatures the
/// original chain used, so each signature carries the public key it was
/// produced with rather than relying on recovery against a known address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxSignature {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signatures: Vec<TxSignature>,
}

impl SignedTransaction {
    pub fn id(&self) -> TransactionId {
        let encoded = serde_json::to_vec(&self.transaction).expect("transaction always serializes");
        blake3::hash(&encoded).into()
    }

    /// Domain-separated signing digest: `blake3(chain_id || transaction)`.
    pub fn digest(&self, chain_id: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(chain_id);
        let encoded = serde_json::to_vec(&self.transaction).expect("transaction always serializes");
        hasher.update(&encoded);
        hasher.finalize().into()
    }
}

/// Result of evaluating one transaction against a pending state (§4.D
/// "Output").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub fees_collected: std::collections::BTreeMap<AssetId, u64>,
    pub required_signatures: Vec<Address>,
}

/// Where a transaction landed once a block committed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransactionLocation {
    pub block_num: u64,
    pub index: u32,
}

pub fn unused_secret_hash_marker() -> SecretHash {
    [0u8; 20]
}
