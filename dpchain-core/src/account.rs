use crate::ids::{AccountId, SecretHash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveKey {
    pub public_key: Vec<u8>,
    pub valid_from: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateInfo {
    pub pay_rate_pct: u8,
    pub pay_balance: u64,
    pub votes_for: u64,
    pub blocks_produced: u64,
    pub blocks_missed: u64,
    pub last_block_num_produced: u64,
    pub next_secret_hash: SecretHash,
}

impl DelegateInfo {
    pub fn invariant_ok(&self) -> bool {
        self.pay_rate_pct <= 100
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub owner_key: Vec<u8>,
    /// Ordered by `valid_from`, oldest first.
    pub active_keys: Vec<ActiveKey>,
    pub delegate_info: Option<DelegateInfo>,
}

impl Account {
    pub fn is_delegate(&self) -> bool {
        self.delegate_info.is_some()
    }

    pub fn current_active_key(&self, as_of: u64) -> Option<&[u8]> {
        self.active_keys
            .iter()
            .rev()
            .find(|k| k.valid_from <= as_of)
            .map(|k| k.public_key.as_slice())
            .or(Some(self.owner_key.as_slice()))
    }
}
