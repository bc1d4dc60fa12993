use crate::ids::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisBalance {
    pub owner: Address,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisDelegate {
    pub name: String,
    pub owner_public_key: Vec<u8>,
    pub pay_rate_pct: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAsset {
    pub symbol: String,
    pub name: String,
    pub precision: u8,
    pub maximum_share_supply: u64,
}

/// The document described in §6 "Genesis format". Its canonical
/// serialization is hashed to produce the chain id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genesis {
    pub timestamp: u64,
    pub base_symbol: String,
    pub base_name: String,
    pub base_precision: u8,
    pub initial_balances: Vec<GenesisBalance>,
    pub delegates: Vec<GenesisDelegate>,
    #[serde(default)]
    pub market_issued_assets: Vec<GenesisAsset>,
}

impl Genesis {
    /// The chain id is the hash of the canonical serialization of this
    /// document (§6).
    pub fn chain_id(&self) -> [u8; 32] {
        let canonical = serde_json::to_vec(self).expect("genesis always serializes");
        blake3::hash(&canonical).into()
    }
}
