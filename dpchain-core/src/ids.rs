//! Identifier and primitive byte-array types shared across the workspace.

use serde::{Deserialize, Serialize};

pub type AssetId = u32;
pub type AccountId = u32;

/// Asset id 0 is the protocol's base asset; it always exists and is never
/// market-issued.
pub const BASE_ASSET_ID: AssetId = 0;

/// Derived from a public key by `ripemd160(blake3(pubkey))` in
/// `dpchain-crypto`; kept opaque here.
pub type Address = [u8; 20];

/// A balance is content-addressed by the hash of its withdraw condition.
pub type BalanceId = [u8; 32];

/// Hash of the unordered set of delegate ids a balance endorses.
pub type SlateId = [u8; 20];

pub type BlockId = [u8; 32];
pub type TransactionId = [u8; 32];

/// ripemd160 digest of a revealed secret, used for delegate secret-chain
/// commitments (§4.F step 4).
pub type SecretHash = [u8; 20];
pub type Secret = [u8; 32];

pub const ZERO_ADDRESS: Address = [0u8; 20];
pub const ZERO_BLOCK_ID: BlockId = [0u8; 32];
pub const ZERO_SLATE_ID: SlateId = [0u8; 20];

/// Renders an address the way a wallet-facing tool would, for logging and
/// diagnostics only — never used for equality or storage keys.
pub fn address_to_string(addr: &Address) -> String {
    bs58::encode(addr).into_string()
}
