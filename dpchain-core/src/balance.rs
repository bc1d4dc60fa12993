use crate::ids::{Address, AssetId, BalanceId, SlateId};
use serde::{Deserialize, Serialize};

/// The condition under which a balance can be withdrawn. Only single-owner
/// withdraw is modeled (multi-sig / timelocked conditions are out of scope).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawCondition {
    pub owner: Address,
    pub asset_id: AssetId,
}

impl WithdrawCondition {
    /// Content address: the balance id a deposit/withdraw operation refers
    /// to is the hash of its withdraw condition, never an incrementing id.
    pub fn id(&self) -> BalanceId {
        let encoded = serde_json::to_vec(self).expect("withdraw condition always serializes");
        blake3::hash(&encoded).into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub condition: WithdrawCondition,
    pub amount: u64,
    pub slate_id: SlateId,
    pub created_at: u64,
    pub last_update: u64,
}

impl Balance {
    pub fn id(&self) -> BalanceId {
        self.condition.id()
    }

    pub fn asset_id(&self) -> AssetId {
        self.condition.asset_id
    }

    pub fn owner(&self) -> Address {
        self.condition.owner
    }
}

/// Unordered set of delegate ids a balance's holder endorses, identified by
/// the hash of the set (§3 "Delegate slate").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateSlate {
    pub delegates: std::collections::BTreeSet<crate::ids::AccountId>,
}

impl DelegateSlate {
    pub fn id(&self) -> SlateId {
        if self.delegates.is_empty() {
            return crate::ids::ZERO_SLATE_ID;
        }
        let encoded = serde_json::to_vec(&self.delegates).expect("slate always serializes");
        let digest = blake3::hash(&encoded);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_bytes()[..20]);
        out
    }
}
