//! Primitive data model shared across the chain core (§3 of the
//! specification): asset, account, balance, order, price, transaction and
//! block types, plus the error taxonomy (§7) every other crate returns.

pub mod account;
pub mod asset;
pub mod balance;
pub mod block;
pub mod error;
pub mod genesis;
pub mod ids;
pub mod market;
pub mod order;
pub mod price;
pub mod transaction;

pub use account::{Account, ActiveKey, DelegateInfo};
pub use asset::{Asset, Issuer};
pub use balance::{Balance, DelegateSlate, WithdrawCondition};
pub use block::{Block, BlockHeader, BlockRecord, ForkNode};
pub use error::{ChainError, ChainResult};
pub use genesis::{Genesis, GenesisAsset, GenesisBalance, GenesisDelegate};
pub use ids::*;
pub use market::{MarketStatus, MarketTransaction, PriceFeed};
pub use order::{CoverPosition, Order, OrderKey, OrderType};
pub use price::Price;
pub use transaction::{
    unused_secret_hash_marker, EvaluationRecord, Operation, SignedTransaction, Transaction,
    TransactionLocation, TxSignature,
};
