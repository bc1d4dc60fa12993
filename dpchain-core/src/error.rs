use thiserror::Error;

/// The error taxonomy of §7, shared by the evaluator, market engine, block
/// processor, and fork tree so that callers can match on a single type
/// regardless of which component raised it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    // --- Validation: reject the offending block/transaction ---
    #[error("invalid address")]
    InvalidAddress,
    #[error("asset type mismatch")]
    AssetTypeMismatch,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("invalid block digest")]
    InvalidBlockDigest,
    #[error("invalid delegate signee")]
    InvalidDelegateSignee,
    #[error("block numbers not sequential")]
    BlockNumbersNotSequential,
    #[error("invalid previous block id")]
    InvalidPreviousBlockId,
    #[error("time in past")]
    TimeInPast,
    #[error("time in future")]
    TimeInFuture,
    #[error("block timestamp is not a multiple of the block interval")]
    InvalidBlockTime,
    #[error("failed checkpoint verification")]
    FailedCheckpointVerification,
    #[error("unsupported chain operation")]
    UnsupportedChainOperation,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("missing signature")]
    MissingSignature,
    #[error("duplicate transaction")]
    DuplicateTransaction,
    #[error("expired transaction")]
    ExpiredTransaction,
    #[error("insufficient fee: required {required}, got {got}")]
    InsufficientFee { required: u64, got: u64 },

    // --- Arithmetic: treated as validation errors ---
    #[error("addition overflow")]
    AdditionOverflow,
    #[error("subtraction overflow")]
    SubtractionOverflow,

    // --- Market-layer: skip the pair, block stays valid ---
    #[error("insufficient feeds")]
    InsufficientFeeds,
    #[error("insufficient depth")]
    InsufficientDepth,
    #[error("insufficient collateral")]
    InsufficientCollateral,
    #[error("invalid market")]
    InvalidMarket,

    // --- Storage: non-recoverable at the core level ---
    #[error("key not found")]
    KeyNotFound,
    #[error("new database version")]
    NewDatabaseVersion,
    #[error("wrong chain id")]
    WrongChainId,

    // --- Transient: reject but may be re-offered ---
    #[error("block older than undo history")]
    BlockOlderThanUndoHistory,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl ChainError {
    pub fn is_market_layer(&self) -> bool {
        matches!(
            self,
            ChainError::InsufficientFeeds
                | ChainError::InsufficientDepth
                | ChainError::InsufficientCollateral
                | ChainError::InvalidMarket
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::BlockOlderThanUndoHistory)
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
