use rbtp_primitives::{TxHash, U256};

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Why a transaction was refused admission.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The exact transaction is already in the pool.
    #[error("already known: {0}")]
    AlreadyKnown(TxHash),
    /// The signature does not recover to a sender.
    #[error("invalid sender")]
    InvalidSender,
    /// Replay protected for a different chain.
    #[error("transaction signed for chain {got}, pool expects {expected}")]
    ChainIdMismatch {
        /// Chain id in the signature.
        got: u64,
        /// The pool's chain id.
        expected: u64,
    },
    /// The gas price falls below the pool's floor.
    #[error("transaction underpriced")]
    Underpriced,
    /// A same-nonce replacement did not outbid the incumbent enough.
    #[error("replacement transaction underpriced")]
    ReplacementUnderpriced,
    /// The nonce is already used on chain.
    #[error("nonce too low: account {account_nonce}, tx {tx_nonce}")]
    NonceTooLow {
        /// The on-chain account nonce.
        account_nonce: u64,
        /// The transaction nonce.
        tx_nonce: u64,
    },
    /// The sender cannot cover the maximum cost.
    #[error("insufficient funds: balance {balance}, cost {cost}")]
    InsufficientFunds {
        /// The sender balance.
        balance: U256,
        /// The required cost.
        cost: U256,
    },
    /// The gas limit does not cover the intrinsic gas.
    #[error("intrinsic gas too low")]
    IntrinsicGasTooLow,
    /// The gas limit exceeds the current block gas limit.
    #[error("exceeds block gas limit")]
    GasLimitExceeded,
    /// The call data is beyond the accepted size.
    #[error("oversized data")]
    OversizedData,
    /// The pool is full and the transaction did not outbid anything.
    #[error("txpool is full")]
    PoolOverflow,
}
