use rbtp_primitives::{Address, Receipt, SealedBlock, TxHash, U256};
use rbtp_trie::{StateDb, StateError};
use std::fmt::Debug;

/// The outcome of executing a block's transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockExecutionOutput {
    /// One receipt per transaction, in order.
    pub receipts: Vec<Receipt>,
    /// Total gas consumed by the block.
    pub gas_used: u64,
}

/// Executes block bodies against a state.
///
/// The virtual machine proper sits behind this seam: an implementation is
/// handed the previous state and must apply every transaction, charge gas
/// and produce receipts. Consensus-level reward application and root
/// comparison stay with the caller.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait BlockExecutor: Debug + Send + Sync {
    /// Executes `block` on top of `state`.
    ///
    /// `senders` carries the recovered signer of each transaction, index
    /// aligned with the block body.
    fn execute(
        &self,
        block: &SealedBlock,
        senders: &[Address],
        state: &mut StateDb,
    ) -> Result<BlockExecutionOutput, ExecutorError>;
}

/// Transaction-level consensus violations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum InvalidTransactionError {
    /// The signature does not recover to an address.
    #[error("invalid signature")]
    InvalidSignature,
    /// The transaction is replay protected for a different chain.
    #[error("wrong chain id {got}")]
    WrongChainId {
        /// The chain id in the signature.
        got: u64,
    },
    /// The nonce is lower than the account's.
    #[error("nonce too low: account {account_nonce}, tx {tx_nonce}")]
    NonceTooLow {
        /// The account nonce.
        account_nonce: u64,
        /// The transaction nonce.
        tx_nonce: u64,
    },
    /// The nonce is higher than the next expected nonce.
    #[error("nonce too high: expected {expected}, tx {tx_nonce}")]
    NonceTooHigh {
        /// The next expected nonce.
        expected: u64,
        /// The transaction nonce.
        tx_nonce: u64,
    },
    /// The sender cannot cover `gas_price · gas_limit + value`.
    #[error("insufficient funds: balance {balance}, cost {cost}")]
    InsufficientFunds {
        /// The sender balance.
        balance: U256,
        /// The required cost.
        cost: U256,
    },
    /// The declared gas limit does not cover the intrinsic gas.
    #[error("intrinsic gas too low: limit {gas_limit}, intrinsic {intrinsic}")]
    IntrinsicGasTooLow {
        /// The transaction gas limit.
        gas_limit: u64,
        /// The computed intrinsic gas.
        intrinsic: u64,
    },
    /// The transaction does not fit into the block's remaining gas.
    #[error("transaction {hash} exceeds block gas limit")]
    ExceedsBlockGasLimit {
        /// The offending transaction.
        hash: TxHash,
    },
}

/// Errors produced while executing a block.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// A transaction violated consensus rules.
    #[error("transaction {index}: {error}")]
    Transaction {
        /// Index of the offending transaction in the block.
        index: usize,
        /// The violation.
        error: InvalidTransactionError,
    },
    /// The sender list does not match the block body.
    #[error("sender count {senders} does not match transaction count {transactions}")]
    SenderMismatch {
        /// Provided senders.
        senders: usize,
        /// Transactions in the block.
        transactions: usize,
    },
    /// State access failed.
    #[error(transparent)]
    State(#[from] StateError),
}
