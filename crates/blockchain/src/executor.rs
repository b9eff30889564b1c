//! The default block executor: nonce, balance and gas discipline plus plain
//! value transfers.
//!
//! Contract execution proper arrives through the [`BlockExecutor`] seam; this
//! implementation covers the control-plane semantics (intrinsic gas, upfront
//! gas purchase and refund, fee crediting, receipt assembly) that the chain
//! manager validates roots against.

use alloy_rlp::Encodable;
use rbtp_chainspec::{ChainSpec, Hardfork};
use rbtp_interfaces::executor::{
    BlockExecutionOutput, BlockExecutor, ExecutorError, InvalidTransactionError,
};
use rbtp_primitives::{keccak256, Address, Receipt, SealedBlock, TransactionKind, TxOutcome, U256};
use rbtp_trie::StateDb;
use std::sync::Arc;

/// Executes value transfers and account bookkeeping for each transaction.
#[derive(Debug, Clone)]
pub struct TransferExecutor {
    spec: Arc<ChainSpec>,
}

impl TransferExecutor {
    /// Creates the executor for the given chain spec.
    pub fn new(spec: Arc<ChainSpec>) -> Self {
        Self { spec }
    }
}

impl BlockExecutor for TransferExecutor {
    fn execute(
        &self,
        block: &SealedBlock,
        senders: &[Address],
        state: &mut StateDb,
    ) -> Result<BlockExecutionOutput, ExecutorError> {
        if senders.len() != block.body.len() {
            return Err(ExecutorError::SenderMismatch {
                senders: senders.len(),
                transactions: block.body.len(),
            })
        }

        let number = block.number;
        let byzantium = self.spec.fork_active(Hardfork::Byzantium, number);
        let prune_empty = self.spec.fork_active(Hardfork::SpuriousDragon, number);

        let mut receipts = Vec::with_capacity(block.body.len());
        let mut cumulative_gas_used = 0u64;

        for (index, (tx, sender)) in block.body.iter().zip(senders).enumerate() {
            let fail = |error| ExecutorError::Transaction { index, error };

            if let Some(chain_id) = tx.chain_id {
                if chain_id != self.spec.chain_id {
                    return Err(fail(InvalidTransactionError::WrongChainId { got: chain_id }))
                }
            }

            let account_nonce = state.nonce(*sender)?;
            if tx.nonce < account_nonce {
                return Err(fail(InvalidTransactionError::NonceTooLow {
                    account_nonce,
                    tx_nonce: tx.nonce,
                }))
            }
            if tx.nonce > account_nonce {
                return Err(fail(InvalidTransactionError::NonceTooHigh {
                    expected: account_nonce,
                    tx_nonce: tx.nonce,
                }))
            }

            let intrinsic = tx.intrinsic_gas();
            if tx.gas_limit < intrinsic {
                return Err(fail(InvalidTransactionError::IntrinsicGasTooLow {
                    gas_limit: tx.gas_limit,
                    intrinsic,
                }))
            }

            // a transaction overrunning the block gas pool rejects the block
            if cumulative_gas_used + tx.gas_limit > block.gas_limit {
                return Err(fail(InvalidTransactionError::ExceedsBlockGasLimit {
                    hash: tx.hash(),
                }))
            }

            let balance = state.balance(*sender)?;
            let cost = tx.cost();
            if balance < cost {
                return Err(fail(InvalidTransactionError::InsufficientFunds { balance, cost }))
            }

            // buy the full gas allowance upfront, refund the unused part
            // after execution
            let gas_price = U256::from(tx.gas_price);
            state.sub_balance(*sender, cost)?;
            state.set_nonce(*sender, tx.nonce + 1)?;

            match tx.to {
                TransactionKind::Call(to) => {
                    state.add_balance(to, tx.value)?;
                }
                TransactionKind::Create => {
                    let created = contract_address(*sender, tx.nonce);
                    state.create_account(created)?;
                    state.add_balance(created, tx.value)?;
                    state.set_code(created, tx.input.clone())?;
                }
            }

            let gas_used = intrinsic;
            let refund = U256::from(tx.gas_limit - gas_used) * gas_price;
            state.add_balance(*sender, refund)?;
            state.add_balance(block.beneficiary, U256::from(gas_used) * gas_price)?;

            cumulative_gas_used += gas_used;
            let outcome = if byzantium {
                TxOutcome::Success
            } else {
                // pre-byzantium receipts commit to the intermediate root
                TxOutcome::PostState(state.commit(prune_empty)?)
            };
            receipts.push(Receipt { outcome, cumulative_gas_used, logs: Vec::new() });
        }

        Ok(BlockExecutionOutput { receipts, gas_used: cumulative_gas_used })
    }
}

/// The address a contract created by `sender` at `nonce` deploys to:
/// `keccak(rlp([sender, nonce]))[12..]`.
pub fn contract_address(sender: Address, nonce: u64) -> Address {
    #[derive(alloy_rlp::RlpEncodable)]
    struct CreateInput {
        sender: Address,
        nonce: u64,
    }
    let mut out = Vec::new();
    CreateInput { sender, nonce }.encode(&mut out);
    Address::from_slice(&keccak256(&out)[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbtp_chainspec::DEV;
    use rbtp_primitives::{
        hex, sign_message, Bytes, Header, Transaction, TransactionSigned, B256, EMPTY_ROOT_HASH,
    };
    use rbtp_trie::MemoryTrieDb;

    const SECRET: B256 = B256::repeat_byte(0x42);

    fn signed(tx: Transaction) -> (TransactionSigned, Address) {
        let signature = sign_message(SECRET, tx.signature_hash()).unwrap();
        let signed = TransactionSigned::from_transaction_and_signature(tx, signature);
        let sender = signed.recover_signer().unwrap();
        (signed, sender)
    }

    fn block_with(txs: Vec<TransactionSigned>) -> SealedBlock {
        SealedBlock {
            header: Header { number: 1, gas_limit: 8_000_000, ..Default::default() }.seal_slow(),
            body: txs,
            ommers: vec![],
        }
    }

    fn funded_state(sender: Address, wei: u64) -> StateDb {
        let mut state = StateDb::at(EMPTY_ROOT_HASH, Arc::new(MemoryTrieDb::new()));
        state.add_balance(sender, U256::from(wei)).unwrap();
        state
    }

    #[test]
    fn transfer_moves_value_and_charges_gas() {
        let executor = TransferExecutor::new(Arc::clone(&*DEV));
        let to = Address::repeat_byte(0x77);
        let (tx, sender) = signed(Transaction {
            chain_id: Some(DEV.chain_id),
            gas_price: 2,
            gas_limit: 30_000,
            to: TransactionKind::Call(to),
            value: U256::from(1_000),
            ..Default::default()
        });
        let block = block_with(vec![tx]);
        let mut state = funded_state(sender, 1_000_000);

        let output = executor.execute(&block, &[sender], &mut state).unwrap();
        assert_eq!(output.gas_used, 21_000);
        assert_eq!(output.receipts.len(), 1);
        assert_eq!(output.receipts[0].outcome, TxOutcome::Success);

        assert_eq!(state.balance(to).unwrap(), U256::from(1_000));
        assert_eq!(state.nonce(sender).unwrap(), 1);
        // sender paid value plus 21000 gas at price 2
        assert_eq!(state.balance(sender).unwrap(), U256::from(1_000_000 - 1_000 - 42_000));
        // fees went to the (zero) beneficiary
        assert_eq!(state.balance(Address::ZERO).unwrap(), U256::from(42_000));
    }

    #[test]
    fn create_deploys_code_at_derived_address() {
        let executor = TransferExecutor::new(Arc::clone(&*DEV));
        let code = Bytes::from_static(&hex!("6060604052"));
        let (tx, sender) = signed(Transaction {
            chain_id: Some(DEV.chain_id),
            gas_price: 1,
            gas_limit: 100_000,
            to: TransactionKind::Create,
            input: code.clone(),
            ..Default::default()
        });
        let block = block_with(vec![tx]);
        let mut state = funded_state(sender, 10_000_000);

        executor.execute(&block, &[sender], &mut state).unwrap();
        let created = contract_address(sender, 0);
        assert_eq!(state.code(created).unwrap(), Some(code));
    }

    #[test]
    fn nonce_gaps_reject_the_block() {
        let executor = TransferExecutor::new(Arc::clone(&*DEV));
        let (tx, sender) = signed(Transaction {
            chain_id: Some(DEV.chain_id),
            nonce: 3,
            gas_price: 1,
            gas_limit: 21_000,
            to: TransactionKind::Call(Address::ZERO),
            ..Default::default()
        });
        let block = block_with(vec![tx]);
        let mut state = funded_state(sender, 1_000_000);

        assert!(matches!(
            executor.execute(&block, &[sender], &mut state),
            Err(ExecutorError::Transaction {
                index: 0,
                error: InvalidTransactionError::NonceTooHigh { expected: 0, tx_nonce: 3 }
            })
        ));
    }

    #[test]
    fn block_gas_pool_is_enforced() {
        let executor = TransferExecutor::new(Arc::clone(&*DEV));
        let mut txs = Vec::new();
        let mut sender = Address::ZERO;
        for nonce in 0..2 {
            let (tx, s) = signed(Transaction {
                chain_id: Some(DEV.chain_id),
                nonce,
                gas_price: 1,
                gas_limit: 30_000,
                to: TransactionKind::Call(Address::repeat_byte(9)),
                ..Default::default()
            });
            txs.push(tx);
            sender = s;
        }
        let mut block = block_with(txs);
        // only one 30k allowance fits
        let mut header = block.header.unseal();
        header.gas_limit = 40_000;
        block.header = header.seal_slow();

        let mut state = funded_state(sender, 10_000_000);
        assert!(matches!(
            executor.execute(&block, &[sender, sender], &mut state),
            Err(ExecutorError::Transaction {
                index: 1,
                error: InvalidTransactionError::ExceedsBlockGasLimit { .. }
            })
        ));
    }

    #[test]
    fn underfunded_sender_rejects() {
        let executor = TransferExecutor::new(Arc::clone(&*DEV));
        let (tx, sender) = signed(Transaction {
            chain_id: Some(DEV.chain_id),
            gas_price: 1,
            gas_limit: 21_000,
            to: TransactionKind::Call(Address::ZERO),
            value: U256::from(1),
            ..Default::default()
        });
        let block = block_with(vec![tx]);
        let mut state = funded_state(sender, 21_000);
        assert!(matches!(
            executor.execute(&block, &[sender], &mut state),
            Err(ExecutorError::Transaction {
                index: 0,
                error: InvalidTransactionError::InsufficientFunds { .. }
            })
        ));
    }

    #[test]
    fn wrong_chain_id_rejects() {
        let executor = TransferExecutor::new(Arc::clone(&*DEV));
        let (tx, sender) = signed(Transaction {
            chain_id: Some(DEV.chain_id + 1),
            gas_price: 1,
            gas_limit: 21_000,
            to: TransactionKind::Call(Address::ZERO),
            ..Default::default()
        });
        let block = block_with(vec![tx]);
        let mut state = funded_state(sender, 1_000_000);
        assert!(matches!(
            executor.execute(&block, &[sender], &mut state),
            Err(ExecutorError::Transaction {
                index: 0,
                error: InvalidTransactionError::WrongChainId { .. }
            })
        ));
    }
}
