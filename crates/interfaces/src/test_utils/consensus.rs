use crate::consensus::{Consensus, ConsensusError};
use rbtp_primitives::{Header, SealedBlock, SealedHeader, U256};
use rbtp_trie::StateDb;
use std::sync::atomic::{AtomicBool, Ordering};

/// A [`Consensus`] that accepts everything unless told to fail.
#[derive(Debug, Default)]
pub struct TestConsensus {
    /// Whether header/block validation should fail.
    fail_validation: AtomicBool,
    /// Whether seal verification should fail.
    fail_seal: AtomicBool,
}

impl TestConsensus {
    /// Makes all validation calls fail.
    pub fn set_fail_validation(&self, fail: bool) {
        self.fail_validation.store(fail, Ordering::SeqCst);
    }

    /// Makes seal verification fail.
    pub fn set_fail_seal(&self, fail: bool) {
        self.fail_seal.store(fail, Ordering::SeqCst);
    }

    fn validation_result(&self) -> Result<(), ConsensusError> {
        if self.fail_validation.load(Ordering::SeqCst) {
            Err(ConsensusError::InvalidSeal)
        } else {
            Ok(())
        }
    }
}

impl Consensus for TestConsensus {
    fn validate_header(&self, _header: &SealedHeader) -> Result<(), ConsensusError> {
        self.validation_result()
    }

    fn validate_header_against_parent(
        &self,
        _header: &SealedHeader,
        _parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        self.validation_result()
    }

    fn validate_seal(&self, _header: &SealedHeader) -> Result<(), ConsensusError> {
        if self.fail_seal.load(Ordering::SeqCst) {
            Err(ConsensusError::InvalidSeal)
        } else {
            Ok(())
        }
    }

    fn validate_block(&self, _block: &SealedBlock) -> Result<(), ConsensusError> {
        self.validation_result()
    }

    fn calc_difficulty(&self, parent: &SealedHeader, _timestamp: u64) -> U256 {
        parent.difficulty
    }

    fn finalize(
        &self,
        _header: &Header,
        _ommers: &[Header],
        _state: &mut StateDb,
    ) -> Result<(), ConsensusError> {
        Ok(())
    }
}
