use crate::{Bloom, Log, B256};
use alloy_rlp::{length_of_length, Decodable, Encodable};

/// The per-transaction execution summary.
///
/// Before the Byzantium fork a receipt committed to the intermediate state
/// root; afterwards it carries a boolean status instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Post-state root or execution status, depending on the active fork.
    pub outcome: TxOutcome,
    /// Gas used by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Computes the bloom filter over this receipt's logs. Slow; prefer
    /// [`ReceiptWithBloom`] when the bloom is needed more than once.
    pub fn bloom_slow(&self) -> Bloom {
        logs_bloom(self.logs.iter())
    }

    /// Pairs the receipt with its computed bloom.
    pub fn with_bloom(self) -> ReceiptWithBloom {
        let bloom = self.bloom_slow();
        ReceiptWithBloom { receipt: self, bloom }
    }

    /// Whether execution succeeded. Pre-Byzantium receipts report success
    /// unconditionally since the outcome is a state commitment.
    pub fn success(&self) -> bool {
        !matches!(self.outcome, TxOutcome::Failed)
    }
}

/// The first field of a receipt: a state commitment before Byzantium, a
/// status flag afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Intermediate state root after the transaction (pre-Byzantium).
    PostState(B256),
    /// Execution succeeded.
    Success,
    /// Execution reverted or ran out of gas.
    Failed,
}

impl Encodable for TxOutcome {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self {
            Self::PostState(root) => root.encode(out),
            Self::Success => 1u64.encode(out),
            Self::Failed => 0u64.encode(out),
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::PostState(root) => root.length(),
            Self::Success | Self::Failed => 1,
        }
    }
}

impl Decodable for TxOutcome {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let first = buf.first().copied().ok_or(alloy_rlp::Error::InputTooShort)?;
        if first == 0x80 + 32 {
            return Ok(Self::PostState(B256::decode(buf)?))
        }
        match u64::decode(buf)? {
            0 => Ok(Self::Failed),
            1 => Ok(Self::Success),
            _ => Err(alloy_rlp::Error::Custom("invalid receipt status")),
        }
    }
}

/// A receipt carrying its memoized log bloom, as hashed into the receipts
/// root and exchanged on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptWithBloom {
    /// The wrapped receipt.
    pub receipt: Receipt,
    /// The bloom filter over the receipt's logs.
    pub bloom: Bloom,
}

impl ReceiptWithBloom {
    fn payload_length(&self) -> usize {
        self.receipt.outcome.length() +
            self.receipt.cumulative_gas_used.length() +
            self.bloom.length() +
            list_length(&self.receipt.logs)
    }
}

fn list_length<T: Encodable>(items: &[T]) -> usize {
    let payload: usize = items.iter().map(Encodable::length).sum();
    payload + length_of_length(payload)
}

impl Encodable for ReceiptWithBloom {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.receipt.outcome.encode(out);
        self.receipt.cumulative_gas_used.encode(out);
        self.bloom.encode(out);
        alloy_rlp::encode_list(&self.receipt.logs, out);
    }

    fn length(&self) -> usize {
        let payload = self.payload_length();
        payload + length_of_length(payload)
    }
}

impl Decodable for ReceiptWithBloom {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let outcome = TxOutcome::decode(buf)?;
        let cumulative_gas_used = u64::decode(buf)?;
        let bloom = Bloom::decode(buf)?;
        let logs = Vec::<Log>::decode(buf)?;
        Ok(Self { receipt: Receipt { outcome, cumulative_gas_used, logs }, bloom })
    }
}

/// Computes the union bloom over an iterator of logs.
pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Bloom {
    let mut bloom = Bloom::ZERO;
    for log in logs {
        bloom.accrue_log(log);
    }
    bloom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, Bytes, LogData};

    fn sample_log() -> Log {
        Log {
            address: Address::repeat_byte(0x11),
            data: LogData::new_unchecked(
                vec![B256::repeat_byte(0x22)],
                Bytes::from_static(&[0xde, 0xad]),
            ),
        }
    }

    #[test]
    fn status_receipt_roundtrip() {
        let receipt = Receipt {
            outcome: TxOutcome::Success,
            cumulative_gas_used: 21_000,
            logs: vec![sample_log()],
        }
        .with_bloom();

        let mut encoded = Vec::new();
        receipt.encode(&mut encoded);
        assert_eq!(ReceiptWithBloom::decode(&mut encoded.as_slice()).unwrap(), receipt);
    }

    #[test]
    fn failed_receipt_roundtrip() {
        let receipt =
            Receipt { outcome: TxOutcome::Failed, cumulative_gas_used: 42_000, logs: vec![] }
                .with_bloom();
        let mut encoded = Vec::new();
        receipt.encode(&mut encoded);
        assert_eq!(ReceiptWithBloom::decode(&mut encoded.as_slice()).unwrap(), receipt);
        assert!(!receipt.receipt.success());
    }

    #[test]
    fn legacy_post_state_roundtrip() {
        let receipt = Receipt {
            outcome: TxOutcome::PostState(B256::repeat_byte(0x33)),
            cumulative_gas_used: 5,
            logs: vec![],
        }
        .with_bloom();
        let mut encoded = Vec::new();
        receipt.encode(&mut encoded);
        assert_eq!(ReceiptWithBloom::decode(&mut encoded.as_slice()).unwrap(), receipt);
    }

    #[test]
    fn bloom_covers_log_address_and_topics() {
        let log = sample_log();
        let bloom = logs_bloom(std::iter::once(&log));
        assert!(bloom.contains_input(crate::BloomInput::Raw(log.address.as_slice())));
        assert!(bloom.contains_input(crate::BloomInput::Raw(log.topics()[0].as_slice())));
    }
}
