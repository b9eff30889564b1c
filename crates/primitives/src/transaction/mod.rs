use crate::{
    constants::{TX_DATA_NON_ZERO_GAS, TX_DATA_ZERO_GAS, TX_GAS, TX_GAS_CONTRACT_CREATION},
    keccak256, Address, Bytes, ChainId, TxHash, B256, U256,
};
use alloy_rlp::{length_of_length, Decodable, Encodable, Error as RlpError};
use std::ops::Deref;

mod signature;
mod util;

pub use signature::Signature;

/// Signs `message` with `secret`, exposed for tests and the local sealer.
pub fn sign_message(secret: B256, message: B256) -> Result<Signature, secp256k1::Error> {
    util::secp256k1::sign_message(secret, message)
}

/// The unsigned body of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Transaction {
    /// EIP-155 chain id the signature commits to, if replay protected.
    pub chain_id: Option<ChainId>,
    /// Sender account nonce.
    pub nonce: u64,
    /// Price in wei the sender pays per unit of gas.
    pub gas_price: u128,
    /// Maximum gas the transaction may consume.
    pub gas_limit: u64,
    /// Call target, or contract creation if absent.
    pub to: TransactionKind,
    /// Value in wei transferred to the target.
    pub value: U256,
    /// Call data or creation code.
    pub input: Bytes,
}

impl Transaction {
    /// Whether this transaction creates a contract.
    pub const fn is_create(&self) -> bool {
        matches!(self.to, TransactionKind::Create)
    }

    /// The gas consumed before a single VM step runs: the base charge plus
    /// the per-byte cost of the input data.
    pub fn intrinsic_gas(&self) -> u64 {
        let base = if self.is_create() { TX_GAS_CONTRACT_CREATION } else { TX_GAS };
        let zero_bytes = self.input.iter().filter(|b| **b == 0).count() as u64;
        let non_zero_bytes = self.input.len() as u64 - zero_bytes;
        base + zero_bytes * TX_DATA_ZERO_GAS + non_zero_bytes * TX_DATA_NON_ZERO_GAS
    }

    /// Maximum wei the sender can be charged: `gas_price · gas_limit + value`.
    pub fn cost(&self) -> U256 {
        U256::from(self.gas_price) * U256::from(self.gas_limit) + self.value
    }

    /// The hash the sender signs over: the transaction fields, extended per
    /// EIP-155 with `(chain_id, 0, 0)` when replay protected.
    pub fn signature_hash(&self) -> B256 {
        let mut payload_length = self.fields_len();
        if let Some(id) = self.chain_id {
            payload_length += id.length() + 2;
        }

        let mut out = Vec::<u8>::new();
        alloy_rlp::Header { list: true, payload_length }.encode(&mut out);
        self.encode_fields(&mut out);
        if let Some(id) = self.chain_id {
            id.encode(&mut out);
            out.push(0x80);
            out.push(0x80);
        }
        keccak256(&out)
    }

    fn fields_len(&self) -> usize {
        self.nonce.length() +
            self.gas_price.length() +
            self.gas_limit.length() +
            self.to.length() +
            self.value.length() +
            self.input.length()
    }

    fn encode_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
    }
}

/// Whether a transaction calls an existing account or creates a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionKind {
    /// Contract creation; the target is derived from sender and nonce.
    #[default]
    Create,
    /// A call to the given address.
    Call(Address),
}

impl TransactionKind {
    /// The call target, if any.
    pub const fn to(&self) -> Option<&Address> {
        match self {
            Self::Create => None,
            Self::Call(to) => Some(to),
        }
    }
}

impl Encodable for TransactionKind {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self {
            Self::Call(to) => to.encode(out),
            Self::Create => out.put_u8(alloy_rlp::EMPTY_STRING_CODE),
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Call(to) => to.length(),
            Self::Create => 1,
        }
    }
}

impl Decodable for TransactionKind {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        if let Some(&first) = buf.first() {
            if first == alloy_rlp::EMPTY_STRING_CODE {
                *buf = &buf[1..];
                Ok(Self::Create)
            } else {
                Ok(Self::Call(Address::decode(buf)?))
            }
        } else {
            Err(RlpError::InputTooShort)
        }
    }
}

/// A signed transaction together with its memoized hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionSigned {
    /// The memoized keccak256 of the RLP encoded signed transaction.
    hash: TxHash,
    /// The transaction signature.
    pub signature: Signature,
    /// The unsigned body.
    pub transaction: Transaction,
}

impl TransactionSigned {
    /// Builds the signed wrapper and computes the hash.
    pub fn from_transaction_and_signature(transaction: Transaction, signature: Signature) -> Self {
        let mut signed = Self { hash: B256::ZERO, signature, transaction };
        let mut buf = Vec::new();
        signed.encode(&mut buf);
        signed.hash = keccak256(&buf);
        signed
    }

    /// The memoized transaction hash.
    pub const fn hash(&self) -> TxHash {
        self.hash
    }

    /// Recovers the sender address from the signature.
    ///
    /// Returns `None` for signatures that do not describe a curve point.
    pub fn recover_signer(&self) -> Option<Address> {
        self.signature.recover_signer(self.transaction.signature_hash())
    }

    /// Recovers the sender and pairs it with the transaction.
    pub fn into_ecrecovered(self) -> Option<TransactionSignedEcRecovered> {
        let signer = self.recover_signer()?;
        Some(TransactionSignedEcRecovered { signed_transaction: self, signer })
    }

    /// Approximate in-memory size, used for pool and buffer accounting.
    pub fn size_hint(&self) -> usize {
        std::mem::size_of::<Self>() + self.transaction.input.len()
    }

    fn payload_length(&self) -> usize {
        self.transaction.fields_len() + self.signature.rlp_len(self.transaction.chain_id)
    }
}

impl Deref for TransactionSigned {
    type Target = Transaction;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}

impl Encodable for TransactionSigned {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.transaction.encode_fields(out);
        self.signature.encode_fields(self.transaction.chain_id, out);
    }

    fn length(&self) -> usize {
        let payload = self.payload_length();
        payload + length_of_length(payload)
    }
}

impl Decodable for TransactionSigned {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let started = *buf;
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(RlpError::UnexpectedString)
        }
        let mut transaction = Transaction {
            chain_id: None,
            nonce: Decodable::decode(buf)?,
            gas_price: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            to: Decodable::decode(buf)?,
            value: Decodable::decode(buf)?,
            input: Decodable::decode(buf)?,
        };
        let (signature, chain_id) = Signature::decode_fields(buf)?;
        transaction.chain_id = chain_id;

        let consumed = started.len() - buf.len();
        let hash = keccak256(&started[..consumed]);
        Ok(Self { hash, signature, transaction })
    }
}

/// A signed transaction with its recovered sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSignedEcRecovered {
    signed_transaction: TransactionSigned,
    /// The recovered sender address.
    pub signer: Address,
}

impl TransactionSignedEcRecovered {
    /// The recovered sender.
    pub const fn signer(&self) -> Address {
        self.signer
    }

    /// Consumes the wrapper, returning the signed transaction.
    pub fn into_signed(self) -> TransactionSigned {
        self.signed_transaction
    }
}

impl Deref for TransactionSignedEcRecovered {
    type Target = TransactionSigned;

    fn deref(&self) -> &Self::Target {
        &self.signed_transaction
    }
}

/// Recovers the signers of a batch of transactions, in parallel for larger
/// batches.
///
/// Returns `None` if any signature fails to recover.
pub fn recover_signers(transactions: &[TransactionSigned]) -> Option<Vec<Address>> {
    // below this the rayon fork/join overhead outweighs the recovery cost
    const PARALLEL_THRESHOLD: usize = 16;

    if transactions.len() < PARALLEL_THRESHOLD {
        transactions.iter().map(|tx| tx.recover_signer()).collect()
    } else {
        use rayon::prelude::*;
        transactions.par_iter().map(|tx| tx.recover_signer()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex;

    fn signed_transfer(nonce: u64, chain_id: Option<ChainId>) -> TransactionSigned {
        let secret = B256::repeat_byte(0x42);
        let transaction = Transaction {
            chain_id,
            nonce,
            gas_price: 10,
            gas_limit: 21_000,
            to: TransactionKind::Call(Address::repeat_byte(0x77)),
            value: U256::from(1000),
            input: Bytes::new(),
        };
        let signature = sign_message(secret, transaction.signature_hash()).unwrap();
        TransactionSigned::from_transaction_and_signature(transaction, signature)
    }

    #[test]
    fn rlp_roundtrip_eip155() {
        let tx = signed_transfer(5, Some(1));
        let mut encoded = Vec::new();
        tx.encode(&mut encoded);
        let decoded = TransactionSigned::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.chain_id, Some(1));
        assert_eq!(decoded.hash(), tx.hash());
    }

    #[test]
    fn rlp_roundtrip_unprotected() {
        let tx = signed_transfer(0, None);
        let mut encoded = Vec::new();
        tx.encode(&mut encoded);
        let decoded = TransactionSigned::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.chain_id, None);
    }

    #[test]
    fn recovers_same_signer() {
        let a = signed_transfer(0, Some(7));
        let b = signed_transfer(1, Some(7));
        let signer_a = a.recover_signer().unwrap();
        let signer_b = b.recover_signer().unwrap();
        assert_eq!(signer_a, signer_b);
        assert_ne!(signer_a, Address::ZERO);
    }

    #[test]
    fn creation_kind_roundtrip() {
        let mut encoded = Vec::new();
        TransactionKind::Create.encode(&mut encoded);
        assert_eq!(encoded, hex!("80"));
        assert_eq!(
            TransactionKind::decode(&mut encoded.as_slice()).unwrap(),
            TransactionKind::Create
        );
    }

    #[test]
    fn intrinsic_gas_charges_data() {
        let mut tx = Transaction::default();
        assert_eq!(tx.intrinsic_gas(), TX_GAS_CONTRACT_CREATION);
        tx.to = TransactionKind::Call(Address::ZERO);
        tx.input = Bytes::from_static(&[0, 0, 1]);
        assert_eq!(tx.intrinsic_gas(), TX_GAS + 2 * TX_DATA_ZERO_GAS + TX_DATA_NON_ZERO_GAS);
    }

    #[test]
    fn batch_recovery_matches_single() {
        let txs: Vec<_> = (0..20).map(|n| signed_transfer(n, Some(1))).collect();
        let signers = recover_signers(&txs).unwrap();
        assert!(signers.iter().all(|s| *s == txs[0].recover_signer().unwrap()));
    }
}
