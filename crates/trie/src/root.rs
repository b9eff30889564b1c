//! One-shot root calculations over ordered lists and account sets.

use crate::{MemoryTrieDb, SecureTrie, Trie};
use alloy_rlp::Encodable;
use rbtp_primitives::{
    Address, Header, ReceiptWithBloom, TransactionSigned, TrieAccount, B256, StorageValue,
    EMPTY_OMMER_ROOT_HASH,
};
use std::sync::Arc;

/// Root of a trie keyed by the RLP of each item's index, with a custom value
/// encoder.
pub fn ordered_trie_root_with_encoder<T, F>(items: &[T], mut encode: F) -> B256
where
    F: FnMut(&T, &mut Vec<u8>),
{
    let mut trie = Trie::new(Arc::new(MemoryTrieDb::new()));
    for (index, item) in items.iter().enumerate() {
        let mut key = Vec::new();
        index.encode(&mut key);
        let mut value = Vec::new();
        encode(item, &mut value);
        trie.insert(&key, value).expect("in-memory trie cannot miss nodes");
    }
    trie.commit()
}

/// Root of a trie keyed by the RLP of each item's index.
pub fn ordered_trie_root<T: Encodable>(items: &[T]) -> B256 {
    ordered_trie_root_with_encoder(items, |item, buf| item.encode(buf))
}

/// Calculates the transaction root committed to by a header.
pub fn calculate_transaction_root(transactions: &[TransactionSigned]) -> B256 {
    ordered_trie_root(transactions)
}

/// Calculates the receipt root committed to by a header.
pub fn calculate_receipt_root(receipts: &[ReceiptWithBloom]) -> B256 {
    ordered_trie_root(receipts)
}

/// Calculates the ommers hash committed to by a header.
pub fn calculate_ommers_hash(ommers: &[Header]) -> B256 {
    if ommers.is_empty() {
        return EMPTY_OMMER_ROOT_HASH
    }
    let mut out = Vec::new();
    alloy_rlp::encode_list(ommers, &mut out);
    rbtp_primitives::keccak256(out)
}

/// State root over plain (not yet hashed) addresses and their accounts, as
/// needed for genesis allocations.
pub fn state_root_unhashed(accounts: impl IntoIterator<Item = (Address, TrieAccount)>) -> B256 {
    let mut trie = SecureTrie::new(Arc::new(MemoryTrieDb::new()));
    for (address, account) in accounts {
        let mut value = Vec::new();
        account.encode(&mut value);
        trie.insert(address.as_slice(), value).expect("in-memory trie cannot miss nodes");
    }
    trie.commit()
}

/// Storage root over plain (not yet hashed) slot keys.
pub fn storage_root_unhashed(storage: impl IntoIterator<Item = (B256, StorageValue)>) -> B256 {
    let mut trie = SecureTrie::new(Arc::new(MemoryTrieDb::new()));
    for (key, value) in storage {
        if value.is_zero() {
            continue
        }
        let mut encoded = Vec::new();
        value.encode(&mut encoded);
        trie.insert(key.as_slice(), encoded).expect("in-memory trie cannot miss nodes");
    }
    trie.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbtp_primitives::{hex, U256, EMPTY_ROOT_HASH, KECCAK_EMPTY};

    #[test]
    fn empty_roots() {
        assert_eq!(calculate_transaction_root(&[]), EMPTY_ROOT_HASH);
        assert_eq!(calculate_receipt_root(&[]), EMPTY_ROOT_HASH);
        assert_eq!(calculate_ommers_hash(&[]), EMPTY_OMMER_ROOT_HASH);
        assert_eq!(state_root_unhashed(Vec::new()), EMPTY_ROOT_HASH);
    }

    // the fixtures pin the address to a max-balance sole account; generated
    // with the reference client and a custom genesis
    #[test]
    fn single_account_state_roots() {
        let fixtures: Vec<(Address, B256)> = vec![
            (
                hex!("9fe4abd71ad081f091bd06dd1c16f7e92927561e").into(),
                hex!("4b35be4231841d212ce2fa43aedbddeadd6eb7d420195664f9f0d55629db8c32").into(),
            ),
            (
                hex!("c2ba9d87f8be0ade00c60d3656c1188e008fbfa2").into(),
                hex!("e1389256c47d63df8856d7729dec9dc2dae074a7f0cbc49acad1cf7b29f7fe94").into(),
            ),
        ];

        for (address, expected) in fixtures {
            let account = TrieAccount {
                nonce: 0,
                balance: U256::MAX,
                storage_root: EMPTY_ROOT_HASH,
                code_hash: KECCAK_EMPTY,
            };
            assert_eq!(state_root_unhashed([(address, account)]), expected);
        }
    }

    #[test]
    fn storage_root_skips_zero_slots() {
        let occupied = storage_root_unhashed([
            (B256::with_last_byte(1), U256::from(42)),
            (B256::with_last_byte(2), U256::ZERO),
        ]);
        let without_zero = storage_root_unhashed([(B256::with_last_byte(1), U256::from(42))]);
        assert_eq!(occupied, without_zero);
    }
}
