//! The typed key schema of the hot tier.
//!
//! Every table gets a one-byte prefix; block-oriented keys embed the number
//! big-endian so range scans walk in chain order.

use rbtp_primitives::{BlockNumber, B256};

/// On-disk schema version written at first open and checked afterwards.
pub const DB_VERSION: u64 = 1;

/// Key of the schema version entry.
pub(crate) const VERSION_KEY: &[u8] = b"DatabaseVersion";

/// Key of the canonical head header hash.
pub(crate) const HEAD_HEADER_KEY: &[u8] = b"LastHeader";

/// Key of the canonical head block hash (full body present).
pub(crate) const HEAD_BLOCK_KEY: &[u8] = b"LastBlock";

/// Key of the stored chain config blob.
pub(crate) const CHAIN_CONFIG_KEY: &[u8] = b"ChainConfig";

const HEADER_PREFIX: u8 = b'h';
const HEADER_NUMBER_PREFIX: u8 = b'H';
const BODY_PREFIX: u8 = b'b';
const RECEIPTS_PREFIX: u8 = b'r';
const CANONICAL_PREFIX: u8 = b'n';
const TD_PREFIX: u8 = b't';
const TX_LOOKUP_PREFIX: u8 = b'l';
const STATE_NODE_PREFIX: u8 = b's';
const PREIMAGE_PREFIX: u8 = b'p';
const BLOOM_BITS_PREFIX: u8 = b'B';

fn block_key(prefix: u8, number: BlockNumber, hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(prefix);
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash.as_slice());
    key
}

fn hash_key(prefix: u8, hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(prefix);
    key.extend_from_slice(hash.as_slice());
    key
}

/// `'h' ++ number ++ hash` → RLP(header)
pub(crate) fn header_key(number: BlockNumber, hash: B256) -> Vec<u8> {
    block_key(HEADER_PREFIX, number, hash)
}

/// `'H' ++ hash` → number, the inverse index needed for ancient reads
pub(crate) fn header_number_key(hash: B256) -> Vec<u8> {
    hash_key(HEADER_NUMBER_PREFIX, hash)
}

/// `'b' ++ number ++ hash` → RLP(body)
pub(crate) fn body_key(number: BlockNumber, hash: B256) -> Vec<u8> {
    block_key(BODY_PREFIX, number, hash)
}

/// `'r' ++ number ++ hash` → RLP(receipts)
pub(crate) fn receipts_key(number: BlockNumber, hash: B256) -> Vec<u8> {
    block_key(RECEIPTS_PREFIX, number, hash)
}

/// `'n' ++ number` → canonical hash
pub(crate) fn canonical_key(number: BlockNumber) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(CANONICAL_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key
}

/// `'t' ++ number ++ hash` → RLP(total difficulty)
pub(crate) fn td_key(number: BlockNumber, hash: B256) -> Vec<u8> {
    block_key(TD_PREFIX, number, hash)
}

/// `'l' ++ tx hash` → RLP((block hash, index))
pub(crate) fn tx_lookup_key(hash: B256) -> Vec<u8> {
    hash_key(TX_LOOKUP_PREFIX, hash)
}

/// `'s' ++ node hash` → trie node or code bytes
pub(crate) fn state_node_key(hash: B256) -> Vec<u8> {
    hash_key(STATE_NODE_PREFIX, hash)
}

/// `'p' ++ hash` → preimage bytes
pub(crate) fn preimage_key(hash: B256) -> Vec<u8> {
    hash_key(PREIMAGE_PREFIX, hash)
}

/// `'B' ++ bit index ++ section` → bloom bits blob
pub(crate) fn bloom_bits_key(bit: u16, section: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(11);
    key.push(BLOOM_BITS_PREFIX);
    key.extend_from_slice(&bit.to_be_bytes());
    key.extend_from_slice(&section.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_disjoint_across_tables() {
        let hash = B256::repeat_byte(0xaa);
        let keys = [
            header_key(1, hash),
            body_key(1, hash),
            receipts_key(1, hash),
            td_key(1, hash),
            canonical_key(1),
            header_number_key(hash),
            tx_lookup_key(hash),
            state_node_key(hash),
            preimage_key(hash),
            bloom_bits_key(0, 1),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn canonical_keys_sort_by_number() {
        assert!(canonical_key(1) < canonical_key(2));
        assert!(canonical_key(255) < canonical_key(256));
    }
}
