use crate::{transaction::util::secp256k1, Address, ChainId, B256, U256};
use alloy_rlp::{Decodable, Encodable, Error as RlpError};

/// An ECDSA signature over a transaction's signing hash.
///
/// The `v` value on the wire folds in the recovery parity and, for
/// EIP-155 protected transactions, the chain id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    /// The R field of the signature.
    pub r: U256,
    /// The S field of the signature.
    pub s: U256,
    /// Whether the recovered Y coordinate is odd.
    pub odd_y_parity: bool,
}

impl Signature {
    /// The `v` value as encoded on the wire for the given chain id.
    pub fn v(&self, chain_id: Option<ChainId>) -> u64 {
        let parity = self.odd_y_parity as u64;
        match chain_id {
            Some(id) => parity + id * 2 + 35,
            None => parity + 27,
        }
    }

    /// Splits a wire `v` value into recovery parity and chain id.
    pub fn extract_chain_id(v: u64) -> alloy_rlp::Result<(bool, Option<ChainId>)> {
        if v < 35 {
            // non EIP-155 legacy scheme
            return match v {
                27 => Ok((false, None)),
                28 => Ok((true, None)),
                _ => Err(RlpError::Custom("invalid v value in signature")),
            }
        }
        Ok(((v - 35) % 2 != 0, Some((v - 35) / 2)))
    }

    /// Recovers the signer address over the given signing hash.
    ///
    /// Returns `None` if the signature does not describe a curve point.
    pub fn recover_signer(&self, hash: B256) -> Option<Address> {
        let mut sig = [0u8; 65];
        sig[0..32].copy_from_slice(&self.r.to_be_bytes::<32>());
        sig[32..64].copy_from_slice(&self.s.to_be_bytes::<32>());
        sig[64] = self.odd_y_parity as u8;
        secp256k1::recover_signer(&sig, hash.as_ref()).ok()
    }

    /// RLP payload length of `(v, r, s)` for the given chain id.
    pub(crate) fn rlp_len(&self, chain_id: Option<ChainId>) -> usize {
        self.v(chain_id).length() + self.r.length() + self.s.length()
    }

    /// Encodes `(v, r, s)` for the given chain id.
    pub(crate) fn encode_fields(&self, chain_id: Option<ChainId>, out: &mut dyn alloy_rlp::BufMut) {
        self.v(chain_id).encode(out);
        self.r.encode(out);
        self.s.encode(out);
    }

    /// Decodes `(v, r, s)`, returning the signature and the chain id folded
    /// into `v`.
    pub(crate) fn decode_fields(buf: &mut &[u8]) -> alloy_rlp::Result<(Self, Option<ChainId>)> {
        let v = u64::decode(buf)?;
        let r = U256::decode(buf)?;
        let s = U256::decode(buf)?;
        let (odd_y_parity, chain_id) = Self::extract_chain_id(v)?;
        Ok((Self { r, s, odd_y_parity }, chain_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v_roundtrip() {
        let sig = Signature { r: U256::from(1), s: U256::from(2), odd_y_parity: true };
        assert_eq!(sig.v(None), 28);
        assert_eq!(sig.v(Some(1)), 38);
        assert_eq!(Signature::extract_chain_id(28).unwrap(), (true, None));
        assert_eq!(Signature::extract_chain_id(38).unwrap(), (true, Some(1)));
        assert_eq!(Signature::extract_chain_id(37).unwrap(), (false, Some(1)));
        assert!(Signature::extract_chain_id(26).is_err());
    }
}
