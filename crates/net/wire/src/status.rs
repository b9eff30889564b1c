use crate::BtpVersion;
use alloy_rlp::{length_of_length, Decodable, Encodable};
use rbtp_chainspec::ForkId;
use rbtp_primitives::{B256, U256};
use std::fmt;

/// The application handshake exchanged when a session opens.
///
/// The advertised total difficulty is not verifiable against the head hash
/// at handshake time and is treated as untrusted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// The negotiated protocol version.
    pub version: u8,
    /// The network id peers must share.
    pub network_id: u64,
    /// Total difficulty of the peer's best chain.
    pub total_difficulty: U256,
    /// Hash of the peer's best block.
    pub head: B256,
    /// Hash of the peer's genesis block.
    pub genesis: B256,
    /// The peer's fork id; present from btp/64 on.
    pub fork_id: Option<ForkId>,
}

impl Status {
    /// Whether the encoded form carries a fork id.
    fn has_fork_id(&self) -> bool {
        BtpVersion::try_from(self.version).map(|v| v.has_fork_id()).unwrap_or(false) &&
            self.fork_id.is_some()
    }

    fn payload_length(&self) -> usize {
        let mut length = self.version.length() +
            self.network_id.length() +
            self.total_difficulty.length() +
            self.head.length() +
            self.genesis.length();
        if self.has_fork_id() {
            length += self.fork_id.expect("checked").length();
        }
        length
    }
}

impl Encodable for Status {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.version.encode(out);
        self.network_id.encode(out);
        self.total_difficulty.encode(out);
        self.head.encode(out);
        self.genesis.encode(out);
        if self.has_fork_id() {
            self.fork_id.expect("checked").encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload = self.payload_length();
        payload + length_of_length(payload)
    }
}

impl Decodable for Status {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let started = buf.len();

        let version = u8::decode(buf)?;
        let network_id = u64::decode(buf)?;
        let total_difficulty = U256::decode(buf)?;
        let head = B256::decode(buf)?;
        let genesis = B256::decode(buf)?;

        // a btp/64 status carries one more field
        let consumed = started - buf.len();
        let fork_id = if consumed < header.payload_length {
            Some(ForkId::decode(buf)?)
        } else {
            None
        };

        Ok(Self { version, network_id, total_difficulty, head, genesis, fork_id })
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Status {{ version: {}, network: {}, td: {}, head: {}, genesis: {}, forkid: {:?} }}",
            self.version, self.network_id, self.total_difficulty, self.head, self.genesis,
            self.fork_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbtp_chainspec::ForkHash;

    fn base_status() -> Status {
        Status {
            version: 64,
            network_id: 1,
            total_difficulty: U256::from(17_179_869_184u64),
            head: B256::repeat_byte(0xfe),
            genesis: B256::repeat_byte(0xd4),
            fork_id: Some(ForkId { hash: ForkHash([0xfc, 0x64, 0xec, 0x04]), next: 1_150_000 }),
        }
    }

    #[test]
    fn status_roundtrip_with_fork_id() {
        let status = base_status();
        let mut encoded = Vec::new();
        status.encode(&mut encoded);
        assert_eq!(Status::decode(&mut encoded.as_slice()).unwrap(), status);
    }

    #[test]
    fn legacy_status_drops_fork_id() {
        let status = Status { version: 63, ..base_status() };
        let mut encoded = Vec::new();
        status.encode(&mut encoded);
        let decoded = Status::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded.fork_id, None);
        assert_eq!(decoded.network_id, status.network_id);
    }
}
