//! EIP-2124 fork identifiers: a CRC32 over the genesis hash and all past
//! fork blocks, plus the next scheduled fork.

use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use rbtp_primitives::{BlockNumber, B256};
use std::ops::AddAssign;

/// The rolling CRC32 over the genesis hash and every activated fork block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForkHash(pub [u8; 4]);

impl From<B256> for ForkHash {
    fn from(genesis: B256) -> Self {
        Self(crc32fast::hash(&genesis[..]).to_be_bytes())
    }
}

impl AddAssign<BlockNumber> for ForkHash {
    fn add_assign(&mut self, block: BlockNumber) {
        let mut hasher = crc32fast::Hasher::new_with_initial(u32::from_be_bytes(self.0));
        hasher.update(&block.to_be_bytes());
        self.0 = hasher.finalize().to_be_bytes();
    }
}

impl Encodable for ForkHash {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.0.as_slice().encode(out)
    }

    fn length(&self) -> usize {
        5
    }
}

impl Decodable for ForkHash {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if header.list || header.payload_length != 4 {
            return Err(alloy_rlp::Error::UnexpectedLength)
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[..4]);
        *buf = &buf[4..];
        Ok(Self(bytes))
    }
}

/// A fork identifier as advertised in the `Status` handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, RlpEncodable, RlpDecodable)]
pub struct ForkId {
    /// CRC32 over genesis hash and past fork blocks.
    pub hash: ForkHash,
    /// Block number of the next scheduled fork, or zero if none is known.
    pub next: BlockNumber,
}

/// Why a remote fork id was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The remote is on a rule set we have already moved past, or on a
    /// different chain entirely.
    #[error("remote fork id is incompatible or the local node is stale")]
    LocalIncompatibleOrStale,
    /// The remote advertises a fork as upcoming that we have already passed,
    /// so it is certain to desync soon.
    #[error("remote node is stale and needs a software update")]
    RemoteStale,
}

/// Filter that validates remote [`ForkId`]s against the local fork
/// schedule and head.
#[derive(Debug, Clone)]
pub struct ForkFilter {
    /// `(fork block, hash after applying it)` checkpoints, starting with the
    /// genesis-only hash at block zero.
    checkpoints: Vec<(BlockNumber, ForkHash)>,
    head: BlockNumber,
}

impl ForkFilter {
    /// Builds the filter from the genesis hash and the sorted, deduplicated
    /// list of fork blocks.
    pub fn new(genesis: B256, forks: impl IntoIterator<Item = BlockNumber>, head: BlockNumber) -> Self {
        let mut hash = ForkHash::from(genesis);
        let mut checkpoints = vec![(0, hash)];
        for fork in forks {
            if fork == 0 {
                // forks live at genesis don't advance the hash
                continue
            }
            hash += fork;
            checkpoints.push((fork, hash));
        }
        Self { checkpoints, head }
    }

    /// Moves the local head, changing which forks count as passed.
    pub fn set_head(&mut self, head: BlockNumber) {
        self.head = head;
    }

    /// The fork id the local node should advertise.
    pub fn current(&self) -> ForkId {
        let mut hash = self.checkpoints[0].1;
        let mut next = 0;
        for (fork, fork_hash) in &self.checkpoints[1..] {
            if self.head >= *fork {
                hash = *fork_hash;
            } else {
                next = *fork;
                break
            }
        }
        ForkId { hash, next }
    }

    /// Validates a remote fork id per the EIP-2124 rules.
    pub fn validate(&self, remote: ForkId) -> Result<(), ValidationError> {
        // 1) the remote matches one of our checkpoints
        if let Some(position) =
            self.checkpoints.iter().position(|(_, hash)| *hash == remote.hash)
        {
            let local = self.current();
            if remote.hash == local.hash {
                // same rule set; the remote must not announce a fork we have
                // already passed without applying it
                if remote.next != 0 && self.head >= remote.next {
                    return Err(ValidationError::RemoteStale)
                }
                return Ok(())
            }

            // the remote is on an older rule set (a subset of ours): it must
            // know about the exact fork that comes next for it
            let next_fork_for_remote =
                self.checkpoints.get(position + 1).map(|(fork, _)| *fork).unwrap_or(0);
            if self.head >= next_fork_for_remote && remote.next == next_fork_for_remote {
                return Ok(())
            }
            // remote is simply behind and will catch up
            if self.head < next_fork_for_remote {
                return Ok(())
            }
            return Err(ValidationError::LocalIncompatibleOrStale)
        }

        // 2) the remote may be ahead of us: its hash would match ours once we
        //    apply forks we have not reached yet
        let mut hash = self.current().hash;
        for (fork, _) in &self.checkpoints[1..] {
            if self.head < *fork {
                hash += *fork;
                if hash == remote.hash {
                    // local node is stale but compatible for now
                    return Ok(())
                }
            }
        }

        Err(ValidationError::LocalIncompatibleOrStale)
    }
}
