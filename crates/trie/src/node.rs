use crate::{error::TrieError, nibbles::Nibbles};
use alloy_rlp::{length_of_length, Encodable, EMPTY_STRING_CODE};
use rbtp_primitives::{keccak256, B256};

/// A node of the Merkle Patricia trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    /// Terminal node: the remaining path and the stored value.
    Leaf {
        /// Path suffix below the parent.
        path: Nibbles,
        /// The stored value bytes.
        value: Vec<u8>,
    },
    /// Shared-prefix shortcut above a branch.
    Extension {
        /// The shared path segment.
        path: Nibbles,
        /// The node below the segment.
        child: NodeHandle,
    },
    /// Sixteen-way fan-out with an optional value terminating exactly here.
    Branch {
        /// One slot per nibble value.
        children: Box<[Option<NodeHandle>; 16]>,
        /// Value for a key ending at this node.
        value: Option<Vec<u8>>,
    },
}

/// A reference to a child node: either resolved in memory (dirty or decoded
/// inline) or an unresolved hash pointing into the node store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodeHandle {
    /// keccak256 of the child's encoding; the child lives in the store.
    Hash(B256),
    /// The child itself.
    InMemory(Box<Node>),
}

impl From<Node> for NodeHandle {
    fn from(node: Node) -> Self {
        Self::InMemory(Box::new(node))
    }
}

/// Encodes `rlp` as a node reference: embedded verbatim when shorter than 32
/// bytes, replaced by its hash otherwise. Hashed nodes are handed to `sink`.
fn rlp_node(rlp: Vec<u8>, sink: &mut dyn FnMut(B256, Vec<u8>)) -> Vec<u8> {
    if rlp.len() < 32 {
        rlp
    } else {
        let hash = keccak256(&rlp);
        sink(hash, rlp);
        rlp_hash(hash)
    }
}

/// RLP of a 32-byte hash string.
fn rlp_hash(hash: B256) -> Vec<u8> {
    let mut out = Vec::with_capacity(33);
    out.push(EMPTY_STRING_CODE + 32);
    out.extend_from_slice(hash.as_slice());
    out
}

impl Node {
    /// Encodes the node, handing every hashed descendant to `sink`.
    ///
    /// The returned bytes are the node's full encoding; the caller decides
    /// whether to hash it in turn.
    pub(crate) fn encode(&self, sink: &mut dyn FnMut(B256, Vec<u8>)) -> Vec<u8> {
        let mut items: Vec<Vec<u8>> = Vec::new();
        match self {
            Self::Leaf { path, value } => {
                items.push(encode_string(&path.encode_compact(true)));
                items.push(encode_string(value));
            }
            Self::Extension { path, child } => {
                items.push(encode_string(&path.encode_compact(false)));
                items.push(child.encode_ref(sink));
            }
            Self::Branch { children, value } => {
                for child in children.iter() {
                    match child {
                        Some(handle) => items.push(handle.encode_ref(sink)),
                        None => items.push(vec![EMPTY_STRING_CODE]),
                    }
                }
                match value {
                    Some(value) => items.push(encode_string(value)),
                    None => items.push(vec![EMPTY_STRING_CODE]),
                }
            }
        }

        let payload: usize = items.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(payload + length_of_length(payload));
        alloy_rlp::Header { list: true, payload_length: payload }.encode(&mut out);
        for item in items {
            out.extend_from_slice(&item);
        }
        out
    }

    /// Decodes a node from its full encoding.
    pub(crate) fn decode(hash: B256, bytes: &[u8]) -> Result<Self, TrieError> {
        let corrupt = |message| TrieError::Corrupt { hash, message };

        let mut buf = bytes;
        let header =
            alloy_rlp::Header::decode(&mut buf).map_err(|_| corrupt("not a valid rlp item"))?;
        if !header.list {
            return Err(corrupt("node is not a list"))
        }

        let mut items = Vec::new();
        let mut payload = &buf[..header.payload_length];
        while !payload.is_empty() {
            items.push(take_item(&mut payload).ok_or_else(|| corrupt("truncated node item"))?);
        }

        match items.len() {
            2 => {
                let path_bytes =
                    items[0].as_string().ok_or_else(|| corrupt("path must be a string"))?;
                let (path, is_leaf) = Nibbles::decode_compact(path_bytes)
                    .ok_or_else(|| corrupt("invalid compact path"))?;
                if is_leaf {
                    let value =
                        items[1].as_string().ok_or_else(|| corrupt("leaf value must be a string"))?;
                    Ok(Self::Leaf { path, value: value.to_vec() })
                } else {
                    let child = items[1]
                        .as_child(hash)?
                        .ok_or_else(|| corrupt("extension child missing"))?;
                    Ok(Self::Extension { path, child })
                }
            }
            17 => {
                let mut children: [Option<NodeHandle>; 16] = Default::default();
                for (slot, item) in children.iter_mut().zip(&items[..16]) {
                    *slot = item.as_child(hash)?;
                }
                let value = match items[16].as_string() {
                    Some([]) => None,
                    Some(value) => Some(value.to_vec()),
                    None => return Err(corrupt("branch value must be a string")),
                };
                Ok(Self::Branch { children: Box::new(children), value })
            }
            _ => Err(corrupt("node must have 2 or 17 items")),
        }
    }
}

impl NodeHandle {
    /// Encodes this handle as a node reference inside its parent.
    fn encode_ref(&self, sink: &mut dyn FnMut(B256, Vec<u8>)) -> Vec<u8> {
        match self {
            Self::Hash(hash) => rlp_hash(*hash),
            Self::InMemory(node) => rlp_node(node.encode(sink), sink),
        }
    }
}

/// Decodes a stored node and collects the hashes of every hash-referenced
/// descendant plus all leaf values reachable without another fetch.
///
/// This is what state sync walks: hash references become further download
/// requests, account-leaf values reveal storage roots and code hashes.
pub fn decode_node_refs(bytes: &[u8]) -> Result<(Vec<B256>, Vec<Vec<u8>>), TrieError> {
    let node = Node::decode(keccak256(bytes), bytes)?;
    let mut hashes = Vec::new();
    let mut values = Vec::new();
    collect_refs(&node, &mut hashes, &mut values);
    Ok((hashes, values))
}

fn collect_refs(node: &Node, hashes: &mut Vec<B256>, values: &mut Vec<Vec<u8>>) {
    match node {
        Node::Leaf { value, .. } => values.push(value.clone()),
        Node::Extension { child, .. } => collect_handle(child, hashes, values),
        Node::Branch { children, value } => {
            for child in children.iter().flatten() {
                collect_handle(child, hashes, values);
            }
            if let Some(value) = value {
                values.push(value.clone());
            }
        }
    }
}

fn collect_handle(handle: &NodeHandle, hashes: &mut Vec<B256>, values: &mut Vec<Vec<u8>>) {
    match handle {
        NodeHandle::Hash(hash) => hashes.push(*hash),
        NodeHandle::InMemory(node) => collect_refs(node, hashes, values),
    }
}

fn encode_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    bytes.encode(&mut out);
    out
}

/// One raw RLP item sliced out of a node payload.
struct Item<'a> {
    /// Full bytes including the item's own header.
    raw: &'a [u8],
    /// Payload without the header.
    payload: &'a [u8],
    list: bool,
}

impl<'a> Item<'a> {
    fn as_string(&self) -> Option<&'a [u8]> {
        (!self.list).then_some(self.payload)
    }

    /// Interprets the item as a child reference: empty string for none,
    /// 32-byte string for a hash, inline list for an embedded node.
    fn as_child(&self, parent: B256) -> Result<Option<NodeHandle>, TrieError> {
        if self.list {
            let node = Node::decode(parent, self.raw)?;
            return Ok(Some(node.into()))
        }
        match self.payload.len() {
            0 => Ok(None),
            32 => Ok(Some(NodeHandle::Hash(B256::from_slice(self.payload)))),
            _ => Err(TrieError::Corrupt { hash: parent, message: "child ref must be 0 or 32 bytes" }),
        }
    }
}

fn take_item<'a>(buf: &mut &'a [u8]) -> Option<Item<'a>> {
    let raw = *buf;
    let mut view = *buf;
    let header = alloy_rlp::Header::decode(&mut view).ok()?;
    let header_len = raw.len() - view.len();
    let total = header_len + header.payload_length;
    if raw.len() < total {
        return None
    }
    *buf = &raw[total..];
    Some(Item {
        raw: &raw[..total],
        payload: &raw[header_len..total],
        list: header.list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_roundtrip() {
        let leaf = Node::Leaf {
            path: Nibbles::unpack([0x12, 0x34]),
            value: b"hello".to_vec(),
        };
        let encoded = leaf.encode(&mut |_, _| {});
        let decoded = Node::decode(B256::ZERO, &encoded).unwrap();
        assert_eq!(decoded, leaf);
    }

    #[test]
    fn branch_roundtrip_with_inline_child() {
        let mut children: [Option<NodeHandle>; 16] = Default::default();
        children[3] = Some(
            Node::Leaf { path: Nibbles::from_nibbles(vec![0x1]), value: vec![0xaa] }.into(),
        );
        children[7] = Some(NodeHandle::Hash(B256::repeat_byte(0x55)));
        let branch = Node::Branch { children: Box::new(children), value: Some(vec![0xbb]) };

        let encoded = branch.encode(&mut |_, _| {});
        let decoded = Node::decode(B256::ZERO, &encoded).unwrap();
        assert_eq!(decoded, branch);
    }

    #[test]
    fn large_nodes_are_hashed_out() {
        let mut stored = Vec::new();
        let child = Node::Leaf {
            path: Nibbles::unpack([0x99; 4]),
            value: vec![0xcc; 64],
        };
        let ext = Node::Extension { path: Nibbles::from_nibbles(vec![0x1]), child: child.into() };
        let encoded = ext.encode(&mut |hash, bytes| stored.push((hash, bytes)));
        // the oversized leaf must have been replaced by its hash
        assert_eq!(stored.len(), 1);
        let decoded = Node::decode(B256::ZERO, &encoded).unwrap();
        match decoded {
            Node::Extension { child: NodeHandle::Hash(hash), .. } => {
                assert_eq!(hash, stored[0].0)
            }
            other => panic!("expected hashed child, got {other:?}"),
        }
    }
}
