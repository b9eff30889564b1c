use crate::{
    error::TrieError,
    nibbles::Nibbles,
    node::{Node, NodeHandle},
    store::TrieDb,
};
use rbtp_primitives::{keccak256, B256, EMPTY_ROOT_HASH};
use std::{fmt, sync::Arc};

/// A Merkle Patricia trie over raw keys.
///
/// Mutations build an in-memory overlay of dirty nodes; [`Trie::commit`]
/// flushes the overlay into the node store and returns the new root. Reads
/// resolve hash references through the store on demand.
pub struct Trie {
    root: Option<NodeHandle>,
    db: Arc<dyn TrieDb>,
}

impl fmt::Debug for Trie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trie").field("root", &self.root).finish_non_exhaustive()
    }
}

impl Trie {
    /// An empty trie over the given store.
    pub fn new(db: Arc<dyn TrieDb>) -> Self {
        Self { root: None, db }
    }

    /// Opens the trie rooted at `root`.
    ///
    /// The root node is resolved lazily; a missing node surfaces as
    /// [`TrieError::MissingNode`] on first access.
    pub fn at_root(root: B256, db: Arc<dyn TrieDb>) -> Self {
        let handle = (root != EMPTY_ROOT_HASH).then_some(NodeHandle::Hash(root));
        Self { root: handle, db }
    }

    /// Looks up `key`, returning the stored value bytes.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let path = Nibbles::unpack(key);
        let mut handle = match &self.root {
            Some(handle) => handle.clone(),
            None => return Ok(None),
        };
        let mut offset = 0;

        loop {
            let node = self.resolve(handle)?;
            match node {
                Node::Leaf { path: leaf_path, value } => {
                    return Ok((path.slice_from(offset) == leaf_path).then_some(value))
                }
                Node::Extension { path: ext_path, child } => {
                    let rest = path.slice_from(offset);
                    if rest.len() < ext_path.len() ||
                        rest.slice_to(ext_path.len()) != ext_path
                    {
                        return Ok(None)
                    }
                    offset += ext_path.len();
                    handle = child;
                }
                Node::Branch { mut children, value } => {
                    if offset == path.len() {
                        return Ok(value)
                    }
                    match children[path.at(offset) as usize].take() {
                        Some(child) => {
                            offset += 1;
                            handle = child;
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Inserts `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        debug_assert!(!value.is_empty(), "empty values must be removed instead");
        let path = Nibbles::unpack(key);
        let root = self.root.take();
        let new_root = self.insert_at(root, path, value)?;
        self.root = Some(new_root.into());
        Ok(())
    }

    /// Removes `key`. Returns whether a value was present.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool, TrieError> {
        let path = Nibbles::unpack(key);
        match self.root.take() {
            None => Ok(false),
            Some(root) => {
                let (new_root, removed) = self.remove_at(root, path)?;
                self.root = new_root.map(Into::into);
                Ok(removed)
            }
        }
    }

    /// Flushes dirty nodes into the store and returns the new root hash.
    ///
    /// Committing the same logical content always produces the same root.
    pub fn commit(&mut self) -> B256 {
        match self.root.take() {
            None => EMPTY_ROOT_HASH,
            Some(NodeHandle::Hash(hash)) => {
                self.root = Some(NodeHandle::Hash(hash));
                hash
            }
            Some(NodeHandle::InMemory(node)) => {
                let db = Arc::clone(&self.db);
                let mut sink = |hash: B256, bytes: Vec<u8>| db.insert_node(hash, bytes);
                let encoded = node.encode(&mut sink);
                // the root is stored by hash even when its encoding is short
                let hash = keccak256(&encoded);
                db.insert_node(hash, encoded);
                self.root = Some(NodeHandle::Hash(hash));
                hash
            }
        }
    }

    fn resolve(&self, handle: NodeHandle) -> Result<Node, TrieError> {
        match handle {
            NodeHandle::InMemory(node) => Ok(*node),
            NodeHandle::Hash(hash) => {
                let bytes = self.db.node(hash).ok_or(TrieError::MissingNode(hash))?;
                Node::decode(hash, &bytes)
            }
        }
    }

    fn insert_at(
        &self,
        handle: Option<NodeHandle>,
        path: Nibbles,
        value: Vec<u8>,
    ) -> Result<Node, TrieError> {
        let node = match handle {
            None => return Ok(Node::Leaf { path, value }),
            Some(handle) => self.resolve(handle)?,
        };

        match node {
            Node::Leaf { path: leaf_path, value: leaf_value } => {
                let common = path.common_prefix_len(&leaf_path);
                if common == path.len() && common == leaf_path.len() {
                    // exact match, replace in place
                    return Ok(Node::Leaf { path, value })
                }
                let mut children: [Option<NodeHandle>; 16] = Default::default();
                let mut branch_value = None;

                if leaf_path.len() == common {
                    branch_value = Some(leaf_value);
                } else {
                    let idx = leaf_path.at(common) as usize;
                    children[idx] = Some(
                        Node::Leaf { path: leaf_path.slice_from(common + 1), value: leaf_value }
                            .into(),
                    );
                }
                if path.len() == common {
                    branch_value = Some(value);
                } else {
                    let idx = path.at(common) as usize;
                    children[idx] = Some(
                        Node::Leaf { path: path.slice_from(common + 1), value }.into(),
                    );
                }

                let branch = Node::Branch { children: Box::new(children), value: branch_value };
                Ok(wrap_extension(path.slice_to(common), branch))
            }
            Node::Extension { path: ext_path, child } => {
                let common = path.common_prefix_len(&ext_path);
                if common == ext_path.len() {
                    let new_child =
                        self.insert_at(Some(child), path.slice_from(common), value)?;
                    return Ok(Node::Extension { path: ext_path, child: new_child.into() })
                }

                // the extension splits at `common`
                let mut children: [Option<NodeHandle>; 16] = Default::default();
                let mut branch_value = None;

                let ext_idx = ext_path.at(common) as usize;
                children[ext_idx] = Some(if ext_path.len() == common + 1 {
                    child
                } else {
                    Node::Extension { path: ext_path.slice_from(common + 1), child }.into()
                });

                if path.len() == common {
                    branch_value = Some(value);
                } else {
                    let idx = path.at(common) as usize;
                    children[idx] = Some(
                        Node::Leaf { path: path.slice_from(common + 1), value }.into(),
                    );
                }

                let branch = Node::Branch { children: Box::new(children), value: branch_value };
                Ok(wrap_extension(path.slice_to(common), branch))
            }
            Node::Branch { mut children, value: branch_value } => {
                if path.is_empty() {
                    return Ok(Node::Branch { children, value: Some(value) })
                }
                let idx = path.at(0) as usize;
                let new_child =
                    self.insert_at(children[idx].take(), path.slice_from(1), value)?;
                children[idx] = Some(new_child.into());
                Ok(Node::Branch { children, value: branch_value })
            }
        }
    }

    fn remove_at(
        &self,
        handle: NodeHandle,
        path: Nibbles,
    ) -> Result<(Option<Node>, bool), TrieError> {
        let node = self.resolve(handle)?;
        match node {
            Node::Leaf { path: leaf_path, value } => {
                if leaf_path == path {
                    Ok((None, true))
                } else {
                    Ok((Some(Node::Leaf { path: leaf_path, value }), false))
                }
            }
            Node::Extension { path: ext_path, child } => {
                if path.len() < ext_path.len() || path.slice_to(ext_path.len()) != ext_path {
                    return Ok((Some(Node::Extension { path: ext_path, child }), false))
                }
                let (new_child, removed) =
                    self.remove_at(child, path.slice_from(ext_path.len()))?;
                let node = match new_child {
                    None => None,
                    Some(child) => Some(self.merge_into_extension(ext_path, child)?),
                };
                Ok((node, removed))
            }
            Node::Branch { mut children, value } => {
                if path.is_empty() {
                    if value.is_none() {
                        return Ok((Some(Node::Branch { children, value }), false))
                    }
                    let collapsed = self.collapse_branch(children, None)?;
                    return Ok((Some(collapsed), true))
                }
                let idx = path.at(0) as usize;
                let Some(child) = children[idx].take() else {
                    return Ok((Some(Node::Branch { children, value }), false))
                };
                let (new_child, removed) = self.remove_at(child, path.slice_from(1))?;
                children[idx] = new_child.map(Into::into);
                if !removed {
                    return Ok((Some(Node::Branch { children, value }), false))
                }
                let collapsed = self.collapse_branch(children, value)?;
                Ok((Some(collapsed), true))
            }
        }
    }

    /// Re-forms a branch after a removal: a branch that is left with a lone
    /// value or a lone child is folded into a leaf or extension.
    fn collapse_branch(
        &self,
        mut children: Box<[Option<NodeHandle>; 16]>,
        value: Option<Vec<u8>>,
    ) -> Result<Node, TrieError> {
        let occupied: Vec<usize> =
            children.iter().enumerate().filter_map(|(i, c)| c.is_some().then_some(i)).collect();

        match (occupied.len(), &value) {
            (0, Some(_)) => Ok(Node::Leaf {
                path: Nibbles::default(),
                value: value.expect("checked above"),
            }),
            (1, None) => {
                let idx = occupied[0];
                let child = children[idx].take().expect("occupied");
                let nibble = idx as u8;
                let stub = Nibbles::from_nibbles(vec![nibble]);
                let child_node = self.resolve(child)?;
                Ok(match child_node {
                    Node::Leaf { path, value } => {
                        Node::Leaf { path: stub.concat(&path), value }
                    }
                    Node::Extension { path, child } => {
                        Node::Extension { path: stub.concat(&path), child }
                    }
                    branch @ Node::Branch { .. } => {
                        Node::Extension { path: stub, child: branch.into() }
                    }
                })
            }
            _ => Ok(Node::Branch { children, value }),
        }
    }

    /// Folds `child` back under an extension path, flattening nested
    /// leaves and extensions.
    fn merge_into_extension(&self, ext_path: Nibbles, child: Node) -> Result<Node, TrieError> {
        Ok(match child {
            Node::Leaf { path, value } => Node::Leaf { path: ext_path.concat(&path), value },
            Node::Extension { path, child } => {
                Node::Extension { path: ext_path.concat(&path), child }
            }
            branch @ Node::Branch { .. } => Node::Extension { path: ext_path, child: branch.into() },
        })
    }
}

fn wrap_extension(prefix: Nibbles, branch: Node) -> Node {
    if prefix.is_empty() {
        branch
    } else {
        Node::Extension { path: prefix, child: branch.into() }
    }
}

/// A trie whose keys are keccak256-hashed before insertion, preventing
/// crafted keys from unbalancing the tree.
#[derive(Debug)]
pub struct SecureTrie(Trie);

impl SecureTrie {
    /// An empty secure trie.
    pub fn new(db: Arc<dyn TrieDb>) -> Self {
        Self(Trie::new(db))
    }

    /// Opens the secure trie rooted at `root`.
    pub fn at_root(root: B256, db: Arc<dyn TrieDb>) -> Self {
        Self(Trie::at_root(root, db))
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        self.0.get(keccak256(key).as_slice())
    }

    /// Inserts `value` under `key`.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        self.0.insert(keccak256(key).as_slice(), value)
    }

    /// Removes `key`. Returns whether a value was present.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool, TrieError> {
        self.0.remove(keccak256(key).as_slice())
    }

    /// Flushes dirty nodes and returns the new root hash.
    pub fn commit(&mut self) -> B256 {
        self.0.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTrieDb;
    use rbtp_primitives::hex;

    fn memdb() -> Arc<dyn TrieDb> {
        Arc::new(MemoryTrieDb::new())
    }

    #[test]
    fn empty_trie_root() {
        let mut trie = Trie::new(memdb());
        assert_eq!(trie.commit(), EMPTY_ROOT_HASH);
    }

    #[test]
    fn insert_get_remove() {
        let mut trie = Trie::new(memdb());
        trie.insert(b"do", b"verb".to_vec()).unwrap();
        trie.insert(b"dog", b"puppy".to_vec()).unwrap();
        trie.insert(b"doge", b"coin".to_vec()).unwrap();
        trie.insert(b"horse", b"stallion".to_vec()).unwrap();

        assert_eq!(trie.get(b"do").unwrap(), Some(b"verb".to_vec()));
        assert_eq!(trie.get(b"dog").unwrap(), Some(b"puppy".to_vec()));
        assert_eq!(trie.get(b"doge").unwrap(), Some(b"coin".to_vec()));
        assert_eq!(trie.get(b"horse").unwrap(), Some(b"stallion".to_vec()));
        assert_eq!(trie.get(b"dogs").unwrap(), None);

        assert!(trie.remove(b"dog").unwrap());
        assert!(!trie.remove(b"dog").unwrap());
        assert_eq!(trie.get(b"dog").unwrap(), None);
        assert_eq!(trie.get(b"doge").unwrap(), Some(b"coin".to_vec()));
    }

    #[test]
    fn known_root_vector() {
        // the canonical "dog" trie from the yellow paper discussions
        let mut trie = Trie::new(memdb());
        trie.insert(b"doe", b"reindeer".to_vec()).unwrap();
        trie.insert(b"dog", b"puppy".to_vec()).unwrap();
        trie.insert(b"dogglesworth", b"cat".to_vec()).unwrap();
        assert_eq!(
            trie.commit(),
            B256::from(hex!("8aad789dff2f538bca5d8ea56e8abe10f4c7ba3a5dea95fea4cd6e7c3a1168d3"))
        );
    }

    #[test]
    fn insertion_order_is_irrelevant() {
        let pairs: Vec<(&[u8], &[u8])> =
            vec![(b"abc", b"1"), (b"abd", b"2"), (b"ab", b"3"), (b"xyz", b"4"), (b"x", b"5")];

        let mut forward = Trie::new(memdb());
        for (k, v) in &pairs {
            forward.insert(k, v.to_vec()).unwrap();
        }
        let mut backward = Trie::new(memdb());
        for (k, v) in pairs.iter().rev() {
            backward.insert(k, v.to_vec()).unwrap();
        }
        assert_eq!(forward.commit(), backward.commit());
    }

    #[test]
    fn commit_is_idempotent() {
        let db = memdb();
        let mut trie = Trie::new(Arc::clone(&db));
        trie.insert(b"alpha", vec![1; 40]).unwrap();
        trie.insert(b"beta", vec![2; 40]).unwrap();
        let first = trie.commit();
        let second = trie.commit();
        assert_eq!(first, second);

        // replaying the same mutations onto a fresh trie gives the same root
        let mut replay = Trie::new(db);
        replay.insert(b"beta", vec![2; 40]).unwrap();
        replay.insert(b"alpha", vec![1; 40]).unwrap();
        assert_eq!(replay.commit(), first);
    }

    #[test]
    fn reopen_from_committed_root() {
        let db = memdb();
        let mut trie = Trie::new(Arc::clone(&db));
        for i in 0u32..50 {
            trie.insert(&i.to_be_bytes(), i.to_le_bytes().to_vec()).unwrap();
        }
        let root = trie.commit();

        let reopened = Trie::at_root(root, db);
        for i in 0u32..50 {
            assert_eq!(reopened.get(&i.to_be_bytes()).unwrap(), Some(i.to_le_bytes().to_vec()));
        }
        assert_eq!(reopened.get(&51u32.to_be_bytes()).unwrap(), None);
    }

    #[test]
    fn removal_restores_prior_root() {
        let db = memdb();
        let mut trie = Trie::new(Arc::clone(&db));
        trie.insert(b"stable", vec![7; 33]).unwrap();
        let before = trie.commit();

        trie.insert(b"transient", vec![9; 33]).unwrap();
        let with_extra = trie.commit();
        assert_ne!(before, with_extra);

        trie.remove(b"transient").unwrap();
        assert_eq!(trie.commit(), before);
    }

    #[test]
    fn missing_node_surfaces() {
        let trie = Trie::at_root(B256::repeat_byte(0x13), memdb());
        assert_eq!(
            trie.get(b"anything").unwrap_err(),
            TrieError::MissingNode(B256::repeat_byte(0x13))
        );
    }

    #[test]
    fn secure_trie_hashes_keys() {
        let db = memdb();
        let mut secure = SecureTrie::new(Arc::clone(&db));
        secure.insert(b"key", b"value".to_vec()).unwrap();
        assert_eq!(secure.get(b"key").unwrap(), Some(b"value".to_vec()));

        // the raw key is not reachable without hashing
        let raw = Trie::at_root(secure.commit(), db);
        assert_eq!(raw.get(b"key").unwrap(), None);
        assert_eq!(raw.get(keccak256(b"key").as_slice()).unwrap(), Some(b"value".to_vec()));
    }
}
