//! In-memory, hash-addressed node store.

use crate::{
    TrieError,
    nodes::{Node, NodeFlag},
};
use alloy_primitives::{B256, map::HashMap};
use alloy_rlp::Encodable;
use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

/// A node held by the store together with its estimated encoded size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedNode {
    /// The collapsed node: children are hash references or embedded nodes.
    pub node: Node,
    /// Estimated size of the node's encoding.
    pub size: usize,
}

/// The set of nodes written since the store was created, keyed by hash.
#[derive(Debug, Default)]
pub struct NodeCache {
    nodes: HashMap<B256, CachedNode>,
    dirty_size: usize,
    writes: u64,
}

impl NodeCache {
    /// Records `node` under `hash`. Nodes already present are left as they are.
    pub fn insert(&mut self, hash: B256, size: usize, node: Node) {
        if self.nodes.contains_key(&hash) {
            trace!(target: "trie::db", ?hash, "node already present");
            return;
        }
        trace!(target: "trie::db", ?hash, size, "inserting node");
        self.nodes.insert(hash, CachedNode { node, size });
        self.dirty_size += B256::len_bytes() + size;
        self.writes += 1;
    }

    /// Returns the node stored under `hash`.
    pub fn get(&self, hash: &B256) -> Option<&CachedNode> {
        self.nodes.get(hash)
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no node has been stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Accumulated size of the stored nodes, keys included.
    pub const fn dirty_size(&self) -> usize {
        self.dirty_size
    }

    /// Number of insertions that stored a new node.
    pub const fn writes(&self) -> u64 {
        self.writes
    }
}

/// A node store shared between tries and commit pipelines.
///
/// Every access goes through a single mutex, so inserts coming from a synchronous commit and from
/// a pipeline consumer never interleave.
#[derive(Debug, Default)]
pub struct Database {
    dirties: Mutex<NodeCache>,
}

impl Database {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the store for exclusive access.
    pub fn lock(&self) -> MutexGuard<'_, NodeCache> {
        self.dirties.lock()
    }

    /// Returns a copy of the node stored under `hash`.
    pub fn node(&self, hash: B256) -> Option<Node> {
        self.lock().get(&hash).map(|cached| cached.node.clone())
    }

    /// Returns the canonical encoding of the node stored under `hash`.
    pub fn node_rlp(&self, hash: B256) -> Option<Vec<u8>> {
        let dirties = self.lock();
        let cached = dirties.get(&hash)?;
        let mut out = Vec::with_capacity(cached.node.length());
        cached.node.encode(&mut out);
        Some(out)
    }

    /// Loads the structural node stored under `hash`, ready to be mutated.
    ///
    /// The returned node is clean and carries `hash` as its cached hash.
    pub fn resolve(&self, hash: B256) -> Result<Node, TrieError> {
        let rlp = self.node_rlp(hash).ok_or(TrieError::MissingNode(hash))?;
        let mut node = Node::decode(&mut rlp.as_slice())?;
        if let Some(flags) = node.flags_mut() {
            *flags = NodeFlag::persisted(hash);
        }
        Ok(node)
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no node has been stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Accumulated size of the stored nodes, keys included.
    pub fn dirty_size(&self) -> usize {
        self.lock().dirty_size()
    }

    /// Number of insertions that stored a new node.
    pub fn writes(&self) -> u64 {
        self.lock().writes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::ShortNode;
    use alloy_primitives::{Bytes, keccak256};
    use nybbles::Nibbles;

    fn leaf() -> Node {
        ShortNode::new(Nibbles::unpack([0x42; 16]), Node::Value(Bytes::from(vec![7; 32]))).into()
    }

    #[test]
    fn insert_skips_known_hashes() {
        let db = Database::new();
        let node = leaf();
        let hash = keccak256(alloy_rlp::encode(&node));

        db.lock().insert(hash, 60, node.clone());
        db.lock().insert(hash, 60, node.clone());

        assert_eq!(db.len(), 1);
        assert_eq!(db.writes(), 1);
        assert_eq!(db.dirty_size(), 32 + 60);
        assert_eq!(db.node(hash), Some(node));
    }

    #[test]
    fn resolve_decodes_stored_node() {
        let db = Database::new();
        let node = leaf();
        let rlp = alloy_rlp::encode(&node);
        let hash = keccak256(&rlp);
        db.lock().insert(hash, 60, node);

        assert_eq!(db.node_rlp(hash), Some(rlp));
        let resolved = db.resolve(hash).unwrap();
        assert_eq!(resolved.cache(), (Some(hash), false));
        assert_eq!(keccak256(alloy_rlp::encode(&resolved)), hash);
    }

    #[test]
    fn resolve_unknown_hash() {
        let db = Database::new();
        let hash = B256::repeat_byte(1);
        assert!(matches!(db.resolve(hash), Err(TrieError::MissingNode(missing)) if missing == hash));
    }
}
