//! A mutable trie over a shared node store.

use crate::{
    CommitterPool, Database, EMPTY_ROOT_HASH, Hasher, LeafCallback, TrieError,
    nodes::{BranchNode, Node, NodeFlag, ShortNode, VALUE_SLOT},
};
use alloy_primitives::{B256, Bytes};
use core::mem;
use nybbles::Nibbles;
use std::sync::Arc;
use tracing::trace;

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 32;

/// An in-memory Merkle-Patricia trie whose committed nodes live in a [Database].
///
/// Mutations create dirty nodes; [Trie::commit] hashes them, writes them through a committer
/// borrowed from the pool and replaces the root with its hash reference. Subsequent mutations
/// load the nodes they touch back from the store.
#[derive(Debug)]
pub struct Trie {
    root: Option<Node>,
    db: Option<Arc<Database>>,
    pool: Arc<CommitterPool>,
    hasher: Hasher,
}

impl Trie {
    /// Creates an empty trie.
    pub fn new(db: Option<Arc<Database>>, pool: Arc<CommitterPool>) -> Self {
        Self { root: None, db, pool, hasher: Hasher::default() }
    }

    /// Opens the trie committed under `root`. Nodes are loaded from `db` when first touched.
    pub fn open(root: B256, db: Arc<Database>, pool: Arc<CommitterPool>) -> Self {
        let root = (root != EMPTY_ROOT_HASH).then_some(Node::Hash(root));
        Self { root, db: Some(db), pool, hasher: Hasher::default() }
    }

    /// Returns the root node.
    pub const fn root(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    /// Inserts `value` under `key`, replacing any previous value.
    ///
    /// On error the trie is left as it was.
    pub fn insert(&mut self, key: &[u8], value: impl Into<Bytes>) -> Result<(), TrieError> {
        if key.len() > MAX_KEY_LEN {
            return Err(TrieError::KeyTooLong(key.len()));
        }
        let value = value.into();
        if value.is_empty() {
            return Err(TrieError::EmptyValue);
        }

        let path = Nibbles::unpack(key);
        match &mut self.root {
            Some(root) => {
                let dirty = insert(self.db.as_deref(), root, path, value)?;
                trace!(target: "trie", ?path, dirty, "inserted");
            }
            None => self.root = Some(leaf(path, value)),
        }
        Ok(())
    }

    /// Returns the root hash, hashing every dirty node.
    pub fn hash(&mut self) -> B256 {
        match &mut self.root {
            Some(root) => self.hasher.root_hash(root),
            None => EMPTY_ROOT_HASH,
        }
    }

    /// Persists every dirty node and returns the root hash. The root is replaced by its hash
    /// reference.
    ///
    /// `on_leaf` is called for every value embedded in a persisted node, together with the hash
    /// of that node, before this method returns.
    pub fn commit(&mut self, on_leaf: Option<LeafCallback>) -> Result<B256, TrieError> {
        let Some(root) = &mut self.root else { return Ok(EMPTY_ROOT_HASH) };
        let root_hash = self.hasher.root_hash(root);

        let committed = self.pool.commit(root, self.db.as_ref(), true, on_leaf)?;
        debug_assert_eq!(committed, Node::Hash(root_hash));
        self.root = Some(Node::Hash(root_hash));
        Ok(root_hash)
    }
}

/// A leaf holding `value` at `path`.
fn leaf(path: Nibbles, value: Bytes) -> Node {
    ShortNode::new(path, Node::Value(value)).into()
}

/// Places `child` under `path`. An empty path needs no short node unless the child is a value.
fn wrap(path: Nibbles, child: Node) -> Node {
    if path.is_empty() && !child.is_value() { child } else { ShortNode::new(path, child).into() }
}

/// Inserts `value` at `path` below `node`, returning whether anything changed. Every node on a
/// changed path is marked dirty and loses its cached hash.
fn insert(
    db: Option<&Database>,
    node: &mut Node,
    path: Nibbles,
    value: Bytes,
) -> Result<bool, TrieError> {
    match node {
        Node::Hash(hash) => {
            let hash = *hash;
            let mut resolved = db.ok_or(TrieError::MissingNode(hash))?.resolve(hash)?;
            let dirty = insert(db, &mut resolved, path, value)?;
            if dirty {
                *node = resolved;
            }
            Ok(dirty)
        }
        Node::Value(old) => {
            if path.is_empty() {
                if *old == value {
                    return Ok(false);
                }
                *old = value;
                return Ok(true);
            }
            let mut branch = BranchNode::new();
            branch.children[VALUE_SLOT] = Some(Node::Value(mem::take(old)));
            branch.children[usize::from(path.get_unchecked(0))] =
                Some(leaf(path.slice(1..), value));
            *node = branch.into();
            Ok(true)
        }
        Node::Branch(branch) => {
            let dirty = if path.is_empty() {
                match &mut branch.children[VALUE_SLOT] {
                    Some(Node::Value(old)) if *old == value => false,
                    slot => {
                        *slot = Some(Node::Value(value));
                        true
                    }
                }
            } else {
                match &mut branch.children[usize::from(path.get_unchecked(0))] {
                    Some(child) => insert(db, child, path.slice(1..), value)?,
                    slot => {
                        *slot = Some(leaf(path.slice(1..), value));
                        true
                    }
                }
            };
            if dirty {
                branch.flags = NodeFlag::dirty();
            }
            Ok(dirty)
        }
        Node::Short(short) => {
            let key = short.key;
            let matched = path.common_prefix_length(&key);

            if matched == key.len() {
                let dirty = insert(db, &mut short.val, path.slice(matched..), value)?;
                if dirty {
                    short.flags = NodeFlag::dirty();
                    if key.is_empty() && !short.val.is_value() {
                        // a leaf without a path that grew into a branch
                        let child = mem::replace(&mut short.val, Node::Value(Bytes::new()));
                        *node = child;
                    }
                }
                return Ok(dirty);
            }

            let mut branch = BranchNode::new();
            let old = mem::replace(&mut short.val, Node::Value(Bytes::new()));
            branch.children[usize::from(key.get_unchecked(matched))] =
                Some(wrap(key.slice(matched + 1..), old));
            if matched == path.len() {
                branch.children[VALUE_SLOT] = Some(Node::Value(value));
            } else {
                branch.children[usize::from(path.get_unchecked(matched))] =
                    Some(leaf(path.slice(matched + 1..), value));
            }
            *node = wrap(path.slice(..matched), branch.into());
            Ok(true)
        }
    }
}
