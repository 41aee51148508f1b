//! Bottom-up hashing of dirty subtrees.

use crate::nodes::{INLINE_THRESHOLD, Node, VALUE_SLOT};
use alloy_primitives::B256;
use alloy_rlp::Encodable;
use core::fmt;
use sha3::{Digest, Keccak256};
use tracing::trace;

/// Hashes `data` with a reusable keccak state, leaving the state reset for the next use.
pub(crate) fn keccak_with(sha: &mut Keccak256, data: &[u8]) -> B256 {
    sha.update(data);
    B256::from_slice(&sha.finalize_reset())
}

/// Computes node hashes, caching them on the nodes they belong to.
///
/// Each structural node whose encoding is at least 32 bytes gets its hash recorded in its
/// [NodeFlag](crate::nodes::NodeFlag). The dirty marker is left untouched: a hashed node still
/// has to be committed.
pub struct Hasher {
    tmp: Vec<u8>,
    sha: Keccak256,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hasher").field("tmp_capacity", &self.tmp.capacity()).finish_non_exhaustive()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self { tmp: Vec::with_capacity(550), sha: Keccak256::new() }
    }
}

impl Hasher {
    /// Collapses `node` and returns the form its parent embeds: a hash reference when the
    /// encoding is at least 32 bytes long or `force` is set, the collapsed node otherwise.
    ///
    /// Nodes that already carry a hash are not visited again.
    pub fn hash(&mut self, node: &mut Node, force: bool) -> Node {
        if let Some(hash) = node.cached_hash() {
            return Node::Hash(hash);
        }

        let collapsed = match node {
            Node::Short(short) => {
                let val = match &mut short.val {
                    val @ (Node::Short(_) | Node::Branch(_)) => self.hash(val, false),
                    val => val.clone(),
                };
                short.collapsed(val).into()
            }
            Node::Branch(branch) => {
                let mut children: [Option<Node>; 17] = Default::default();
                for (index, child) in branch.children.iter_mut().enumerate() {
                    let Some(child) = child else { continue };
                    children[index] =
                        Some(if index == VALUE_SLOT { child.clone() } else { self.hash(child, false) });
                }
                branch.collapsed(children).into()
            }
            Node::Value(_) => node.clone(),
            Node::Hash(_) => return node.clone(),
        };

        self.tmp.clear();
        collapsed.encode(&mut self.tmp);
        if self.tmp.len() < INLINE_THRESHOLD && !force {
            return collapsed;
        }

        let hash = keccak_with(&mut self.sha, &self.tmp);
        trace!(target: "trie::hasher", ?hash, len = self.tmp.len(), "hashed node");
        if let Some(flags) = node.flags_mut() {
            flags.hash = Some(hash);
        }
        Node::Hash(hash)
    }

    /// Hashes the root of a trie. The root is always referenced by hash, however small.
    pub fn root_hash(&mut self, root: &mut Node) -> B256 {
        match self.hash(root, true) {
            Node::Hash(hash) => hash,
            collapsed => {
                self.tmp.clear();
                collapsed.encode(&mut self.tmp);
                keccak_with(&mut self.sha, &self.tmp)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{BranchNode, ShortNode};
    use alloy_primitives::{Bytes, keccak256};
    use nybbles::Nibbles;

    #[test]
    fn keccak_state_is_reusable() {
        let mut sha = Keccak256::new();
        assert_eq!(keccak_with(&mut sha, b"dog"), keccak256(b"dog"));
        assert_eq!(keccak_with(&mut sha, b"puppy"), keccak256(b"puppy"));
    }

    #[test]
    fn small_nodes_stay_inline() {
        let mut hasher = Hasher::default();
        let mut leaf: Node =
            ShortNode::new(Nibbles::unpack(b"a"), Node::Value(Bytes::from_static(b"b"))).into();

        let collapsed = hasher.hash(&mut leaf, false);
        assert!(!collapsed.is_hash());
        assert_eq!(leaf.cache(), (None, true));

        let hash = hasher.hash(&mut leaf, true);
        assert_eq!(hash, Node::Hash(keccak256(alloy_rlp::encode(&leaf))));
        assert_eq!(leaf.cache(), (hash.as_hash(), true));
    }

    #[test]
    fn large_children_are_referenced_by_hash() {
        let mut hasher = Hasher::default();
        let big = Bytes::from(vec![0xaa; 40]);
        let small = Bytes::from_static(b"tiny");

        let mut branch = BranchNode::new();
        branch.children[0] = Some(Node::Value(big.clone()));
        branch.children[3] =
            Some(ShortNode::new(Nibbles::unpack([0x12; 20]), Node::Value(big.clone())).into());
        branch.children[5] = Some(Node::Value(small.clone()));
        branch.children[VALUE_SLOT] = Some(Node::Value(big.clone()));
        let mut root = Node::from(branch);

        let root_hash = hasher.root_hash(&mut root);

        let Node::Branch(branch) = &root else { unreachable!() };
        let leaf_hash = branch.children[3].as_ref().unwrap().cached_hash().unwrap();

        let mut expected = BranchNode::new();
        expected.children[0] = Some(Node::Hash(keccak256(alloy_rlp::encode(&big))));
        expected.children[3] = Some(Node::Hash(leaf_hash));
        expected.children[5] = Some(Node::Value(small));
        expected.children[VALUE_SLOT] = Some(Node::Value(big));
        assert_eq!(root_hash, keccak256(alloy_rlp::encode(&expected)));
        assert_eq!(root.cache(), (Some(root_hash), true));
    }
}
