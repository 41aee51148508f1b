//! Approximate encoded size of a node, used for memory accounting in the node store.

use crate::nodes::{CHILD_INDEX_RANGE, Node};

/// Estimates the size of the canonical encoding of `node` without encoding it.
///
/// The estimate walks embedded children recursively and charges three bytes of list overhead per
/// structural node. Short nodes with small children are over-estimated by a few bytes. The value
/// slot of a branch is not counted.
pub fn estimate_size(node: &Node) -> usize {
    match node {
        Node::Short(short) => 3 + short.compact_key_len() + estimate_size(&short.val),
        Node::Branch(branch) => {
            3 + branch.children[CHILD_INDEX_RANGE]
                .iter()
                .map(|child| child.as_ref().map_or(1, estimate_size))
                .sum::<usize>()
        }
        Node::Value(value) => 1 + value.len(),
        Node::Hash(hash) => 1 + hash.len(),
    }
}
