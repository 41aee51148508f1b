use super::{Node, NodeFlag, compact_len, encode_path_leaf};
use alloy_rlp::{BufMut, Encodable, Header, length_of_length};
use nybbles::Nibbles;

/// A node holding a path segment (a shared prefix of keys) and a single child.
///
/// When the child is a [Node::Value] the node is a leaf and the path is the remainder of the key.
/// Otherwise the node is an extension: a shortcut within the trie that collapses a chain of
/// single-child branches into one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortNode {
    /// The path segment, one nibble per element.
    pub key: Nibbles,
    /// The child: a value for leaves, a branch or a hash reference for extensions.
    pub val: Node,
    /// Cached hash and dirty marker.
    pub flags: NodeFlag,
}

impl ShortNode {
    /// Creates a new dirty short node.
    pub fn new(key: Nibbles, val: Node) -> Self {
        Self { key, val, flags: NodeFlag::dirty() }
    }

    /// Returns `true` if the child is a value.
    pub const fn is_leaf(&self) -> bool {
        self.val.is_value()
    }

    /// Creates a copy of this node holding `val` as its child, keeping the key and the flags.
    pub fn collapsed(&self, val: Node) -> Self {
        Self { key: self.key, val, flags: self.flags }
    }

    /// Length of the key in its compact on-disk form.
    pub fn compact_key_len(&self) -> usize {
        compact_len(self.key.len())
    }

    /// Returns the length of RLP encoded fields of the node.
    fn rlp_payload_length(&self, compact_key: &[u8]) -> usize {
        compact_key.length() + self.val.length()
    }
}

/// Encoded as the 2-item list `[compact(key), child]`. The leaf flag of the compact key is
/// derived from the kind of the child.
impl Encodable for ShortNode {
    fn encode(&self, out: &mut dyn BufMut) {
        let compact_key = encode_path_leaf(&self.key, self.is_leaf());
        Header { list: true, payload_length: self.rlp_payload_length(&compact_key) }.encode(out);
        compact_key.as_slice().encode(out);
        self.val.encode(out);
    }

    fn length(&self) -> usize {
        let compact_key = encode_path_leaf(&self.key, self.is_leaf());
        let payload_length = self.rlp_payload_length(&compact_key);
        payload_length + length_of_length(payload_length)
    }
}
