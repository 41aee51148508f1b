use super::{BRANCH_SLOTS, CHILD_INDEX_RANGE, Node, NodeFlag, VALUE_SLOT};
use alloy_rlp::{BufMut, EMPTY_STRING_CODE, Encodable, Header, length_of_length};

/// A branch node in a Merkle Patricia Trie is a 17-element array consisting of 16 slots that
/// correspond to each hexadecimal character and an additional slot for the value of a key that
/// terminates at this node.
///
/// [Default] yields an empty branch with clean flags, as produced when decoding a stored node;
/// use [BranchNode::new] for a branch created by a mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BranchNode {
    /// Children keyed by nibble, followed by the value slot.
    pub children: [Option<Node>; BRANCH_SLOTS],
    /// Cached hash and dirty marker.
    pub flags: NodeFlag,
}

impl BranchNode {
    /// Creates an empty, dirty branch node.
    pub fn new() -> Self {
        Self { children: Default::default(), flags: NodeFlag::dirty() }
    }

    /// Creates a copy of this branch holding `children` in place of its own, keeping the flags.
    pub fn collapsed(&self, children: [Option<Node>; BRANCH_SLOTS]) -> Self {
        Self { children, flags: self.flags }
    }

    /// Returns the value stored in the value slot, if any.
    pub fn value(&self) -> Option<&Node> {
        self.children[VALUE_SLOT].as_ref()
    }

    /// Returns an iterator over the occupied nibble-keyed slots, in ascending order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.children[CHILD_INDEX_RANGE]
            .iter()
            .enumerate()
            .filter_map(|(index, child)| child.as_ref().map(|child| (index, child)))
    }

    /// Returns the length of RLP encoded fields of branch node.
    fn rlp_payload_length(&self) -> usize {
        self.children.iter().map(|child| child.as_ref().map_or(1, Encodable::length)).sum()
    }
}

/// Encode it as a 17-element list: an empty string for every vacant slot, otherwise the
/// encoding of the child, which is either a hash reference or an embedded node.
impl Encodable for BranchNode {
    fn encode(&self, out: &mut dyn BufMut) {
        Header { list: true, payload_length: self.rlp_payload_length() }.encode(out);
        for child in &self.children {
            match child {
                Some(child) => child.encode(out),
                None => out.put_u8(EMPTY_STRING_CODE),
            }
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.rlp_payload_length();
        payload_length + length_of_length(payload_length)
    }
}
