//! In-memory trie nodes and their canonical encoding.

use alloy_primitives::{B256, Bytes};
use core::ops::Range;
use nybbles::Nibbles;
use smallvec::{SmallVec, smallvec};

mod branch;
pub use branch::BranchNode;

mod short;
pub use short::ShortNode;

mod rlp;

/// The range of child indexes keyed by a nibble.
pub const CHILD_INDEX_RANGE: Range<usize> = 0..16;

/// Index of the branch slot holding the value of a key that terminates at the branch.
pub const VALUE_SLOT: usize = 16;

/// Number of slots in a branch node.
pub const BRANCH_SLOTS: usize = 17;

/// Nodes whose encoding is shorter than this are embedded into their parent instead of being
/// referenced by hash.
pub const INLINE_THRESHOLD: usize = 32;

/// Cached hash and dirty marker carried by the structural node variants.
///
/// A node with a cached hash that is not dirty is identical to what the node store already holds
/// under that hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeFlag {
    /// Hash of the node's encoding, if it has been computed and the node is large enough to be
    /// referenced by hash.
    pub hash: Option<B256>,
    /// Whether the node changed since it was last persisted.
    pub dirty: bool,
}

impl NodeFlag {
    /// Flags for a freshly created or modified node.
    pub const fn dirty() -> Self {
        Self { hash: None, dirty: true }
    }

    /// Flags for a node loaded from the store under `hash`.
    pub const fn persisted(hash: B256) -> Self {
        Self { hash: Some(hash), dirty: false }
    }
}

/// A node of the in-memory trie.
///
/// - [Node::Branch] has 16 children keyed by nibble plus a value slot.
/// - [Node::Short] holds a path segment and a single child. It is a leaf when the child is a
///   [Node::Value] and an extension otherwise.
/// - [Node::Value] is the payload stored at a key.
/// - [Node::Hash] references a node that has already been persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// A 17-slot branch.
    Branch(Box<BranchNode>),
    /// An extension or leaf carrying a key fragment.
    Short(Box<ShortNode>),
    /// A raw value.
    Value(Bytes),
    /// A reference to a persisted node.
    Hash(B256),
}

impl Node {
    /// Returns the cached hash and the dirty marker of the node.
    ///
    /// Values and hash references carry no cache and always report `(None, true)`.
    pub fn cache(&self) -> (Option<B256>, bool) {
        match self {
            Self::Branch(branch) => (branch.flags.hash, branch.flags.dirty),
            Self::Short(short) => (short.flags.hash, short.flags.dirty),
            Self::Value(_) | Self::Hash(_) => (None, true),
        }
    }

    /// Returns `true` if the node is already in sync with the store.
    pub fn is_clean(&self) -> bool {
        matches!(self.cache(), (Some(_), false))
    }

    /// Returns the cached hash of a structural node, regardless of its dirty marker.
    pub fn cached_hash(&self) -> Option<B256> {
        self.cache().0
    }

    /// Returns the flags of a structural node.
    pub fn flags_mut(&mut self) -> Option<&mut NodeFlag> {
        match self {
            Self::Branch(branch) => Some(&mut branch.flags),
            Self::Short(short) => Some(&mut short.flags),
            Self::Value(_) | Self::Hash(_) => None,
        }
    }

    /// Returns `true` if this is a [Node::Value].
    pub const fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Returns `true` if this is a [Node::Hash].
    pub const fn is_hash(&self) -> bool {
        matches!(self, Self::Hash(_))
    }

    /// Returns the referenced hash if this is a [Node::Hash].
    pub const fn as_hash(&self) -> Option<B256> {
        match self {
            Self::Hash(hash) => Some(*hash),
            _ => None,
        }
    }

    /// Returns the raw values embedded directly in this node: the value of a leaf, or the values
    /// sitting in the nibble-keyed slots of a branch, in ascending slot order.
    pub fn embedded_values(&self) -> SmallVec<[Bytes; 2]> {
        match self {
            Self::Short(short) => match &short.val {
                Self::Value(value) => smallvec![value.clone()],
                _ => SmallVec::new(),
            },
            Self::Branch(branch) => branch.children[CHILD_INDEX_RANGE]
                .iter()
                .filter_map(|child| match child {
                    Some(Self::Value(value)) => Some(value.clone()),
                    _ => None,
                })
                .collect(),
            Self::Value(_) | Self::Hash(_) => SmallVec::new(),
        }
    }
}

impl From<ShortNode> for Node {
    fn from(node: ShortNode) -> Self {
        Self::Short(Box::new(node))
    }
}

impl From<BranchNode> for Node {
    fn from(node: BranchNode) -> Self {
        Self::Branch(Box::new(node))
    }
}

impl From<B256> for Node {
    fn from(hash: B256) -> Self {
        Self::Hash(hash)
    }
}

impl From<Bytes> for Node {
    fn from(value: Bytes) -> Self {
        Self::Value(value)
    }
}

/// Encodes a nibble path into its compact (hex-prefix) form.
///
/// The first nibble of the output carries the flags: bit 1 marks a leaf, bit 0 marks an odd
/// number of nibbles, in which case the first path nibble shares the flag byte.
pub fn encode_path_leaf(nibbles: &Nibbles, is_leaf: bool) -> SmallVec<[u8; 33]> {
    let len = nibbles.len();
    let mut compact = SmallVec::with_capacity(len / 2 + 1);
    let flag = if is_leaf { 0x20 } else { 0x00 };

    let mut i = 0;
    if len % 2 == 1 {
        compact.push(flag | 0x10 | nibbles.get_unchecked(0));
        i = 1;
    } else {
        compact.push(flag);
    }
    while i < len {
        compact.push((nibbles.get_unchecked(i) << 4) | nibbles.get_unchecked(i + 1));
        i += 2;
    }
    compact
}

/// Length in bytes of the compact encoding of a path with `nibbles` nibbles.
#[inline]
pub const fn compact_len(nibbles: usize) -> usize {
    nibbles / 2 + 1
}

/// Unpack a compact node path to nibbles, returning the path and whether it belongs to a leaf.
///
/// Returns `None` if the flag nibble is not one of the four valid prefixes, or if the path is
/// longer than 64 nibbles.
pub(crate) fn decode_compact_path(compact: &[u8]) -> Option<(Nibbles, bool)> {
    let (&head, rest) = compact.split_first()?;
    if rest.len() > B256::len_bytes() || (rest.len() == B256::len_bytes() && head & 0x10 != 0) {
        return None;
    }
    let (is_leaf, odd) = match head >> 4 {
        0 => (false, false),
        1 => (false, true),
        2 => (true, false),
        3 => (true, true),
        _ => return None,
    };
    let first = odd.then_some(head & 0x0f);
    Some((unpack_path_to_nibbles(first, rest), is_leaf))
}

/// Unpack node path to nibbles.
///
/// `first` is the first nibble of the path if the path is odd, `rest` holds the remaining nibbles
/// packed two per byte.
pub(crate) fn unpack_path_to_nibbles(first: Option<u8>, rest: &[u8]) -> Nibbles {
    let mut nibbles = Vec::with_capacity(rest.len() * 2 + first.is_some() as usize);
    nibbles.extend(first);
    for byte in rest {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    Nibbles::from_nibbles_unchecked(nibbles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn compact_path_encoding() {
        let odd = Nibbles::from_nibbles_unchecked(hex!("0102030405"));
        assert_eq!(encode_path_leaf(&odd, false).as_slice(), hex!("112345"));
        assert_eq!(encode_path_leaf(&odd, true).as_slice(), hex!("312345"));

        let even = Nibbles::from_nibbles_unchecked(hex!("00010203"));
        assert_eq!(encode_path_leaf(&even, false).as_slice(), hex!("000123"));
        assert_eq!(encode_path_leaf(&even, true).as_slice(), hex!("200123"));

        assert_eq!(encode_path_leaf(&Nibbles::default(), true).as_slice(), hex!("20"));
        assert_eq!(compact_len(0), 1);
        assert_eq!(compact_len(5), 3);
    }

    #[test]
    fn compact_path_decoding() {
        let path = Nibbles::from_nibbles_unchecked(hex!("0f010c"));
        for is_leaf in [false, true] {
            let compact = encode_path_leaf(&path, is_leaf);
            assert_eq!(decode_compact_path(&compact), Some((path, is_leaf)));
        }
        assert_eq!(decode_compact_path(&hex!("4012")), None);
        assert_eq!(decode_compact_path(&[]), None);

        let mut longest = vec![0x20];
        longest.extend_from_slice(&[0xab; 32]);
        assert_eq!(decode_compact_path(&longest).map(|(path, _)| path.len()), Some(64));
        longest[0] = 0x3a;
        assert_eq!(decode_compact_path(&longest), None);
    }

    #[test]
    fn cache_reporting() {
        let value = Node::Value(Bytes::from_static(b"v"));
        assert_eq!(value.cache(), (None, true));
        assert!(!value.is_clean());

        let hash = B256::repeat_byte(0x11);
        let mut short: Node = ShortNode::new(Nibbles::default(), value).into();
        assert_eq!(short.cache(), (None, true));

        *short.flags_mut().unwrap() = NodeFlag::persisted(hash);
        assert!(short.is_clean());
        assert_eq!(short.cached_hash(), Some(hash));
        assert_eq!(Node::Hash(hash).cache(), (None, true));
    }

    #[test]
    fn embedded_values_of_branch() {
        let mut branch = BranchNode::default();
        branch.children[3] = Some(Node::Value(Bytes::from_static(b"three")));
        branch.children[1] = Some(Node::Value(Bytes::from_static(b"one")));
        branch.children[9] = Some(Node::Hash(B256::ZERO));
        branch.children[VALUE_SLOT] = Some(Node::Value(Bytes::from_static(b"terminal")));

        let values = Node::from(branch).embedded_values();
        assert_eq!(values.as_slice(), [Bytes::from_static(b"one"), Bytes::from_static(b"three")]);
    }
}
