use super::{BRANCH_SLOTS, BranchNode, Node, ShortNode, VALUE_SLOT, decode_compact_path};
use alloy_primitives::{B256, Bytes};
use alloy_rlp::{BufMut, EMPTY_STRING_CODE, Encodable, Error, Header};
use smallvec::SmallVec;

impl Encodable for Node {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            Self::Branch(branch) => branch.encode(out),
            Self::Short(short) => short.encode(out),
            Self::Value(value) => value.encode(out),
            Self::Hash(hash) => hash.encode(out),
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Branch(branch) => branch.length(),
            Self::Short(short) => short.length(),
            Self::Value(value) => value.length(),
            Self::Hash(hash) => hash.length(),
        }
    }
}

impl Node {
    /// Decodes a stored node encoding into its collapsed form.
    ///
    /// Children referenced by hash become [Node::Hash], embedded children are decoded in place.
    /// Every decoded node carries clean flags without a hash; the caller knows the hash the
    /// encoding was stored under and is responsible for recording it.
    pub fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let mut payload = Header::decode_bytes(buf, true)?;

        let mut items = SmallVec::<[&[u8]; BRANCH_SLOTS]>::new();
        while !payload.is_empty() {
            items.push(split_item(&mut payload)?);
        }

        match items.len() {
            2 => {
                let compact = Header::decode_bytes(&mut &items[0][..], false)?;
                let (key, is_leaf) =
                    decode_compact_path(compact).ok_or(Error::Custom("invalid compact path"))?;
                let val = if is_leaf {
                    Self::Value(decode_value(items[1])?)
                } else {
                    decode_reference(items[1])?
                };
                Ok(ShortNode { key, val, flags: Default::default() }.into())
            }
            BRANCH_SLOTS => {
                let mut branch = BranchNode::default();
                for (index, item) in items.iter().enumerate() {
                    if *item == [EMPTY_STRING_CODE] {
                        continue;
                    }
                    branch.children[index] = Some(if index == VALUE_SLOT {
                        Self::Value(decode_value(item)?)
                    } else {
                        decode_child(item)?
                    });
                }
                Ok(branch.into())
            }
            _ => Err(Error::Custom("invalid number of items in the list")),
        }
    }
}

/// Splits the next item off an RLP list payload, returning the item including its header.
fn split_item<'a>(payload: &mut &'a [u8]) -> alloy_rlp::Result<&'a [u8]> {
    let start = *payload;
    let header = Header::decode(payload)?;
    if payload.len() < header.payload_length {
        return Err(Error::InputTooShort);
    }
    *payload = &payload[header.payload_length..];
    Ok(&start[..start.len() - payload.len()])
}

fn decode_value(item: &[u8]) -> alloy_rlp::Result<Bytes> {
    Header::decode_bytes(&mut &item[..], false).map(Bytes::copy_from_slice)
}

/// Decodes the child of an extension: either a hash reference or an embedded node.
fn decode_reference(item: &[u8]) -> alloy_rlp::Result<Node> {
    let mut buf = item;
    if Header::decode(&mut buf)?.list {
        return Node::decode(&mut &item[..]);
    }
    let bytes = Header::decode_bytes(&mut &item[..], false)?;
    if bytes.len() != B256::len_bytes() {
        return Err(Error::UnexpectedLength);
    }
    Ok(Node::Hash(B256::from_slice(bytes)))
}

/// Decodes a nibble-keyed branch child. Strings shorter than a hash are values that were small
/// enough to stay embedded.
fn decode_child(item: &[u8]) -> alloy_rlp::Result<Node> {
    let mut buf = item;
    if Header::decode(&mut buf)?.list {
        return Node::decode(&mut &item[..]);
    }
    let bytes = Header::decode_bytes(&mut &item[..], false)?;
    Ok(if bytes.len() == B256::len_bytes() {
        Node::Hash(B256::from_slice(bytes))
    } else {
        Node::Value(Bytes::copy_from_slice(bytes))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;
    use nybbles::Nibbles;

    fn leaf(key: &[u8], value: &'static [u8]) -> Node {
        ShortNode {
            key: Nibbles::from_nibbles_unchecked(key),
            val: Node::Value(Bytes::from_static(value)),
            flags: Default::default(),
        }
        .into()
    }

    #[test]
    fn value_and_hash_encoding() {
        let value = Node::Value(Bytes::from_static(b"dog"));
        assert_eq!(alloy_rlp::encode(&value), hex!("83646f67"));
        assert_eq!(value.length(), 4);

        let hash = Node::Hash(B256::repeat_byte(0x42));
        let rlp = alloy_rlp::encode(&hash);
        assert_eq!(rlp.len(), 33);
        assert_eq!(rlp[0], EMPTY_STRING_CODE + 32);
    }

    #[test]
    fn decode_leaf() {
        let rlp = hex!("c98320646f8476657262");
        let node = Node::decode(&mut &rlp[..]).unwrap();
        assert_eq!(node, leaf(&hex!("0604060f"), b"verb"));
        assert_eq!(alloy_rlp::encode(&node), rlp);
    }

    #[test]
    fn decode_branch_with_mixed_children() {
        let mut branch = BranchNode::default();
        branch.children[1] = Some(Node::Hash(B256::repeat_byte(0x11)));
        branch.children[4] = Some(leaf(&hex!("0f"), b"verb"));
        branch.children[9] = Some(Node::Value(Bytes::from_static(b"inline")));
        branch.children[VALUE_SLOT] = Some(Node::Value(Bytes::from_static(b"terminal")));
        let node = Node::from(branch);

        let rlp = alloy_rlp::encode(&node);
        let decoded = Node::decode(&mut &rlp[..]).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn decode_extension() {
        let extension: Node = ShortNode {
            key: Nibbles::from_nibbles_unchecked(hex!("0102")),
            val: Node::Hash(B256::repeat_byte(0x77)),
            flags: Default::default(),
        }
        .into();
        let rlp = alloy_rlp::encode(&extension);
        assert_eq!(Node::decode(&mut &rlp[..]).unwrap(), extension);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        // three items
        let rlp = hex!("c3010203");
        assert_eq!(
            Node::decode(&mut &rlp[..]),
            Err(Error::Custom("invalid number of items in the list"))
        );

        // not a list
        let rlp = hex!("83646f67");
        assert_eq!(Node::decode(&mut &rlp[..]), Err(Error::UnexpectedString));

        // extension pointing at a short string
        let rlp = hex!("c482001201");
        assert_eq!(Node::decode(&mut &rlp[..]), Err(Error::UnexpectedLength));

        // invalid compact prefix
        let rlp = hex!("c482401201");
        assert_eq!(Node::decode(&mut &rlp[..]), Err(Error::Custom("invalid compact path")));
    }
}
