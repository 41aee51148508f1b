use alloy_primitives::B256;
use thiserror::Error;

/// Error type for trie operations.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrieError {
    /// A commit needed to persist a node but no node store was configured.
    #[error("no node store configured to commit into")]
    MissingStore,

    /// A hash reference could not be resolved from the node store.
    #[error("missing trie node {0}")]
    MissingNode(
        /// The hash of the unresolved node
        B256,
    ),

    /// Error when a key is longer than the trie supports
    #[error("key of {0} bytes exceeds the maximum of 32 bytes")]
    KeyTooLong(
        /// The length of the rejected key in bytes
        usize,
    ),

    /// Error when inserting an empty value
    #[error("empty values cannot be stored")]
    EmptyValue,

    /// Error during RLP decoding of a stored node
    #[error("RLP error: {0}")]
    Rlp(
        /// The underlying RLP error
        #[from]
        alloy_rlp::Error,
    ),
}
