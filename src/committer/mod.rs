//! Collapsing of dirty subtrees into hash references and their persistence into a node store.
//!
//! A [Committer] walks a hashed trie bottom-up, writes every node that is large enough to be
//! referenced by hash and rewrites the tree in place so that committed nodes are clean. When a
//! leaf callback is configured the writes go through a [LeafPipeline], whose consumer thread
//! reports every persisted value in commit order.

use crate::{
    Database, TrieError,
    hasher::keccak_with,
    nodes::{BRANCH_SLOTS, BranchNode, INLINE_THRESHOLD, Node, VALUE_SLOT},
    size::estimate_size,
};
use alloy_rlp::Encodable;
use core::fmt;
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tracing::trace;

mod pipeline;
pub use pipeline::{LEAF_CHANNEL_CAPACITY, LeafCallback, LeafPipeline, LeafRecord};

mod pool;
pub use pool::{CommitterPool, PoolConfig};

/// Reusable commit state: a scratch encoding buffer, a keccak state and the leaf pipeline of the
/// current commit, if any.
pub struct Committer {
    tmp: Vec<u8>,
    sha: Keccak256,
    pipeline: Option<LeafPipeline>,
    stored: usize,
}

impl fmt::Debug for Committer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Committer")
            .field("tmp_capacity", &self.tmp.capacity())
            .field("pipeline", &self.pipeline)
            .field("stored", &self.stored)
            .finish_non_exhaustive()
    }
}

impl Committer {
    /// Creates a committer whose scratch buffer starts with `scratch_capacity` bytes.
    pub fn new(scratch_capacity: usize) -> Self {
        Self {
            tmp: Vec::with_capacity(scratch_capacity),
            sha: Keccak256::new(),
            pipeline: None,
            stored: 0,
        }
    }

    /// Routes writes through `pipeline` until [Committer::detach] is called.
    pub fn attach(&mut self, pipeline: LeafPipeline) {
        self.detach();
        self.pipeline = Some(pipeline);
    }

    /// Starts the consumer of the attached pipeline, if any.
    ///
    /// The consumer writes into `db`, which must be the store later passed to
    /// [Committer::commit]. Committing with an attached pipeline that was never started is a
    /// bug: debug builds panic, release builds write straight to the store and the callback
    /// never fires.
    pub fn start(&mut self, db: Arc<Database>) {
        if let Some(pipeline) = &mut self.pipeline {
            pipeline.start(db);
        }
    }

    /// Closes the attached pipeline, waiting for every queued node to be written and reported.
    pub fn detach(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.close();
        }
    }

    /// Returns `true` if a leaf pipeline is attached.
    pub fn has_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Number of nodes handed to the store since the counter was last reset.
    pub const fn stored(&self) -> usize {
        self.stored
    }

    pub(crate) fn reset_stored(&mut self) {
        self.stored = 0;
    }

    /// Commits `node` and returns the form its parent should hold: a hash reference if the node
    /// was persisted, the collapsed node if it is small enough to stay embedded.
    ///
    /// Nodes that are already clean are returned as hash references without being visited. Every
    /// node that gets persisted is marked clean in place.
    ///
    /// Writes already made for sibling subtrees are kept when an error is returned.
    pub fn commit(
        &mut self,
        node: &mut Node,
        db: Option<&Database>,
        force: bool,
    ) -> Result<Node, TrieError> {
        if let (Some(hash), false) = node.cache() {
            return Ok(Node::Hash(hash));
        }
        if db.is_none() {
            return Err(TrieError::MissingStore);
        }
        debug_assert!(
            self.pipeline.as_ref().is_none_or(LeafPipeline::is_active),
            "leaf pipeline attached but not started"
        );

        let (collapsed, has_value_children) = match node {
            Node::Short(short) => {
                let val = if short.val.is_value() {
                    short.val.clone()
                } else {
                    self.commit(&mut short.val, db, false)?
                };
                (short.collapsed(val).into(), true)
            }
            Node::Branch(branch) => {
                let (children, has_value_children) = self.commit_children(branch, db)?;
                (branch.collapsed(children).into(), has_value_children)
            }
            Node::Value(_) => (node.clone(), false),
            Node::Hash(hash) => return Ok(Node::Hash(*hash)),
        };

        let stored = self.store(collapsed, db, force, has_value_children);
        if stored.is_hash() {
            if let Some(flags) = node.flags_mut() {
                flags.dirty = false;
            }
        }
        Ok(stored)
    }

    /// Commits the nibble-keyed children of a branch in ascending order. The value slot is kept
    /// as it is.
    fn commit_children(
        &mut self,
        branch: &mut BranchNode,
        db: Option<&Database>,
    ) -> Result<([Option<Node>; BRANCH_SLOTS], bool), TrieError> {
        let mut children: [Option<Node>; BRANCH_SLOTS] = Default::default();
        let mut has_value_children = false;

        for (index, child) in branch.children.iter_mut().enumerate() {
            let Some(child) = child else { continue };
            let committed =
                if index == VALUE_SLOT { child.clone() } else { self.commit(child, db, false)? };
            has_value_children |= committed.is_value();
            children[index] = Some(committed);
        }
        Ok((children, has_value_children))
    }

    /// Persists a collapsed node and returns its hash reference, or returns the node unchanged if
    /// it is embedded into its parent.
    ///
    /// Structural nodes rely on the hash cached by the [Hasher](crate::Hasher); one without a
    /// cached hash was too small to be hashed, and the size recorded for them is estimated.
    /// Values are hashed here and recorded with their encoded length.
    fn store(
        &mut self,
        node: Node,
        db: Option<&Database>,
        force: bool,
        has_value_children: bool,
    ) -> Node {
        let (hash, size) = if let Some(hash) = node.cached_hash() {
            (hash, estimate_size(&node))
        } else if node.is_value() {
            self.tmp.clear();
            node.encode(&mut self.tmp);
            if self.tmp.len() < INLINE_THRESHOLD && !force {
                return node;
            }
            (keccak_with(&mut self.sha, &self.tmp), self.tmp.len())
        } else {
            return node;
        };

        self.stored += 1;
        trace!(target: "trie::committer", ?hash, size, has_value_children, "storing node");

        match &self.pipeline {
            Some(pipeline) if pipeline.is_active() => {
                pipeline.send(LeafRecord { size, hash, node, has_value_children })
            }
            _ => {
                if let Some(db) = db {
                    db.lock().insert(hash, size, node);
                }
            }
        }
        Node::Hash(hash)
    }
}
