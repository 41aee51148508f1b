use super::{Committer, LEAF_CHANNEL_CAPACITY, LeafCallback, LeafPipeline};
use crate::{Database, TrieError, nodes::Node};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Tuning knobs of a [CommitterPool].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Maximum number of idle committers kept for reuse.
    pub max_idle: usize,
    /// Capacity of the queue between a committer and its leaf consumer.
    pub leaf_channel_capacity: usize,
    /// Initial capacity of a committer's scratch encoding buffer. A full branch encodes to at
    /// most 532 bytes.
    pub scratch_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_idle: 16, leaf_channel_capacity: LEAF_CHANNEL_CAPACITY, scratch_capacity: 550 }
    }
}

impl PoolConfig {
    /// Sets the maximum number of idle committers.
    pub const fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Sets the leaf queue capacity.
    pub const fn with_leaf_channel_capacity(mut self, capacity: usize) -> Self {
        self.leaf_channel_capacity = capacity;
        self
    }

    /// Sets the initial scratch buffer capacity.
    pub const fn with_scratch_capacity(mut self, capacity: usize) -> Self {
        self.scratch_capacity = capacity;
        self
    }
}

/// A bounded set of idle [Committer]s, reused across commits to keep their scratch buffers and
/// hash states.
#[derive(Debug, Default)]
pub struct CommitterPool {
    idle: Mutex<Vec<Committer>>,
    config: PoolConfig,
}

impl CommitterPool {
    /// Creates an empty pool.
    pub fn new(config: PoolConfig) -> Self {
        Self { idle: Mutex::new(Vec::with_capacity(config.max_idle)), config }
    }

    /// Returns the configuration of the pool.
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of idle committers.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    /// Takes an idle committer, or creates one, and wires it to `on_leaf`.
    ///
    /// With a callback the committer gets a fresh [LeafPipeline] whose consumer still has to be
    /// started with [Committer::start], against the same store the commit writes into.
    pub fn get(&self, on_leaf: Option<LeafCallback>) -> Committer {
        let mut committer = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| Committer::new(self.config.scratch_capacity));
        committer.reset_stored();
        if let Some(on_leaf) = on_leaf {
            committer.attach(LeafPipeline::new(self.config.leaf_channel_capacity, on_leaf));
        }
        committer
    }

    /// Returns a committer to the pool, closing its pipeline first. The committer is dropped if
    /// the pool is full.
    pub fn put(&self, mut committer: Committer) {
        committer.detach();
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_idle {
            idle.push(committer);
        }
    }

    /// Commits `root` into `db`.
    ///
    /// Borrows a committer, starts its leaf consumer if `on_leaf` is set, commits the tree and
    /// waits for every persisted node to be written and reported before returning.
    pub fn commit(
        &self,
        root: &mut Node,
        db: Option<&Arc<Database>>,
        force: bool,
        on_leaf: Option<LeafCallback>,
    ) -> Result<Node, TrieError> {
        let mut committer = self.get(on_leaf);
        if let Some(db) = db {
            committer.start(Arc::clone(db));
        }
        let result = committer.commit(root, db.map(|db| &**db), force);
        let stored = committer.stored();
        self.put(committer);

        match &result {
            Ok(committed) => debug!(
                target: "trie::committer",
                root = ?committed.as_hash(),
                stored,
                "committed trie"
            ),
            Err(err) => debug!(target: "trie::committer", %err, stored, "commit failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Hasher, nodes::ShortNode};
    use alloy_primitives::{B256, Bytes};
    use nybbles::Nibbles;

    fn counter() -> (Arc<Mutex<usize>>, LeafCallback) {
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        let on_leaf: LeafCallback = Box::new(move |_: &[u8], _: B256| *sink.lock() += 1);
        (count, on_leaf)
    }

    fn hashed_leaf(key: u8) -> Node {
        let mut leaf: Node =
            ShortNode::new(Nibbles::unpack([key; 20]), Node::Value(Bytes::from(vec![key; 40])))
                .into();
        Hasher::default().root_hash(&mut leaf);
        leaf
    }

    #[test]
    fn default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_idle, 16);
        assert_eq!(config.leaf_channel_capacity, 200);
        assert_eq!(config.scratch_capacity, 550);

        let config =
            config.with_max_idle(1).with_leaf_channel_capacity(1).with_scratch_capacity(64);
        let expected = PoolConfig { max_idle: 1, leaf_channel_capacity: 1, scratch_capacity: 64 };
        assert_eq!(config, expected);
    }

    #[test]
    fn idle_committers_are_bounded() {
        let pool = CommitterPool::new(PoolConfig::default().with_max_idle(2));
        let committers = [pool.get(None), pool.get(None), pool.get(None)];
        for committer in committers {
            pool.put(committer);
        }
        assert_eq!(pool.idle_len(), 2);

        let _reused = pool.get(None);
        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn released_committer_forgets_its_callback() {
        let pool = CommitterPool::new(PoolConfig::default().with_max_idle(1));
        let db = Arc::new(Database::new());

        let (first, on_leaf) = counter();
        pool.commit(&mut hashed_leaf(1), Some(&db), true, Some(on_leaf)).unwrap();
        assert_eq!(*first.lock(), 1);
        assert_eq!(pool.idle_len(), 1);

        let (second, on_leaf) = counter();
        pool.commit(&mut hashed_leaf(2), Some(&db), true, Some(on_leaf)).unwrap();
        assert_eq!(*first.lock(), 1);
        assert_eq!(*second.lock(), 1);

        let committer = pool.get(None);
        assert!(!committer.has_pipeline());
        pool.put(committer);

        pool.commit(&mut hashed_leaf(3), Some(&db), true, None).unwrap();
        assert_eq!((*first.lock(), *second.lock()), (1, 1));
        assert_eq!(db.writes(), 3);
        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn missing_store_is_reported() {
        let pool = CommitterPool::default();
        let (count, on_leaf) = counter();
        let mut root = hashed_leaf(1);
        let before = root.clone();

        let err = pool.commit(&mut root, None, true, Some(on_leaf)).unwrap_err();
        assert!(matches!(err, TrieError::MissingStore));
        assert_eq!(root, before);
        assert_eq!(*count.lock(), 0);
        assert_eq!(pool.idle_len(), 1);
    }
}
