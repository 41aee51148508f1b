//! Ordered hand-off of persisted nodes to a background writer that reports leaves.

use crate::{Database, nodes::Node};
use alloy_primitives::B256;
use core::fmt;
use crossbeam_channel::{Receiver, Sender};
use std::{
    panic,
    sync::Arc,
    thread::{self, JoinHandle},
};
use tracing::trace;

/// Default number of records that may be queued before the committer blocks.
pub const LEAF_CHANNEL_CAPACITY: usize = 200;

/// Callback invoked with every value embedded in a persisted node and the hash of that node.
pub type LeafCallback = Box<dyn FnMut(&[u8], B256) + Send + 'static>;

/// A node ready to be written, as handed from the committer to the consumer thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafRecord {
    /// Estimated encoded size of the node.
    pub size: usize,
    /// Hash the node is stored under.
    pub hash: B256,
    /// The collapsed node.
    pub node: Node,
    /// Whether any child of the node was a raw value when it was committed.
    pub has_value_children: bool,
}

/// A bounded FIFO queue drained by exactly one consumer thread.
///
/// The consumer writes every record into the node store and reports embedded values to the
/// callback, one record at a time, in the order the records were sent. Closing the pipeline (or
/// dropping it) ends the input and waits for the consumer to drain the queue.
pub struct LeafPipeline {
    sender: Option<Sender<LeafRecord>>,
    pending: Option<(Receiver<LeafRecord>, LeafCallback)>,
    consumer: Option<JoinHandle<()>>,
}

impl fmt::Debug for LeafPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafPipeline")
            .field("queued", &self.sender.as_ref().map(Sender::len))
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl LeafPipeline {
    /// Creates a pipeline holding up to `capacity` queued records. The consumer is not running
    /// until [LeafPipeline::start] is called.
    pub fn new(capacity: usize, on_leaf: LeafCallback) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self { sender: Some(sender), pending: Some((receiver, on_leaf)), consumer: None }
    }

    /// Spawns the consumer thread writing into `db`. Does nothing if it was started before.
    pub fn start(&mut self, db: Arc<Database>) {
        let Some((receiver, on_leaf)) = self.pending.take() else { return };
        self.consumer = Some(thread::spawn(move || consume(receiver, &db, on_leaf)));
    }

    /// Returns `true` if the consumer is running and input is still accepted.
    pub fn is_active(&self) -> bool {
        self.consumer.is_some() && self.sender.is_some()
    }

    /// Queues a record, blocking while the queue is full.
    pub fn send(&self, record: LeafRecord) {
        let Some(sender) = &self.sender else { return };
        // A disconnected channel means the consumer panicked; the panic surfaces on close.
        let _ = sender.send(record);
    }

    /// Ends the input and waits for the consumer to finish the queued records.
    ///
    /// A panic raised on the consumer thread is resumed on the calling thread.
    pub fn close(&mut self) {
        self.sender = None;
        self.pending = None;
        if let Some(consumer) = self.consumer.take() {
            if let Err(panic) = consumer.join() {
                panic::resume_unwind(panic);
            }
        }
    }
}

impl Drop for LeafPipeline {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(consumer) = self.consumer.take() {
            let result = consumer.join();
            if let Err(panic) = result {
                if !thread::panicking() {
                    panic::resume_unwind(panic);
                }
            }
        }
    }
}

fn consume(receiver: Receiver<LeafRecord>, db: &Database, mut on_leaf: LeafCallback) {
    for LeafRecord { size, hash, node, has_value_children } in receiver {
        let values = if has_value_children { node.embedded_values() } else { Default::default() };
        db.lock().insert(hash, size, node);

        for value in values {
            trace!(target: "trie::committer", ?hash, len = value.len(), "reporting leaf");
            on_leaf(&value, hash);
        }
    }
}
