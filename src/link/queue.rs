//! Outbound frame queue with sleeping-node holding.
//!
//! ```text
//! enqueue ─┬─ listening / no target ──────────────► ready ─► next_ready()
//!          └─ sleeping node ─► held[node] ─ awake ─►
//! ```
//!
//! The queue only stores frames. Releasing one frame at a time, after the
//! previous transaction is terminal, is done by the link layer.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::backpressure::QueueCapacity;
use crate::error::Result;
use crate::protocol::{DataFrame, NodeId};

/// A frame handed to the queue, tagged with the target's listening mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDataFrame {
    pub frame: DataFrame,
    /// False for sleeping (battery) nodes that must wake up first.
    pub is_listening: bool,
}

impl OutboundDataFrame {
    pub fn new(frame: DataFrame, is_listening: bool) -> Self {
        Self { frame, is_listening }
    }

    /// Frame for an always-listening target (or no target at all).
    pub fn listening(frame: DataFrame) -> Self {
        Self::new(frame, true)
    }

    /// Node this frame must wait for, if any.
    fn held_for(&self) -> Option<NodeId> {
        if self.is_listening {
            return None;
        }
        self.frame.target_node()
    }
}

/// Pending outbound frames.
#[derive(Debug)]
pub struct FrameQueue {
    ready: VecDeque<DataFrame>,
    held: HashMap<NodeId, VecDeque<DataFrame>>,
    awake: HashSet<NodeId>,
    capacity: QueueCapacity,
}

impl FrameQueue {
    pub fn new(capacity: QueueCapacity) -> Self {
        Self {
            ready: VecDeque::new(),
            held: HashMap::new(),
            awake: HashSet::new(),
            capacity,
        }
    }

    /// Reserve a slot and enqueue.
    ///
    /// Fails with `QueueFull` at capacity, and with `Protocol` for a frame
    /// too large to encode.
    pub fn enqueue(&mut self, frame: OutboundDataFrame) -> Result<()> {
        frame.frame.validate()?;
        self.capacity.try_reserve()?;
        self.enqueue_reserved(frame);
        Ok(())
    }

    /// Enqueue a frame whose slot was already reserved by an engine handle.
    pub fn enqueue_reserved(&mut self, frame: OutboundDataFrame) {
        match frame.held_for() {
            Some(node) if !self.awake.contains(&node) => {
                tracing::debug!(node, frame = frame.frame.name(), "holding frame until node wakes up");
                self.held.entry(node).or_default().push_back(frame.frame);
            }
            _ => self.ready.push_back(frame.frame),
        }
    }

    /// Mark a sleeping node awake and release its held frames in order.
    pub fn node_awake(&mut self, node: NodeId) {
        self.awake.insert(node);
        if let Some(frames) = self.held.remove(&node) {
            tracing::debug!(node, count = frames.len(), "node awake, releasing held frames");
            self.ready.extend(frames);
        }
    }

    /// Mark a node asleep; later frames for it are held again.
    pub fn node_asleep(&mut self, node: NodeId) {
        self.awake.remove(&node);
    }

    /// Take the next frame ready for transmission.
    pub fn next_ready(&mut self) -> Option<DataFrame> {
        let frame = self.ready.pop_front()?;
        self.capacity.release();
        Some(frame)
    }

    /// Whether a frame is ready to send.
    #[inline]
    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Frames held for a sleeping node.
    pub fn held_count(&self, node: NodeId) -> usize {
        self.held.get(&node).map_or(0, VecDeque::len)
    }

    /// Total queued frames, ready and held.
    pub fn len(&self) -> usize {
        self.ready.len() + self.held.values().map(VecDeque::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard everything. Returns the number of frames dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.len();
        self.ready.clear();
        self.held.clear();
        self.capacity.release_many(dropped);
        dropped
    }
}
