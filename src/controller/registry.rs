//! Node registry.

use std::collections::HashMap;

use crate::node::ZWaveNode;
use crate::protocol::NodeId;

/// Node objects by id, remembering registration order.
#[derive(Default)]
pub struct NodeRegistry {
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, Box<dyn ZWaveNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, returning the node it replaced. A replaced node
    /// moves to the end of the order.
    pub fn insert(&mut self, node: Box<dyn ZWaveNode>) -> Option<Box<dyn ZWaveNode>> {
        let node_id = node.node_id();
        let previous = self.nodes.insert(node_id, node);
        if previous.is_some() {
            self.order.retain(|&id| id != node_id);
        }
        self.order.push(node_id);
        previous
    }

    pub fn remove(&mut self, node_id: NodeId) -> Option<Box<dyn ZWaveNode>> {
        let removed = self.nodes.remove(&node_id);
        if removed.is_some() {
            self.order.retain(|&id| id != node_id);
        }
        removed
    }

    pub fn get(&self, node_id: NodeId) -> Option<&dyn ZWaveNode> {
        self.nodes.get(&node_id).map(|node| node.as_ref())
    }

    pub fn get_mut(&mut self, node_id: NodeId) -> Option<&mut Box<dyn ZWaveNode>> {
        self.nodes.get_mut(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Registered ids in registration order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    /// Nodes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn ZWaveNode> + '_ {
        self.order.iter().filter_map(move |id| self.get(*id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
