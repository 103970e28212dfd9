//! Protocol-level device descriptors carried inside frames.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Node identifier, unique within one network (1..=232).
pub type NodeId = u8;

/// Command class id of WAKE_UP; nodes supporting it are sleeping nodes.
pub const WAKE_UP_COMMAND_CLASS: u8 = 0x84;

/// Listening bit in the node protocol info capability byte.
const CAPABILITY_LISTENING: u8 = 0x80;

/// Identity and capabilities of a node, as reported by node-info frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub basic_device_class: u8,
    pub generic_device_class: u8,
    pub specific_device_class: u8,
    /// Supported command classes, in the order reported.
    pub command_classes: Vec<u8>,
}

impl NodeInfo {
    /// Create node info without command classes.
    pub fn new(node_id: NodeId, basic: u8, generic: u8, specific: u8) -> Self {
        Self {
            node_id,
            basic_device_class: basic,
            generic_device_class: generic,
            specific_device_class: specific,
            command_classes: Vec::new(),
        }
    }

    /// Builder-style setter for command classes.
    pub fn with_command_classes(mut self, command_classes: Vec<u8>) -> Self {
        self.command_classes = command_classes;
        self
    }

    /// Check whether the node reported a command class.
    pub fn has_command_class(&self, id: u8) -> bool {
        self.command_classes.contains(&id)
    }

    /// (basic, generic, specific) device class tuple.
    pub fn device_class(&self) -> (u8, u8, u8) {
        (
            self.basic_device_class,
            self.generic_device_class,
            self.specific_device_class,
        )
    }

    /// Parse `basic, generic, specific, command classes...` from an info block.
    ///
    /// Returns `None` if the block is shorter than the three class bytes.
    pub(crate) fn parse(node_id: NodeId, block: &[u8]) -> Option<Self> {
        if block.len() < 3 {
            return None;
        }
        Some(Self::new(node_id, block[0], block[1], block[2]).with_command_classes(block[3..].to_vec()))
    }

    /// Encode as `basic, generic, specific, command classes...`.
    pub(crate) fn encode_block(&self) -> Vec<u8> {
        let mut block = Vec::with_capacity(3 + self.command_classes.len());
        block.push(self.basic_device_class);
        block.push(self.generic_device_class);
        block.push(self.specific_device_class);
        block.extend_from_slice(&self.command_classes);
        block
    }
}

/// Answer to GetNodeProtocolInfo: the controller's cached view of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProtocolInfo {
    pub capability: u8,
    pub security: u8,
    pub basic_device_class: u8,
    pub generic_device_class: u8,
    pub specific_device_class: u8,
}

impl NodeProtocolInfo {
    /// Whether the node is always listening (mains powered).
    #[inline]
    pub fn is_listening(&self) -> bool {
        self.capability & CAPABILITY_LISTENING != 0
    }

    /// Turn into a [`NodeInfo`] for the given node id.
    pub fn to_node_info(&self, node_id: NodeId) -> NodeInfo {
        NodeInfo::new(
            node_id,
            self.basic_device_class,
            self.generic_device_class,
            self.specific_device_class,
        )
    }
}

/// Command received from a node (ApplicationCommandHandler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationCommand {
    pub rx_status: u8,
    pub source_node: NodeId,
    /// Command class id, command id, parameters.
    pub command: Bytes,
}

impl ApplicationCommand {
    /// First command byte, if present.
    pub fn command_class(&self) -> Option<u8> {
        self.command.first().copied()
    }
}

/// ApplicationUpdate status values.
pub mod update_status {
    pub const SUC_ID: u8 = 0x10;
    pub const DELETE_DONE: u8 = 0x20;
    pub const NEW_ID_ASSIGNED: u8 = 0x40;
    pub const ROUTING_PENDING: u8 = 0x80;
    pub const NODE_INFO_REQ_FAILED: u8 = 0x81;
    pub const NODE_INFO_REQ_DONE: u8 = 0x82;
    pub const NODE_INFO_RECEIVED: u8 = 0x84;
}

/// Unsolicited node information update (ApplicationUpdate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationUpdate {
    pub status: u8,
    pub node_id: NodeId,
    pub info: Option<NodeInfo>,
}

impl ApplicationUpdate {
    /// Node id this update concerns, if the controller supplied one.
    ///
    /// A failed info request carries node id 0.
    pub fn target_node(&self) -> Option<NodeId> {
        (self.node_id != 0).then_some(self.node_id)
    }

    /// Whether the controller gave up on a RequestNodeInfo.
    pub fn did_info_request_fail(&self) -> bool {
        self.status == update_status::NODE_INFO_REQ_FAILED
    }

    /// Whether this update carries node information.
    pub fn is_node_info(&self) -> bool {
        self.status == update_status::NODE_INFO_RECEIVED
    }
}

/// AddNodeToNetwork / RemoveNodeFromNetwork modes and callback statuses.
pub mod network_management {
    pub const MODE_ANY: u8 = 0x01;
    pub const MODE_STOP: u8 = 0x05;
    pub const OPTION_HIGH_POWER: u8 = 0x80;

    pub const STATUS_LEARN_READY: u8 = 0x01;
    pub const STATUS_NODE_FOUND: u8 = 0x02;
    pub const STATUS_ADDING_SLAVE: u8 = 0x03;
    pub const STATUS_ADDING_CONTROLLER: u8 = 0x04;
    pub const STATUS_PROTOCOL_DONE: u8 = 0x05;
    pub const STATUS_DONE: u8 = 0x06;
    pub const STATUS_FAILED: u8 = 0x07;

    /// Removal reuses the adding codes for the slave/controller steps.
    pub const STATUS_REMOVING_SLAVE: u8 = STATUS_ADDING_SLAVE;
    pub const STATUS_REMOVING_CONTROLLER: u8 = STATUS_ADDING_CONTROLLER;
}

/// Status callback of an inclusion or exclusion in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkUpdate {
    pub callback_id: u8,
    pub status: u8,
    pub source: NodeId,
    pub info: Option<NodeInfo>,
}
