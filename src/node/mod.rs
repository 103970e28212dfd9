//! Node object model.
//!
//! The controller does not interpret command classes itself. It creates
//! one [`ZWaveNode`] per device through a [`NodeFactory`] and routes
//! everything addressed to that device to it. Nodes talk back through a
//! [`ControllerContext`].

mod factory;
mod generic;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;
use crate::protocol::{ApplicationCommand, ApplicationUpdate, DataFrame, NodeId, NodeInfo, NodeProtocolInfo};

pub use factory::{DeviceClassFactory, NodeKind};
pub use generic::{GenericKind, GenericNode};

/// Command id of WAKE_UP_NOTIFICATION in the WAKE_UP command class.
pub const WAKE_UP_NOTIFICATION: u8 = 0x07;

/// What a node may ask of the controller.
pub trait ControllerContext {
    /// Queue a frame; `is_listening` false holds it until the node wakes up.
    fn send_data_frame(&self, frame: DataFrame, is_listening: bool) -> Result<()>;

    /// Release frames held for a sleeping node.
    fn node_awake(&self, node_id: NodeId) -> Result<()>;

    /// Hold frames for the node again.
    fn node_asleep(&self, node_id: NodeId) -> Result<()>;

    /// Node id of the controller itself, once known.
    fn controller_node_id(&self) -> Option<NodeId>;
}

/// A device in the network.
pub trait ZWaveNode: Send {
    fn node_id(&self) -> NodeId;

    /// Identity and supported command classes as currently known.
    fn node_info(&self) -> &NodeInfo;

    /// Whether a persisted node still describes the device the controller reports.
    fn matches_node_protocol_info(&self, info: &NodeProtocolInfo) -> bool;

    /// Begin querying the device's capabilities.
    fn start_interview(&mut self, ctx: &dyn ControllerContext);

    fn on_application_command(&mut self, ctx: &dyn ControllerContext, command: &ApplicationCommand);

    fn on_application_update(&mut self, ctx: &dyn ControllerContext, update: &ApplicationUpdate);

    /// Outcome of a SendData to this node. `ack_received` is false when the
    /// node itself never acknowledged.
    fn on_send_data_callback(&mut self, ctx: &dyn ControllerContext, ack_received: bool);

    /// A SendData to this node never made it past the controller.
    fn on_send_data_link_failure(&mut self, _ctx: &dyn ControllerContext) {}

    /// Interview complete.
    fn is_started(&self) -> bool;

    /// Always listening (mains powered) as opposed to sleeping.
    fn is_listening(&self) -> bool;

    /// Persistent form of this node.
    fn record(&self) -> NodeRecord;
}

/// Persisted node metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub info: NodeInfo,
    pub is_listening: bool,
    /// Name of the [`NodeKind`] that produced the node.
    pub kind: String,
}

impl NodeRecord {
    pub fn node_id(&self) -> NodeId {
        self.info.node_id
    }
}

/// Failure to build a node object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeCreationError {
    #[error("invalid node id {0}")]
    InvalidNodeId(NodeId),

    #[error("no node kind for device class {basic:#04x}/{generic:#04x}/{specific:#04x}")]
    UnsupportedDeviceClass { basic: u8, generic: u8, specific: u8 },

    #[error("record for node {node_id} was written by kind '{kind}'")]
    KindMismatch { node_id: NodeId, kind: String },
}

/// Builds node objects for discovered and persisted devices.
pub trait NodeFactory: Send {
    fn create_node(&self, info: &NodeInfo, is_listening: bool) -> std::result::Result<Box<dyn ZWaveNode>, NodeCreationError>;

    fn restore_node(&self, record: &NodeRecord) -> std::result::Result<Box<dyn ZWaveNode>, NodeCreationError>;
}
