//! Fallback node kind for any device class.
//!
//! The interview is a single RequestNodeInfo; the node is started once the
//! node information update arrives. Restored nodes start immediately.

use bytes::Bytes;

use super::{ControllerContext, NodeCreationError, NodeKind, NodeRecord, ZWaveNode, WAKE_UP_NOTIFICATION};
use crate::protocol::{
    ApplicationCommand, ApplicationUpdate, DataFrame, NodeId, NodeInfo, NodeProtocolInfo, WAKE_UP_COMMAND_CLASS,
};

/// Node that only tracks identity, reachability and the last command.
#[derive(Debug, Clone)]
pub struct GenericNode {
    info: NodeInfo,
    is_listening: bool,
    started: bool,
    /// Result of the most recent SendData, if any.
    reachable: Option<bool>,
    last_command: Option<Bytes>,
}

impl GenericNode {
    pub fn new(info: NodeInfo, is_listening: bool) -> Self {
        Self {
            info,
            is_listening,
            started: false,
            reachable: None,
            last_command: None,
        }
    }

    /// Rebuild a node that completed its interview in an earlier session.
    pub fn restored(record: &NodeRecord) -> Self {
        Self {
            started: true,
            ..Self::new(record.info.clone(), record.is_listening)
        }
    }

    /// Result of the most recent SendData.
    pub fn is_reachable(&self) -> Option<bool> {
        self.reachable
    }

    /// Raw bytes of the last application command received.
    pub fn last_command(&self) -> Option<&Bytes> {
        self.last_command.as_ref()
    }
}

impl ZWaveNode for GenericNode {
    fn node_id(&self) -> NodeId {
        self.info.node_id
    }

    fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    fn matches_node_protocol_info(&self, info: &NodeProtocolInfo) -> bool {
        self.is_listening == info.is_listening()
            && self.info.device_class()
                == (
                    info.basic_device_class,
                    info.generic_device_class,
                    info.specific_device_class,
                )
    }

    fn start_interview(&mut self, ctx: &dyn ControllerContext) {
        if self.started {
            return;
        }
        let node_id = self.node_id();
        tracing::debug!(node = node_id, "requesting node info");
        if let Err(e) = ctx.send_data_frame(DataFrame::RequestNodeInfo { node_id }, self.is_listening) {
            tracing::warn!(node = node_id, "Unable to start interview: {}", e);
        }
    }

    fn on_application_command(&mut self, ctx: &dyn ControllerContext, command: &ApplicationCommand) {
        if command.command_class() == Some(WAKE_UP_COMMAND_CLASS)
            && command.command.get(1) == Some(&WAKE_UP_NOTIFICATION)
        {
            tracing::debug!(node = self.node_id(), "wake up notification");
            if let Err(e) = ctx.node_awake(self.node_id()) {
                tracing::warn!(node = self.node_id(), "Unable to release held frames: {}", e);
            }
        }
        self.last_command = Some(command.command.clone());
    }

    fn on_application_update(&mut self, _ctx: &dyn ControllerContext, update: &ApplicationUpdate) {
        if update.did_info_request_fail() {
            tracing::warn!(node = self.node_id(), "node info request failed");
            return;
        }
        if let Some(info) = update.info.as_ref().filter(|_| update.is_node_info()) {
            self.info.command_classes = info.command_classes.clone();
            if !self.started {
                tracing::debug!(node = self.node_id(), "interview complete");
                self.started = true;
            }
        }
    }

    fn on_send_data_callback(&mut self, _ctx: &dyn ControllerContext, ack_received: bool) {
        if !ack_received {
            tracing::debug!(node = self.node_id(), "node did not acknowledge");
        }
        self.reachable = Some(ack_received);
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn is_listening(&self) -> bool {
        self.is_listening
    }

    fn record(&self) -> NodeRecord {
        NodeRecord {
            info: self.info.clone(),
            is_listening: self.is_listening,
            kind: GenericKind::NAME.to_string(),
        }
    }
}

/// [`NodeKind`] producing [`GenericNode`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericKind;

impl GenericKind {
    pub const NAME: &'static str = "generic";
}

impl NodeKind for GenericKind {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn create(&self, info: &NodeInfo, is_listening: bool) -> Result<Box<dyn ZWaveNode>, NodeCreationError> {
        Ok(Box::new(GenericNode::new(info.clone(), is_listening)))
    }

    fn restore(&self, record: &NodeRecord) -> Result<Box<dyn ZWaveNode>, NodeCreationError> {
        Ok(Box::new(GenericNode::restored(record)))
    }
}
