//! Notifications for applications embedding the controller.

use tokio::sync::mpsc;

use crate::error::ZWaveError;
use crate::node::{NodeRecord, ZWaveNode};
use crate::protocol::{NodeId, NodeInfo};

/// Receives controller notifications. Every method defaults to doing nothing.
///
/// Methods are called from the controller's dispatch task and must not block.
#[allow(unused_variables)]
pub trait ControllerListener: Send {
    /// The serial link could not be opened or was lost.
    fn on_connection_failure(&mut self, error: &ZWaveError) {}

    /// Library version, home id and controller node id are all known.
    fn on_controller_info(&mut self, library_version: &str, home_id: u32, node_id: NodeId) {}

    fn on_inclusion_started(&mut self) {}

    fn on_inclusion(&mut self, info: &NodeInfo, success: bool) {}

    fn on_inclusion_stopped(&mut self) {}

    fn on_exclusion_started(&mut self) {}

    fn on_exclusion(&mut self, info: &NodeInfo, success: bool) {}

    fn on_exclusion_stopped(&mut self) {}

    /// A node finished its interview.
    fn on_node_added(&mut self, node: &dyn ZWaveNode) {}

    /// A started node handled a command or update.
    fn on_node_updated(&mut self, node: &dyn ZWaveNode) {}
}

/// Owned form of a listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerNotification {
    ConnectionFailure(String),
    ControllerInfo {
        library_version: String,
        home_id: u32,
        node_id: NodeId,
    },
    InclusionStarted,
    Inclusion { info: NodeInfo, success: bool },
    InclusionStopped,
    ExclusionStarted,
    Exclusion { info: NodeInfo, success: bool },
    ExclusionStopped,
    NodeAdded(NodeRecord),
    NodeUpdated(NodeRecord),
}

/// Listener forwarding every callback into an mpsc channel.
///
/// ```
/// use zwave_serial::controller::{ChannelListener, ControllerListener, ControllerNotification};
///
/// let (mut listener, mut rx) = ChannelListener::new();
/// listener.on_inclusion_started();
/// assert_eq!(rx.try_recv().unwrap(), ControllerNotification::InclusionStarted);
/// ```
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ControllerNotification>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ControllerNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, notification: ControllerNotification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("notification receiver dropped");
        }
    }
}

impl ControllerListener for ChannelListener {
    fn on_connection_failure(&mut self, error: &ZWaveError) {
        self.send(ControllerNotification::ConnectionFailure(error.to_string()));
    }

    fn on_controller_info(&mut self, library_version: &str, home_id: u32, node_id: NodeId) {
        self.send(ControllerNotification::ControllerInfo {
            library_version: library_version.to_string(),
            home_id,
            node_id,
        });
    }

    fn on_inclusion_started(&mut self) {
        self.send(ControllerNotification::InclusionStarted);
    }

    fn on_inclusion(&mut self, info: &NodeInfo, success: bool) {
        self.send(ControllerNotification::Inclusion {
            info: info.clone(),
            success,
        });
    }

    fn on_inclusion_stopped(&mut self) {
        self.send(ControllerNotification::InclusionStopped);
    }

    fn on_exclusion_started(&mut self) {
        self.send(ControllerNotification::ExclusionStarted);
    }

    fn on_exclusion(&mut self, info: &NodeInfo, success: bool) {
        self.send(ControllerNotification::Exclusion {
            info: info.clone(),
            success,
        });
    }

    fn on_exclusion_stopped(&mut self) {
        self.send(ControllerNotification::ExclusionStopped);
    }

    fn on_node_added(&mut self, node: &dyn ZWaveNode) {
        self.send(ControllerNotification::NodeAdded(node.record()));
    }

    fn on_node_updated(&mut self, node: &dyn ZWaveNode) {
        self.send(ControllerNotification::NodeUpdated(node.record()));
    }
}
