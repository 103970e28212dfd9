//! Controller orchestration.
//!
//! Consumes link events, keeps the node registry and the controller's
//! identity, and drives the listener. Synchronous and transport-agnostic:
//! everything outbound goes through a [`FrameSink`].

use crate::error::{Result, ZWaveError};
use crate::link::{FrameSink, LinkEvent, OutboundDataFrame, TransactionContext, TransactionFailure, TransactionId};
use crate::node::{ControllerContext, NodeFactory, ZWaveNode};
use crate::protocol::{
    network_management, ApplicationCommand, ApplicationUpdate, DataFrame, NetworkUpdate, NodeId, NodeInfo,
    NodeProtocolInfo, WAKE_UP_COMMAND_CLASS,
};
use crate::store::PersistentStore;

use super::listener::ControllerListener;
use super::registry::NodeRegistry;

/// What the controller has reported about itself so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerIdentity {
    pub library_version: Option<String>,
    pub home_id: Option<u32>,
    pub node_id: Option<NodeId>,
}

/// [`ControllerContext`] handed to node objects.
struct NodeContext<'a, S> {
    sink: &'a S,
    controller_node_id: Option<NodeId>,
}

impl<S: FrameSink> ControllerContext for NodeContext<'_, S> {
    fn send_data_frame(&self, frame: DataFrame, is_listening: bool) -> Result<()> {
        self.sink.enqueue(OutboundDataFrame::new(frame, is_listening))
    }

    fn node_awake(&self, node_id: NodeId) -> Result<()> {
        self.sink.node_awake(node_id)
    }

    fn node_asleep(&self, node_id: NodeId) -> Result<()> {
        self.sink.node_asleep(node_id)
    }

    fn controller_node_id(&self) -> Option<NodeId> {
        self.controller_node_id
    }
}

/// Controller state machine above the link layer.
pub struct Orchestrator<S: FrameSink> {
    sink: S,
    store: Box<dyn PersistentStore>,
    factory: Box<dyn NodeFactory>,
    listener: Option<Box<dyn ControllerListener>>,
    registry: NodeRegistry,
    identity: ControllerIdentity,
}

impl<S: FrameSink> Orchestrator<S> {
    pub fn new(
        sink: S,
        store: Box<dyn PersistentStore>,
        factory: Box<dyn NodeFactory>,
        listener: Option<Box<dyn ControllerListener>>,
    ) -> Self {
        Self {
            sink,
            store,
            factory,
            listener,
            registry: NodeRegistry::new(),
            identity: ControllerIdentity::default(),
        }
    }

    /// Query the controller's identity and node list.
    pub fn on_connected(&mut self) {
        tracing::debug!("connected, querying controller");
        for frame in [
            DataFrame::VersionRequest,
            DataFrame::MemoryGetIdRequest,
            DataFrame::InitDataRequest,
        ] {
            self.send(frame);
        }
    }

    pub fn on_connection_lost(&mut self, error: &ZWaveError) {
        match self.listener.as_mut() {
            Some(listener) => listener.on_connection_failure(error),
            None => tracing::error!("Connection failure and no listener was set: {}", error),
        }
    }

    pub fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::TransactionStarted { id, node_id } => {
                tracing::trace!(tx = %id, node = ?node_id, "transaction started");
            }
            LinkEvent::TransactionCompleted { id, node_id, request } => {
                self.on_transaction_completed(id, node_id, &request);
            }
            LinkEvent::TransactionFailed {
                id,
                node_id,
                request,
                failure,
            } => self.on_transaction_failed(id, node_id, &request, failure),
            LinkEvent::Frame { frame, transaction } => self.on_frame(frame, transaction),
        }
    }

    fn on_transaction_completed(&mut self, id: TransactionId, node_id: Option<NodeId>, request: &DataFrame) {
        tracing::trace!(tx = %id, "{} completed", request.name());
        match (request, node_id) {
            (DataFrame::SendData(_), Some(node_id)) => {
                self.with_node(node_id, false, |node, ctx| node.on_send_data_callback(ctx, true));
            }
            (DataFrame::SetDefault { .. }, _) => {
                tracing::info!("Z-Wave controller has been reset to factory default");
            }
            _ => {}
        }
    }

    fn on_transaction_failed(
        &mut self,
        id: TransactionId,
        node_id: Option<NodeId>,
        request: &DataFrame,
        failure: TransactionFailure,
    ) {
        tracing::warn!(tx = %id, node = ?node_id, "{} failed: {}", request.name(), failure);
        if let (DataFrame::SendData(_), Some(node_id)) = (request, node_id) {
            if failure.blames_node() {
                self.with_node(node_id, false, |node, ctx| node.on_send_data_callback(ctx, false));
            } else {
                self.with_node(node_id, false, |node, ctx| node.on_send_data_link_failure(ctx));
            }
        }
    }

    fn on_frame(&mut self, frame: DataFrame, transaction: Option<TransactionContext>) {
        match frame {
            DataFrame::Version { library_version, .. } => {
                tracing::debug!("controller library version {}", library_version);
                self.identity.library_version = Some(library_version);
                self.report_controller_info();
            }
            DataFrame::MemoryGetId { home_id, node_id } => {
                tracing::debug!(node = node_id, "controller home id {:#010x}", home_id);
                self.identity.home_id = Some(home_id);
                self.identity.node_id = Some(node_id);
                self.report_controller_info();
            }
            DataFrame::InitData(init) => {
                tracing::debug!(nodes = init.node_ids.len(), "init data received");
                for node_id in init.node_ids {
                    self.send(DataFrame::NodeProtocolInfoRequest { node_id });
                }
            }
            DataFrame::NodeProtocolInfo(npi) => match transaction.and_then(|tx| tx.node_id) {
                Some(node_id) => self.on_node_protocol_info(node_id, &npi),
                None => tracing::warn!("node protocol info without a requesting transaction"),
            },
            DataFrame::ApplicationCommand(command) => self.on_application_command(&command),
            DataFrame::ApplicationUpdate(update) => {
                let requested = transaction.and_then(|tx| tx.node_id);
                self.on_application_update(&update, requested);
            }
            DataFrame::AddNodeStatus(update) => self.on_add_node_status(&update),
            DataFrame::RemoveNodeStatus(update) => self.on_remove_node_status(&update),
            DataFrame::Unknown(frame) => {
                tracing::debug!("ignoring frame with function {:#04x}", frame.function);
            }
            other => tracing::trace!("{} consumed by its transaction", other.name()),
        }
    }

    fn report_controller_info(&mut self) {
        let ControllerIdentity {
            library_version: Some(version),
            home_id: Some(home_id),
            node_id: Some(node_id),
        } = &self.identity
        else {
            return;
        };
        if let Some(listener) = self.listener.as_mut() {
            listener.on_controller_info(version, *home_id, *node_id);
        }
    }

    fn on_node_protocol_info(&mut self, node_id: NodeId, npi: &NodeProtocolInfo) {
        tracing::trace!(node = node_id, "received protocol info");
        let persisted = match self.store.get_node(node_id) {
            Ok(Some(record)) => match self.factory.restore_node(&record) {
                Ok(node) if node.matches_node_protocol_info(npi) => Some(node),
                Ok(_) => {
                    tracing::debug!(node = node_id, "persisted node no longer matches");
                    None
                }
                Err(e) => {
                    tracing::warn!(node = node_id, "Unable to restore node: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::error!(node = node_id, "Unable to read node store: {}", e);
                None
            }
        };

        let node = match persisted {
            Some(node) => {
                tracing::debug!(node = node_id, "matches persistent node information; no need to interview");
                node
            }
            None => match self.factory.create_node(&npi.to_node_info(node_id), npi.is_listening()) {
                Ok(node) => node,
                Err(e) => {
                    tracing::error!(node = node_id, "Unable to create node: {}", e);
                    return;
                }
            },
        };
        self.add_node(node);
    }

    /// Register a node (replacing any previous one) and start its interview.
    fn add_node(&mut self, node: Box<dyn ZWaveNode>) {
        let node_id = node.node_id();
        let already_started = node.is_started();
        if self.registry.insert(node).is_some() {
            tracing::debug!(node = node_id, "replaced registered node");
        }
        if already_started {
            self.on_node_started(node_id);
        }
        self.with_node(node_id, false, |node, ctx| node.start_interview(ctx));
    }

    fn on_application_command(&mut self, command: &ApplicationCommand) {
        self.with_node(command.source_node, true, |node, ctx| {
            node.on_application_command(ctx, command)
        });
    }

    fn on_application_update(&mut self, update: &ApplicationUpdate, requested: Option<NodeId>) {
        if update.did_info_request_fail() {
            tracing::trace!("node info request failed");
        }
        // A failed info request names no node; fall back to whoever asked.
        match update.target_node().or(requested) {
            Some(node_id) => {
                self.with_node(node_id, true, |node, ctx| node.on_application_update(ctx, update));
            }
            None => tracing::error!("Unable to determine node to route ApplicationUpdate to"),
        }
    }

    fn on_add_node_status(&mut self, update: &NetworkUpdate) {
        match update.status {
            network_management::STATUS_LEARN_READY => {
                self.notify(|l| l.on_inclusion_started());
            }
            network_management::STATUS_NODE_FOUND => tracing::debug!("inclusion: node found"),
            network_management::STATUS_ADDING_SLAVE | network_management::STATUS_ADDING_CONTROLLER => {
                let Some(info) = update.info.as_ref() else {
                    tracing::warn!(node = update.source, "inclusion status without node info");
                    return;
                };
                tracing::trace!(node = info.node_id, "inclusion of new node");
                let is_listening = !info.has_command_class(WAKE_UP_COMMAND_CLASS);
                match self.factory.create_node(info, is_listening) {
                    Ok(node) => {
                        self.add_node(node);
                        self.notify(|l| l.on_inclusion(info, true));
                    }
                    Err(e) => tracing::error!(node = info.node_id, "Unable to create node: {}", e),
                }
            }
            network_management::STATUS_PROTOCOL_DONE => self.end_inclusion(),
            network_management::STATUS_DONE => self.notify(|l| l.on_inclusion_stopped()),
            network_management::STATUS_FAILED => {
                let info = status_info(update);
                self.notify(|l| l.on_inclusion(&info, false));
            }
            status => tracing::debug!("unexpected AddNodeToNetwork status {:#04x}", status),
        }
    }

    fn on_remove_node_status(&mut self, update: &NetworkUpdate) {
        match update.status {
            network_management::STATUS_LEARN_READY => {
                self.notify(|l| l.on_exclusion_started());
            }
            network_management::STATUS_NODE_FOUND => tracing::debug!("exclusion: node found"),
            network_management::STATUS_REMOVING_SLAVE | network_management::STATUS_REMOVING_CONTROLLER => {
                let info = status_info(update);
                if self.registry.remove(info.node_id).is_some() {
                    tracing::debug!(node = info.node_id, "removed node");
                }
                self.notify(|l| l.on_exclusion(&info, true));
            }
            network_management::STATUS_DONE => self.notify(|l| l.on_exclusion_stopped()),
            network_management::STATUS_FAILED => {
                let info = status_info(update);
                self.notify(|l| l.on_exclusion(&info, false));
            }
            status => tracing::debug!("unexpected RemoveNodeFromNetwork status {:#04x}", status),
        }
    }

    /// Run `f` against a registered node, then report a started transition
    /// (save + node-added) or, when `report_update` is set, a node-updated.
    fn with_node<F>(&mut self, node_id: NodeId, report_update: bool, f: F)
    where
        F: FnOnce(&mut dyn ZWaveNode, &dyn ControllerContext),
    {
        let ctx = NodeContext {
            sink: &self.sink,
            controller_node_id: self.identity.node_id,
        };
        let Some(node) = self.registry.get_mut(node_id) else {
            tracing::error!(node = node_id, "Unable to find node");
            return;
        };

        let was_started = node.is_started();
        f(node.as_mut(), &ctx);

        if !was_started && node.is_started() {
            self.on_node_started(node_id);
        } else if report_update && node.is_started() {
            if let Some(listener) = self.listener.as_mut() {
                listener.on_node_updated(node.as_ref());
            }
        }
    }

    fn on_node_started(&mut self, node_id: NodeId) {
        let Some(node) = self.registry.get(node_id) else {
            return;
        };
        tracing::debug!(node = node_id, "saving information for node");
        if let Err(e) = self.store.save_node(node.record()) {
            tracing::error!(node = node_id, "Unable to save node: {}", e);
        }
        if let Some(listener) = self.listener.as_mut() {
            listener.on_node_added(node);
        }
    }

    fn notify(&mut self, f: impl FnOnce(&mut dyn ControllerListener)) {
        if let Some(listener) = self.listener.as_mut() {
            f(listener.as_mut());
        }
    }

    fn send(&self, frame: DataFrame) {
        let name = frame.name();
        if let Err(e) = self.sink.enqueue(OutboundDataFrame::listening(frame)) {
            tracing::error!("Unable to queue {}: {}", name, e);
        }
    }

    pub fn begin_inclusion(&mut self) {
        self.send(DataFrame::AddNodeToNetwork {
            mode: network_management::MODE_ANY | network_management::OPTION_HIGH_POWER,
            callback_id: 0,
        });
    }

    pub fn end_inclusion(&mut self) {
        self.send(DataFrame::AddNodeToNetwork {
            mode: network_management::MODE_STOP,
            callback_id: 0,
        });
    }

    pub fn begin_exclusion(&mut self) {
        self.send(DataFrame::RemoveNodeFromNetwork {
            mode: network_management::MODE_ANY | network_management::OPTION_HIGH_POWER,
            callback_id: 0,
        });
    }

    pub fn end_exclusion(&mut self) {
        self.send(DataFrame::RemoveNodeFromNetwork {
            mode: network_management::MODE_STOP,
            callback_id: 0,
        });
    }

    /// Reset the controller to factory defaults.
    pub fn reset_to_default(&mut self) {
        self.send(DataFrame::SetDefault { callback_id: 0 });
    }

    pub fn send_data_frame(&self, frame: DataFrame, is_listening: bool) -> Result<()> {
        self.sink.enqueue(OutboundDataFrame::new(frame, is_listening))
    }

    pub fn node_awake(&self, node_id: NodeId) -> Result<()> {
        self.sink.node_awake(node_id)
    }

    pub fn node_asleep(&self, node_id: NodeId) -> Result<()> {
        self.sink.node_asleep(node_id)
    }

    pub fn identity(&self) -> &ControllerIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn node(&self, node_id: NodeId) -> Option<&dyn ZWaveNode> {
        self.registry.get(node_id)
    }

    pub fn close_store(&mut self) -> Result<()> {
        self.store.close()
    }
}

/// Node info of a status callback, or a bare one built from its source id.
fn status_info(update: &NetworkUpdate) -> NodeInfo {
    update
        .info
        .clone()
        .unwrap_or_else(|| NodeInfo::new(update.source, 0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ChannelListener, ControllerNotification};
    use crate::node::{DeviceClassFactory, NodeRecord, WAKE_UP_NOTIFICATION};
    use crate::protocol::{tx_status, update_status, InitData, MAX_NODE_ID};
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SinkCall {
        Enqueue(OutboundDataFrame),
        Awake(NodeId),
        Asleep(NodeId),
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        calls: Arc<Mutex<Vec<SinkCall>>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<SinkCall> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }

        fn take_frames(&self) -> Vec<DataFrame> {
            self.take()
                .into_iter()
                .filter_map(|call| match call {
                    SinkCall::Enqueue(out) => Some(out.frame),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameSink for RecordingSink {
        fn enqueue(&self, frame: OutboundDataFrame) -> Result<()> {
            self.calls.lock().unwrap().push(SinkCall::Enqueue(frame));
            Ok(())
        }

        fn node_awake(&self, node_id: NodeId) -> Result<()> {
            self.calls.lock().unwrap().push(SinkCall::Awake(node_id));
            Ok(())
        }

        fn node_asleep(&self, node_id: NodeId) -> Result<()> {
            self.calls.lock().unwrap().push(SinkCall::Asleep(node_id));
            Ok(())
        }
    }

    /// Store shared with the test so saves can be inspected.
    #[derive(Clone, Default)]
    struct SharedStore(Arc<Mutex<MemoryStore>>);

    impl PersistentStore for SharedStore {
        fn get_node(&self, node_id: NodeId) -> Result<Option<NodeRecord>> {
            self.0.lock().unwrap().get_node(node_id)
        }

        fn save_node(&mut self, record: NodeRecord) -> Result<()> {
            self.0.lock().unwrap().save_node(record)
        }
    }

    struct Harness {
        orchestrator: Orchestrator<RecordingSink>,
        sink: RecordingSink,
        store: SharedStore,
        notifications: UnboundedReceiver<ControllerNotification>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_store(SharedStore::default())
        }

        fn with_store(store: SharedStore) -> Self {
            let sink = RecordingSink::default();
            let (listener, notifications) = ChannelListener::new();
            let orchestrator = Orchestrator::new(
                sink.clone(),
                Box::new(store.clone()),
                Box::new(DeviceClassFactory::new()),
                Some(Box::new(listener)),
            );
            Self {
                orchestrator,
                sink,
                store,
                notifications,
            }
        }

        fn frame(&mut self, frame: DataFrame) {
            self.orchestrator.on_link_event(LinkEvent::Frame {
                frame,
                transaction: None,
            });
        }

        fn reply(&mut self, frame: DataFrame, node_id: NodeId) {
            self.orchestrator.on_link_event(LinkEvent::Frame {
                frame,
                transaction: Some(TransactionContext {
                    id: TransactionId(1),
                    node_id: Some(node_id),
                    function: 0,
                }),
            });
        }

        fn notifications(&mut self) -> Vec<ControllerNotification> {
            let mut out = Vec::new();
            while let Ok(n) = self.notifications.try_recv() {
                out.push(n);
            }
            out
        }
    }

    fn npi(listening: bool) -> NodeProtocolInfo {
        NodeProtocolInfo {
            capability: if listening { 0x80 } else { 0 },
            security: 0,
            basic_device_class: 0x04,
            generic_device_class: 0x10,
            specific_device_class: 0x01,
        }
    }

    fn node_info_update(node_id: NodeId) -> DataFrame {
        DataFrame::ApplicationUpdate(ApplicationUpdate {
            status: update_status::NODE_INFO_RECEIVED,
            node_id,
            info: Some(NodeInfo::new(node_id, 0x04, 0x10, 0x01).with_command_classes(vec![0x25])),
        })
    }

    #[test]
    fn test_startup_sequence() {
        let mut h = Harness::new();
        h.orchestrator.on_connected();
        assert_eq!(
            h.sink.take_frames(),
            vec![
                DataFrame::VersionRequest,
                DataFrame::MemoryGetIdRequest,
                DataFrame::InitDataRequest
            ]
        );
    }

    #[test]
    fn test_controller_info_waits_for_all_values() {
        let mut h = Harness::new();
        h.frame(DataFrame::Version {
            library_version: "Z-Wave 2.78".into(),
            library_type: 1,
        });
        assert!(h.notifications().is_empty());

        h.frame(DataFrame::MemoryGetId {
            home_id: 0xDEAD_BEEF,
            node_id: 1,
        });
        assert_eq!(
            h.notifications(),
            vec![ControllerNotification::ControllerInfo {
                library_version: "Z-Wave 2.78".into(),
                home_id: 0xDEAD_BEEF,
                node_id: 1
            }]
        );
        assert_eq!(h.orchestrator.identity().node_id, Some(1));
    }

    #[test]
    fn test_init_data_requests_protocol_info() {
        let mut h = Harness::new();
        h.frame(DataFrame::InitData(InitData {
            api_version: 5,
            capabilities: 0,
            node_ids: vec![1, 6, MAX_NODE_ID],
            chip_type: 0,
            chip_version: 0,
        }));
        assert_eq!(
            h.sink.take_frames(),
            vec![
                DataFrame::NodeProtocolInfoRequest { node_id: 1 },
                DataFrame::NodeProtocolInfoRequest { node_id: 6 },
                DataFrame::NodeProtocolInfoRequest { node_id: MAX_NODE_ID },
            ]
        );
    }

    #[test]
    fn test_new_node_is_interviewed_then_saved() {
        let mut h = Harness::new();
        h.reply(DataFrame::NodeProtocolInfo(npi(false)), 6);

        assert!(h.orchestrator.registry().contains(6));
        assert_eq!(
            h.sink.take(),
            vec![SinkCall::Enqueue(OutboundDataFrame::new(
                DataFrame::RequestNodeInfo { node_id: 6 },
                false
            ))]
        );
        assert!(h.notifications().is_empty());

        h.frame(node_info_update(6));
        let notifications = h.notifications();
        assert!(matches!(notifications.as_slice(), [ControllerNotification::NodeAdded(record)] if record.node_id() == 6));
        assert!(h.store.get_node(6).unwrap().is_some());

        // Later updates are reported as updates.
        h.frame(node_info_update(6));
        assert!(matches!(h.notifications().as_slice(), [ControllerNotification::NodeUpdated(_)]));
    }

    #[test]
    fn test_matching_persisted_node_is_reused() {
        let store = SharedStore::default();
        let record = NodeRecord {
            info: NodeInfo::new(6, 0x04, 0x10, 0x01).with_command_classes(vec![0x25]),
            is_listening: true,
            kind: "generic".into(),
        };
        store.0.lock().unwrap().save_node(record.clone()).unwrap();
        let mut h = Harness::with_store(store);

        h.reply(DataFrame::NodeProtocolInfo(npi(true)), 6);
        assert!(h.sink.take().is_empty());
        assert_eq!(h.notifications(), vec![ControllerNotification::NodeAdded(record)]);
        assert!(h.orchestrator.node(6).unwrap().node_info().has_command_class(0x25));
    }

    #[test]
    fn test_mismatched_persisted_node_is_recreated() {
        let store = SharedStore::default();
        store
            .0
            .lock()
            .unwrap()
            .save_node(NodeRecord {
                info: NodeInfo::new(6, 0x04, 0x11, 0x01),
                is_listening: true,
                kind: "generic".into(),
            })
            .unwrap();
        let mut h = Harness::with_store(store);

        h.reply(DataFrame::NodeProtocolInfo(npi(true)), 6);
        assert_eq!(h.sink.take_frames(), vec![DataFrame::RequestNodeInfo { node_id: 6 }]);
        assert!(!h.orchestrator.node(6).unwrap().is_started());
    }

    #[test]
    fn test_protocol_info_replaces_registered_node() {
        let mut h = Harness::new();
        h.reply(DataFrame::NodeProtocolInfo(npi(true)), 6);
        h.frame(node_info_update(6));
        assert!(h.orchestrator.node(6).unwrap().is_started());

        h.reply(DataFrame::NodeProtocolInfo(npi(false)), 6);
        assert_eq!(h.orchestrator.registry().len(), 1);
        let node = h.orchestrator.node(6).unwrap();
        assert!(!node.is_started());
        assert!(!node.is_listening());
    }

    #[test]
    fn test_failed_info_request_routed_to_requester() {
        let mut h = Harness::new();
        h.reply(DataFrame::NodeProtocolInfo(npi(true)), 6);
        h.sink.take();

        h.reply(
            DataFrame::ApplicationUpdate(ApplicationUpdate {
                status: update_status::NODE_INFO_REQ_FAILED,
                node_id: 0,
                info: None,
            }),
            6,
        );
        assert!(!h.orchestrator.node(6).unwrap().is_started());
        assert!(h.notifications().is_empty());
    }

    #[test]
    fn test_inclusion_flow() {
        let mut h = Harness::new();
        h.orchestrator.begin_inclusion();
        assert_eq!(
            h.sink.take_frames(),
            vec![DataFrame::AddNodeToNetwork {
                mode: network_management::MODE_ANY | network_management::OPTION_HIGH_POWER,
                callback_id: 0
            }]
        );

        let status = |status: u8, info: Option<NodeInfo>| {
            DataFrame::AddNodeStatus(NetworkUpdate {
                callback_id: 1,
                status,
                source: 9,
                info,
            })
        };
        let info = NodeInfo::new(9, 0x04, 0x10, 0x01).with_command_classes(vec![0x25, WAKE_UP_COMMAND_CLASS]);

        h.frame(status(network_management::STATUS_LEARN_READY, None));
        h.frame(status(network_management::STATUS_NODE_FOUND, None));
        h.frame(status(network_management::STATUS_ADDING_SLAVE, Some(info.clone())));
        h.frame(status(network_management::STATUS_PROTOCOL_DONE, None));
        h.frame(status(network_management::STATUS_DONE, None));

        assert_eq!(
            h.notifications(),
            vec![
                ControllerNotification::InclusionStarted,
                ControllerNotification::Inclusion {
                    info: info.clone(),
                    success: true
                },
                ControllerNotification::InclusionStopped,
            ]
        );
        // Supports WAKE_UP, so the interview waits for the node to wake.
        assert_eq!(
            h.sink.take(),
            vec![
                SinkCall::Enqueue(OutboundDataFrame::new(DataFrame::RequestNodeInfo { node_id: 9 }, false)),
                SinkCall::Enqueue(OutboundDataFrame::listening(DataFrame::AddNodeToNetwork {
                    mode: network_management::MODE_STOP,
                    callback_id: 0
                })),
            ]
        );
        assert!(!h.orchestrator.node(9).unwrap().is_listening());
    }

    #[test]
    fn test_inclusion_failure() {
        let mut h = Harness::new();
        h.frame(DataFrame::AddNodeStatus(NetworkUpdate {
            callback_id: 1,
            status: network_management::STATUS_FAILED,
            source: 0,
            info: None,
        }));
        assert_eq!(
            h.notifications(),
            vec![ControllerNotification::Inclusion {
                info: NodeInfo::new(0, 0, 0, 0),
                success: false
            }]
        );
    }

    #[test]
    fn test_exclusion_removes_node() {
        let mut h = Harness::new();
        h.reply(DataFrame::NodeProtocolInfo(npi(true)), 6);
        h.orchestrator.begin_exclusion();
        h.sink.take();

        let status = |status: u8| {
            DataFrame::RemoveNodeStatus(NetworkUpdate {
                callback_id: 2,
                status,
                source: 6,
                info: None,
            })
        };
        h.frame(status(network_management::STATUS_LEARN_READY));
        h.frame(status(network_management::STATUS_REMOVING_SLAVE));
        h.frame(status(network_management::STATUS_DONE));

        assert!(!h.orchestrator.registry().contains(6));
        assert_eq!(
            h.notifications(),
            vec![
                ControllerNotification::ExclusionStarted,
                ControllerNotification::Exclusion {
                    info: NodeInfo::new(6, 0, 0, 0),
                    success: true
                },
                ControllerNotification::ExclusionStopped,
            ]
        );
    }

    #[test]
    fn test_wake_up_notification_releases_held_frames() {
        let mut h = Harness::new();
        h.reply(DataFrame::NodeProtocolInfo(npi(false)), 6);
        h.sink.take();

        h.frame(DataFrame::ApplicationCommand(ApplicationCommand {
            rx_status: 0,
            source_node: 6,
            command: Bytes::from_static(&[WAKE_UP_COMMAND_CLASS, WAKE_UP_NOTIFICATION]),
        }));
        assert_eq!(h.sink.take(), vec![SinkCall::Awake(6)]);
        // Not started yet, so nothing is reported.
        assert!(h.notifications().is_empty());
    }

    #[test]
    fn test_command_for_unknown_node_is_dropped() {
        let mut h = Harness::new();
        h.frame(DataFrame::ApplicationCommand(ApplicationCommand {
            rx_status: 0,
            source_node: 42,
            command: Bytes::from_static(&[0x20, 0x03, 0x00]),
        }));
        assert!(h.sink.take().is_empty());
        assert!(h.notifications().is_empty());
    }

    fn send_data_request(node_id: NodeId) -> DataFrame {
        DataFrame::send_data(node_id, vec![0x20, 0x01, 0xFF])
    }

    #[test]
    fn test_send_data_outcomes_reach_node() {
        let mut h = Harness::new();
        h.reply(DataFrame::NodeProtocolInfo(npi(true)), 6);
        h.frame(node_info_update(6));
        h.notifications();

        h.orchestrator.on_link_event(LinkEvent::TransactionFailed {
            id: TransactionId(4),
            node_id: Some(6),
            request: send_data_request(6),
            failure: TransactionFailure::NetworkLevel {
                tx_status: tx_status::NO_ACK,
            },
        });
        h.orchestrator.on_link_event(LinkEvent::TransactionFailed {
            id: TransactionId(5),
            node_id: Some(6),
            request: send_data_request(6),
            failure: TransactionFailure::LinkLevel { attempts: 4 },
        });
        h.orchestrator.on_link_event(LinkEvent::TransactionCompleted {
            id: TransactionId(6),
            node_id: Some(6),
            request: send_data_request(6),
        });

        // Outcomes update node state but are not node updates.
        assert!(h.notifications().is_empty());
        assert!(h.orchestrator.node(6).unwrap().is_started());
    }

    #[test]
    fn test_connection_failure_reaches_listener() {
        let mut h = Harness::new();
        h.orchestrator.on_connection_lost(&ZWaveError::ConnectionClosed);
        assert_eq!(
            h.notifications(),
            vec![ControllerNotification::ConnectionFailure("Connection closed".into())]
        );
    }

    #[test]
    fn test_reset_to_default() {
        let mut h = Harness::new();
        h.orchestrator.reset_to_default();
        assert_eq!(h.sink.take_frames(), vec![DataFrame::SetDefault { callback_id: 0 }]);
    }
}
