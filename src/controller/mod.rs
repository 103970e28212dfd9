//! Controller builder and runtime.
//!
//! The [`ControllerBuilder`] collects configuration and collaborators; the
//! [`ZWaveController`] owns the running tasks:
//! 1. Open the serial port (or take any duplex stream)
//! 2. Spawn reader, engine and writer tasks
//! 3. Query version, home id and node list
//! 4. Dispatch link events to the orchestrator until stopped
//!
//! # Example
//!
//! ```ignore
//! use zwave_serial::controller::{ChannelListener, ZWaveController};
//! use zwave_serial::store::FileStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (listener, mut notifications) = ChannelListener::new();
//!     let controller = ZWaveController::builder()
//!         .serial_port("/dev/ttyACM0")
//!         .store(FileStore::open("nodes.msgpack")?)
//!         .listener(listener)
//!         .start()
//!         .await?;
//!
//!     while let Some(notification) = notifications.recv().await {
//!         println!("{:?}", notification);
//!     }
//!     controller.stop().await?;
//!     Ok(())
//! }
//! ```

mod listener;
mod orchestrator;
mod registry;

pub use listener::{ChannelListener, ControllerListener, ControllerNotification};
pub use orchestrator::{ControllerIdentity, Orchestrator};
pub use registry::NodeRegistry;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::engine::{spawn_engine, EngineEvent, EngineHandle, EngineTasks};
use crate::error::{Result, ZWaveError};
use crate::link::{FrameSink, LinkStats};
use crate::node::{DeviceClassFactory, NodeFactory, NodeRecord};
use crate::protocol::{DataFrame, NodeId};
use crate::store::PersistentStore;
use crate::transport::{open_serial, Transport};

/// Builder for configuring and starting a [`ZWaveController`].
pub struct ControllerBuilder {
    config: ControllerConfig,
    store: Option<Box<dyn PersistentStore>>,
    factory: Box<dyn NodeFactory>,
    listener: Option<Box<dyn ControllerListener>>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            config: ControllerConfig::default(),
            store: None,
            factory: Box::new(DeviceClassFactory::new()),
            listener: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn serial_port(mut self, path: impl Into<String>) -> Self {
        self.config.serial_port = path.into();
        self
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.baud_rate = baud_rate;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Wait for each response or callback after the ACK.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Retransmissions after the first attempt.
    pub fn max_retries(mut self, retries: u8) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Maximum frames waiting in the outbound queue.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn auto_close_store(mut self, auto_close: bool) -> Self {
        self.config.auto_close_store = auto_close;
        self
    }

    /// Persistent store for node metadata. Required.
    pub fn store(mut self, store: impl PersistentStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Node factory; defaults to [`DeviceClassFactory::new`].
    pub fn factory(mut self, factory: impl NodeFactory + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn listener(mut self, listener: impl ControllerListener + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Open the configured serial port and start the controller.
    ///
    /// If the port cannot be opened the listener is told, the store is
    /// closed when auto-close is configured, and the error is returned.
    pub async fn start(mut self) -> Result<ZWaveController> {
        if self.store.is_none() {
            return Err(ZWaveError::MissingStore);
        }
        match open_serial(&self.config.serial_port, self.config.baud_rate) {
            Ok(port) => self.start_with_transport(port),
            Err(e) => {
                match self.listener.as_mut() {
                    Some(listener) => listener.on_connection_failure(&e),
                    None => tracing::error!("Connection failure and no listener was set: {}", e),
                }
                if self.config.auto_close_store {
                    if let Some(store) = self.store.as_mut() {
                        if let Err(close_err) = store.close() {
                            tracing::warn!("Failed to close store: {}", close_err);
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Start the controller on an already open byte stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_with_transport<T: Transport>(self, io: T) -> Result<ZWaveController> {
        let store = self.store.ok_or(ZWaveError::MissingStore)?;
        ZWaveController::start(io, self.config, store, self.factory, self.listener)
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running controller.
pub struct ZWaveController {
    orchestrator: Arc<Mutex<Orchestrator<EngineHandle>>>,
    engine: EngineHandle,
    cancel: CancellationToken,
    tasks: EngineTasks,
    dispatch: JoinHandle<()>,
    auto_close_store: bool,
}

impl ZWaveController {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    fn start<T: Transport>(
        io: T,
        config: ControllerConfig,
        store: Box<dyn PersistentStore>,
        factory: Box<dyn NodeFactory>,
        listener: Option<Box<dyn ControllerListener>>,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (engine, events, tasks) = spawn_engine(io, &config, cancel.clone());

        let mut orchestrator = Orchestrator::new(engine.clone(), store, factory, listener);
        orchestrator.on_connected();

        let orchestrator = Arc::new(Mutex::new(orchestrator));
        let dispatch = tokio::spawn(Self::dispatch_loop(orchestrator.clone(), events));

        Ok(Self {
            orchestrator,
            engine,
            cancel,
            tasks,
            dispatch,
            auto_close_store: config.auto_close_store,
        })
    }

    /// Dispatch loop - feeds engine events to the orchestrator.
    async fn dispatch_loop(
        orchestrator: Arc<Mutex<Orchestrator<EngineHandle>>>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let mut orchestrator = orchestrator.lock().await;
            match event {
                EngineEvent::Link(event) => orchestrator.on_link_event(event),
                EngineEvent::ConnectionLost(e) => orchestrator.on_connection_lost(&e),
            }
        }
        tracing::debug!("dispatch loop finished");
    }

    /// Start including nodes (AddNodeToNetwork, any node type).
    pub async fn begin_inclusion(&self) {
        self.orchestrator.lock().await.begin_inclusion();
    }

    pub async fn end_inclusion(&self) {
        self.orchestrator.lock().await.end_inclusion();
    }

    /// Start excluding nodes (RemoveNodeFromNetwork, any node type).
    pub async fn begin_exclusion(&self) {
        self.orchestrator.lock().await.begin_exclusion();
    }

    pub async fn end_exclusion(&self) {
        self.orchestrator.lock().await.end_exclusion();
    }

    /// Reset the controller to factory defaults. This forgets the network.
    pub async fn reset_to_default(&self) {
        self.orchestrator.lock().await.reset_to_default();
    }

    /// Queue a frame. `is_listening` false holds it until the target wakes up.
    pub fn send_data_frame(&self, frame: DataFrame, is_listening: bool) -> Result<()> {
        self.engine.send_data_frame(frame, is_listening)
    }

    pub fn node_awake(&self, node_id: NodeId) -> Result<()> {
        self.engine.node_awake(node_id)
    }

    pub fn node_asleep(&self, node_id: NodeId) -> Result<()> {
        self.engine.node_asleep(node_id)
    }

    pub async fn library_version(&self) -> Option<String> {
        self.orchestrator.lock().await.identity().library_version.clone()
    }

    pub async fn home_id(&self) -> Option<u32> {
        self.orchestrator.lock().await.identity().home_id
    }

    /// Node id of the controller itself.
    pub async fn node_id(&self) -> Option<NodeId> {
        self.orchestrator.lock().await.identity().node_id
    }

    /// Registered node ids, in registration order.
    pub async fn node_ids(&self) -> Vec<NodeId> {
        self.orchestrator.lock().await.registry().node_ids().to_vec()
    }

    /// Snapshot of a registered node.
    pub async fn node(&self, node_id: NodeId) -> Option<NodeRecord> {
        self.orchestrator.lock().await.node(node_id).map(|node| node.record())
    }

    /// Whether a registered node finished its interview.
    pub async fn is_node_started(&self, node_id: NodeId) -> bool {
        self.orchestrator
            .lock()
            .await
            .node(node_id)
            .is_some_and(|node| node.is_started())
    }

    pub async fn link_stats(&self) -> Result<LinkStats> {
        self.engine.link_stats().await
    }

    /// Frames waiting in the outbound queue.
    pub fn pending_frames(&self) -> usize {
        self.engine.pending_frames()
    }

    /// Whether the engine is still running.
    pub fn is_running(&self) -> bool {
        !self.engine.is_closed()
    }

    /// Stop all tasks.
    ///
    /// The in-flight transaction fails as cancelled and queued frames are
    /// dropped. The store is closed when auto-close is configured.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();

        let EngineTasks { engine, reader, writer } = self.tasks;
        for (name, task) in [("engine", engine), ("reader", reader), ("writer", writer)] {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("{} task ended with: {}", name, e),
                Err(e) => tracing::error!("{} task panicked: {}", name, e),
            }
        }
        if let Err(e) = self.dispatch.await {
            tracing::error!("dispatch task panicked: {}", e);
        }

        if self.auto_close_store {
            self.orchestrator.lock().await.close_store()?;
        }
        tracing::debug!("controller stopped");
        Ok(())
    }
}
