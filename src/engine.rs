//! Async runner for the link layer.
//!
//! Three tasks share the work, connected by channels:
//!
//! ```text
//!                 ┌──────────────┐ Inbound ┌──────────────┐ EngineEvent
//! serial read ──► │ reader task  │ ──────► │ engine task  │ ──────────► dispatch
//!                 │ (FrameBuffer)│         │ (LinkLayer)  │
//!                 └──────────────┘         └──────┬───────┘
//!                                    Command ▲    │ Bytes
//!                     EngineHandle ──────────┘    ▼
//!                                          ┌──────────────┐
//!                                          │ writer task  │ ──► serial write
//!                                          └──────────────┘
//! ```
//!
//! The engine task suspends on `select!` over cancellation, inbound items,
//! commands and the link layer's next deadline.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::backpressure::QueueCapacity;
use crate::config::ControllerConfig;
use crate::error::{Result, ZWaveError};
use crate::link::{FrameSink, LinkEvent, LinkLayer, LinkStats, OutboundDataFrame, Output};
use crate::protocol::{DataFrame, FrameBuffer, Inbound, NodeId};
use crate::transport::Transport;
use crate::writer::{spawn_writer_task, WriterHandle};

/// Inbound items buffered between reader and engine.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Serial read buffer size.
const READ_BUFFER_SIZE: usize = 256;

/// Requests from handles to the engine task.
#[derive(Debug)]
enum Command {
    Enqueue(OutboundDataFrame),
    NodeAwake(NodeId),
    NodeAsleep(NodeId),
    Stats(oneshot::Sender<LinkStats>),
}

/// Output of the engine towards the orchestrator.
#[derive(Debug)]
pub enum EngineEvent {
    Link(LinkEvent),
    /// The serial link failed; the engine has stopped.
    ConnectionLost(ZWaveError),
}

/// Cheaply cloneable handle to a running engine.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    capacity: QueueCapacity,
}

impl EngineHandle {
    /// Queue a frame for transmission. Never waits.
    pub fn send_data_frame(&self, frame: DataFrame, is_listening: bool) -> Result<()> {
        self.enqueue(OutboundDataFrame::new(frame, is_listening))
    }

    /// Current link counters.
    pub async fn link_stats(&self) -> Result<LinkStats> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Stats(tx))?;
        rx.await.map_err(|_| ZWaveError::ConnectionClosed)
    }

    /// Frames reserved in the outbound queue.
    pub fn pending_frames(&self) -> usize {
        self.capacity.reserved()
    }

    /// Whether the engine task has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ZWaveError::ConnectionClosed)
    }
}

impl FrameSink for EngineHandle {
    fn enqueue(&self, frame: OutboundDataFrame) -> Result<()> {
        frame.frame.validate()?;
        self.capacity.try_reserve()?;
        self.command(Command::Enqueue(frame)).inspect_err(|_| {
            self.capacity.release();
        })
    }

    fn node_awake(&self, node_id: NodeId) -> Result<()> {
        self.command(Command::NodeAwake(node_id))
    }

    fn node_asleep(&self, node_id: NodeId) -> Result<()> {
        self.command(Command::NodeAsleep(node_id))
    }
}

/// Join handles of the engine's tasks.
pub struct EngineTasks {
    pub engine: JoinHandle<Result<()>>,
    pub reader: JoinHandle<Result<()>>,
    pub writer: JoinHandle<Result<()>>,
}

/// Start reader, engine and writer tasks on a transport.
pub fn spawn_engine<T: Transport>(
    io: T,
    config: &ControllerConfig,
    cancel: CancellationToken,
) -> (EngineHandle, mpsc::UnboundedReceiver<EngineEvent>, EngineTasks) {
    let (read_half, write_half) = tokio::io::split(io);
    let (writer, writer_task) = spawn_writer_task(write_half, config.writer_channel_capacity);

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    let reader_task = tokio::spawn(reader_loop(
        read_half,
        inbound_tx,
        config.frame_receive_timeout(),
        cancel.clone(),
    ));

    let capacity = QueueCapacity::new(config.queue_capacity);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let engine = Engine {
        link: LinkLayer::new(config.link_config(), capacity.clone()),
        commands: command_rx,
        inbound: inbound_rx,
        writer,
        events: event_tx,
        cancel,
    };
    let engine_task = tokio::spawn(engine.run());

    let handle = EngineHandle {
        commands: command_tx,
        capacity,
    };
    let tasks = EngineTasks {
        engine: engine_task,
        reader: reader_task,
        writer: writer_task,
    };
    (handle, event_rx, tasks)
}

/// Reader loop - decodes serial bytes and forwards items to the engine.
///
/// A frame left incomplete for `receive_timeout` is abandoned so the bytes
/// behind its SOF get parsed. Ends on cancellation, end of stream or a read
/// error; a read error is forwarded before the sender is dropped.
async fn reader_loop<R>(
    mut reader: R,
    inbound: mpsc::Sender<Result<Inbound>>,
    receive_timeout: Duration,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let deadline = frame_buffer.partial_since().map(|since| since + receive_timeout);
        let items = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!("serial stream closed");
                    return Ok(());
                }
                Ok(n) => {
                    tracing::trace!(bytes = n, "read");
                    frame_buffer.push_at(&buf[..n], Instant::now())
                }
                Err(e) => {
                    tracing::error!("Serial read error: {}", e);
                    let _ = inbound.send(Err(ZWaveError::Io(e))).await;
                    return Ok(());
                }
            },
            _ = sleep_until_deadline(deadline) => frame_buffer.abandon_partial(Instant::now()),
        };

        for item in items {
            if inbound.send(Ok(item)).await.is_err() {
                return Ok(());
            }
        }
    }
}

struct Engine {
    link: LinkLayer,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::Receiver<Result<Inbound>>,
    writer: WriterHandle,
    events: mpsc::UnboundedSender<EngineEvent>,
    cancel: CancellationToken,
}

impl Engine {
    async fn run(mut self) -> Result<()> {
        let result = self.drive().await;

        // Fail whatever is in flight; its bytes no longer go anywhere.
        self.link.abort();
        while let Some(output) = self.link.poll_output() {
            if let Output::Event(event) = output {
                let _ = self.events.send(EngineEvent::Link(event));
            }
        }

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("Engine stopped: {}", e);
                let _ = self.events.send(EngineEvent::ConnectionLost(e));
                Err(ZWaveError::ConnectionClosed)
            }
        }
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            self.link.poll_transmit(Instant::now());
            self.flush().await?;

            let deadline = self.link.next_deadline();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("engine cancelled");
                    return Ok(());
                }
                item = self.inbound.recv() => match item {
                    Some(Ok(item)) => self.link.handle_inbound(item, Instant::now()),
                    Some(Err(e)) => return Err(e),
                    None => return Err(ZWaveError::ConnectionClosed),
                },
                Some(command) = self.commands.recv() => self.handle_command(command),
                _ = sleep_until_deadline(deadline) => self.link.handle_timeout(Instant::now()),
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue(frame) => self.link.enqueue_reserved(frame),
            Command::NodeAwake(node_id) => self.link.node_awake(node_id),
            Command::NodeAsleep(node_id) => self.link.node_asleep(node_id),
            Command::Stats(reply) => {
                let _ = reply.send(self.link.stats());
            }
        }
    }

    /// Hand pending writes to the writer task and publish events.
    async fn flush(&mut self) -> Result<()> {
        while let Some(output) = self.link.poll_output() {
            match output {
                Output::Write(bytes) => self.writer.send(bytes).await?,
                Output::Event(event) => {
                    let _ = self.events.send(EngineEvent::Link(event));
                }
            }
        }
        Ok(())
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
