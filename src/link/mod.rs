//! Link layer - ACK handshake, outbound queue and transactions.
//!
//! Everything in this module is sans-IO: it consumes decoded [`Inbound`]
//! items and explicit instants, and produces bytes to write plus
//! [`LinkEvent`]s. The async [`engine`](crate::engine) drives it.
//!
//! [`Inbound`]: crate::protocol::Inbound

mod ack;
mod layer;
mod queue;
mod transaction;

use tokio::time::Duration;

use crate::error::Result;
use crate::protocol::NodeId;

pub use self::ack::{AckHandler, AckOutcome, Control, LinkFailure, LinkStats};
pub use self::layer::{LinkEvent, LinkLayer, Output, TransactionContext};
pub use self::queue::{FrameQueue, OutboundDataFrame};
pub use self::transaction::{Transaction, TransactionFailure, TransactionId, TransactionState};

/// Default time to wait for an ACK.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(1600);

/// Default time to wait for each response or callback after the ACK.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retransmissions after the first attempt.
pub const DEFAULT_MAX_RETRIES: u8 = 3;

/// Timing and retry parameters of the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    pub ack_timeout: Duration,
    pub response_timeout: Duration,
    pub max_retries: u8,
    /// Delay before the first retransmission.
    pub retry_delay_base: Duration,
    /// Added to the delay for every further retransmission.
    pub retry_delay_step: Duration,
}

impl LinkConfig {
    /// Delay before retransmission number `attempt` (1-based).
    pub fn retransmit_delay(&self, attempt: u8) -> Duration {
        self.retry_delay_base + self.retry_delay_step * u32::from(attempt.saturating_sub(1))
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_base: Duration::from_millis(100),
            retry_delay_step: Duration::from_millis(1000),
        }
    }
}

/// Destination for outbound frames and node wake-up signals.
///
/// Implemented by [`EngineHandle`](crate::engine::EngineHandle); the
/// orchestrator only talks to the link through this trait.
pub trait FrameSink: Send {
    /// Queue a frame. Never blocks; fails with `QueueFull` at capacity.
    fn enqueue(&self, frame: OutboundDataFrame) -> Result<()>;

    /// Release frames held for a sleeping node.
    fn node_awake(&self, node_id: NodeId) -> Result<()>;

    /// Hold further frames for a node until it wakes up again.
    fn node_asleep(&self, node_id: NodeId) -> Result<()>;
}
