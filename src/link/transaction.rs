//! Transaction state machine.
//!
//! A [`Transaction`] follows one outbound request from the moment the queue
//! releases it until it is terminal:
//!
//! ```text
//! Created ─► Sent ─► AckReceived ─┬─► Completed
//!    ▲         │                  └─► AwaitingCallback ─► Completed
//!    └─ retry ─┤                                 │
//!              └────────────► Failed ◄───────────┘
//! ```
//!
//! After the ACK the transaction works through a plan of expected frames
//! (response, callback, node update) derived from the request. Time is passed
//! in explicitly so every transition is deterministic under test.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;

use super::LinkConfig;
use crate::error::Result;
use crate::protocol::{function, tx_status, DataFrame, NodeId, Origin};

/// Identifier assigned when a transaction is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Waiting for (re)transmission.
    Created,
    /// Written, waiting for ACK.
    Sent,
    AckReceived,
    /// ACKed, waiting for response/callback frames.
    AwaitingCallback,
    Completed,
    Failed,
}

/// Why a transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransactionFailure {
    /// Never ACKed by the controller.
    #[error("no ACK from controller after {attempts} attempts")]
    LinkLevel { attempts: u8 },

    /// Controller ACKed, but the target node never acknowledged.
    #[error("target node did not acknowledge (tx status {tx_status:#04x})")]
    NetworkLevel { tx_status: u8 },

    /// Controller answered "not accepted".
    #[error("request rejected by controller")]
    Rejected,

    /// Response or callback did not arrive in time.
    #[error("timed out waiting for {}", if *awaiting_callback { "callback" } else { "response" })]
    Timeout { awaiting_callback: bool },

    /// Engine stopped while the transaction was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl TransactionFailure {
    /// Whether the failure says something about the target node's reachability.
    pub fn blames_node(&self) -> bool {
        matches!(
            self,
            Self::NetworkLevel { .. } | Self::Timeout { awaiting_callback: true }
        )
    }
}

/// One frame the transaction still waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Response(u8),
    Callback { function: u8, callback_id: u8 },
    NodeUpdate(NodeId),
}

impl Expect {
    fn matches(&self, frame: &DataFrame) -> bool {
        match *self {
            Expect::Response(func) => frame.is_response() && frame.function() == func,
            Expect::Callback {
                function,
                callback_id,
            } => {
                !frame.is_response()
                    && frame.origin() == Origin::Controller
                    && frame.function() == function
                    && frame.callback_id() == Some(callback_id)
            }
            Expect::NodeUpdate(node) => match frame {
                DataFrame::ApplicationUpdate(update) => {
                    update.target_node() == Some(node) || update.did_info_request_fail()
                }
                _ => false,
            },
        }
    }
}

/// Expected replies for a request, in arrival order.
fn plan(frame: &DataFrame) -> VecDeque<Expect> {
    let mut plan = VecDeque::new();
    match frame {
        DataFrame::VersionRequest
        | DataFrame::MemoryGetIdRequest
        | DataFrame::InitDataRequest
        | DataFrame::NodeProtocolInfoRequest { .. } => plan.push_back(Expect::Response(frame.function())),
        DataFrame::SendData(send) => {
            plan.push_back(Expect::Response(function::SEND_DATA));
            plan.push_back(Expect::Callback {
                function: function::SEND_DATA,
                callback_id: send.callback_id,
            });
        }
        DataFrame::RequestNodeInfo { node_id } => {
            plan.push_back(Expect::Response(function::REQUEST_NODE_INFO));
            plan.push_back(Expect::NodeUpdate(*node_id));
        }
        DataFrame::SetDefault { callback_id } => plan.push_back(Expect::Callback {
            function: function::SET_DEFAULT,
            callback_id: *callback_id,
        }),
        _ => {}
    }
    plan
}

/// Correlated lifecycle of one outbound request.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    frame: DataFrame,
    state: TransactionState,
    retries: u8,
    expected: VecDeque<Expect>,
    /// Retransmit time in `Created`, response deadline in `AwaitingCallback`.
    deadline: Option<Instant>,
    failure: Option<TransactionFailure>,
}

impl Transaction {
    pub fn new(id: TransactionId, frame: DataFrame) -> Self {
        let expected = plan(&frame);
        Self {
            id,
            frame,
            state: TransactionState::Created,
            retries: 0,
            expected,
            deadline: None,
            failure: None,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Retransmissions performed so far.
    pub fn retries(&self) -> u8 {
        self.retries
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.frame.target_node()
    }

    pub fn failure(&self) -> Option<TransactionFailure> {
        self.failure
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TransactionState::Completed | TransactionState::Failed)
    }

    /// Wire bytes of the request.
    pub fn encode(&self) -> Result<Bytes> {
        self.frame.encode()
    }

    /// Whether the (re)transmission may happen now.
    pub fn is_transmit_due(&self, now: Instant) -> bool {
        self.state == TransactionState::Created && self.deadline.map_or(true, |at| at <= now)
    }

    /// Frame handed to the writer.
    pub fn on_sent(&mut self) {
        if self.state == TransactionState::Created {
            self.state = TransactionState::Sent;
            self.deadline = None;
        }
    }

    /// ACK observed for the last transmission.
    pub fn on_ack(&mut self, now: Instant, config: &LinkConfig) {
        if self.state != TransactionState::Sent {
            return;
        }
        self.state = TransactionState::AckReceived;
        self.advance(now, config);
    }

    /// NAK, CAN or ACK timeout for the last transmission.
    pub fn on_link_failure(&mut self, now: Instant, config: &LinkConfig) {
        if self.state != TransactionState::Sent {
            return;
        }
        if self.retries < config.max_retries {
            self.retries += 1;
            self.state = TransactionState::Created;
            self.deadline = Some(now + config.retransmit_delay(self.retries));
        } else {
            self.fail(TransactionFailure::LinkLevel {
                attempts: self.retries + 1,
            });
        }
    }

    /// Whether an inbound frame is the next one this transaction waits for.
    pub fn matches(&self, frame: &DataFrame) -> bool {
        matches!(
            self.state,
            TransactionState::Sent | TransactionState::AckReceived | TransactionState::AwaitingCallback
        ) && self.expected.front().is_some_and(|expect| expect.matches(frame))
    }

    /// Consume a frame previously checked with [`matches`](Self::matches).
    pub fn on_frame(&mut self, frame: &DataFrame, now: Instant, config: &LinkConfig) {
        if !self.matches(frame) {
            return;
        }
        self.expected.pop_front();

        match frame {
            DataFrame::SendDataResponse { accepted: false }
            | DataFrame::RequestNodeInfoResponse { accepted: false } => {
                self.fail(TransactionFailure::Rejected);
            }
            DataFrame::SendDataCallback { tx_status: status, .. }
                if *status != tx_status::COMPLETE_OK =>
            {
                self.fail(TransactionFailure::NetworkLevel { tx_status: *status });
            }
            _ => self.advance(now, config),
        }
    }

    /// Fire the response timeout if its deadline has passed.
    pub fn poll_timeout(&mut self, now: Instant) {
        if self.state != TransactionState::AwaitingCallback {
            return;
        }
        if self.deadline.is_some_and(|at| at <= now) {
            let awaiting_callback = !matches!(self.expected.front(), Some(Expect::Response(_)));
            self.fail(TransactionFailure::Timeout { awaiting_callback });
        }
    }

    /// Terminate as rejected without transmitting.
    pub fn refuse(&mut self) {
        if !self.is_terminal() {
            self.fail(TransactionFailure::Rejected);
        }
    }

    /// Terminate immediately as cancelled.
    pub fn abort(&mut self) {
        if !self.is_terminal() {
            self.fail(TransactionFailure::Cancelled);
        }
    }

    fn advance(&mut self, now: Instant, config: &LinkConfig) {
        if self.expected.is_empty() {
            self.state = TransactionState::Completed;
            self.deadline = None;
        } else {
            self.state = TransactionState::AwaitingCallback;
            self.deadline = Some(now + config.response_timeout);
        }
    }

    fn fail(&mut self, failure: TransactionFailure) {
        self.state = TransactionState::Failed;
        self.deadline = None;
        self.failure = Some(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{update_status, ApplicationUpdate, NodeInfo};
    use tokio::time::Duration;

    fn send_data(callback_id: u8) -> Transaction {
        let mut frame = DataFrame::send_data(5, vec![0x20, 0x01, 0xFF]);
        frame.assign_callback_id(callback_id);
        Transaction::new(TransactionId(1), frame)
    }

    fn sent(mut tx: Transaction) -> Transaction {
        tx.on_sent();
        tx
    }

    #[test]
    fn test_version_completes_on_response() {
        let config = LinkConfig::default();
        let now = Instant::now();
        let mut tx = sent(Transaction::new(TransactionId(1), DataFrame::VersionRequest));

        tx.on_ack(now, &config);
        assert_eq!(tx.state(), TransactionState::AwaitingCallback);
        assert_eq!(tx.deadline(), Some(now + config.response_timeout));

        let response = DataFrame::Version {
            library_version: "Z-Wave 2.78".into(),
            library_type: 1,
        };
        assert!(tx.matches(&response));
        tx.on_frame(&response, now, &config);
        assert_eq!(tx.state(), TransactionState::Completed);
    }

    #[test]
    fn test_ack_only_request_completes_on_ack() {
        let config = LinkConfig::default();
        let frame = DataFrame::AddNodeToNetwork {
            mode: 1,
            callback_id: 3,
        };
        let mut tx = sent(Transaction::new(TransactionId(1), frame));
        tx.on_ack(Instant::now(), &config);
        assert_eq!(tx.state(), TransactionState::Completed);
    }

    #[test]
    fn test_send_data_needs_response_and_callback() {
        let config = LinkConfig::default();
        let now = Instant::now();
        let mut tx = sent(send_data(9));
        tx.on_ack(now, &config);

        let callback = DataFrame::SendDataCallback {
            callback_id: 9,
            tx_status: tx_status::COMPLETE_OK,
        };
        // callback before response is out of order
        assert!(!tx.matches(&callback));

        tx.on_frame(&DataFrame::SendDataResponse { accepted: true }, now, &config);
        assert_eq!(tx.state(), TransactionState::AwaitingCallback);

        let wrong_id = DataFrame::SendDataCallback {
            callback_id: 8,
            tx_status: tx_status::COMPLETE_OK,
        };
        assert!(!tx.matches(&wrong_id));

        tx.on_frame(&callback, now, &config);
        assert_eq!(tx.state(), TransactionState::Completed);
    }

    #[test]
    fn test_send_data_rejected() {
        let config = LinkConfig::default();
        let now = Instant::now();
        let mut tx = sent(send_data(9));
        tx.on_ack(now, &config);
        tx.on_frame(&DataFrame::SendDataResponse { accepted: false }, now, &config);
        assert_eq!(tx.failure(), Some(TransactionFailure::Rejected));
    }

    #[test]
    fn test_send_data_no_ack_from_node() {
        let config = LinkConfig::default();
        let now = Instant::now();
        let mut tx = sent(send_data(9));
        tx.on_ack(now, &config);
        tx.on_frame(&DataFrame::SendDataResponse { accepted: true }, now, &config);
        tx.on_frame(
            &DataFrame::SendDataCallback {
                callback_id: 9,
                tx_status: tx_status::NO_ACK,
            },
            now,
            &config,
        );
        let failure = tx.failure().unwrap();
        assert_eq!(failure, TransactionFailure::NetworkLevel { tx_status: tx_status::NO_ACK });
        assert!(failure.blames_node());
    }

    #[test]
    fn test_request_node_info_waits_for_update() {
        let config = LinkConfig::default();
        let now = Instant::now();
        let mut tx = sent(Transaction::new(
            TransactionId(1),
            DataFrame::RequestNodeInfo { node_id: 4 },
        ));
        tx.on_ack(now, &config);
        tx.on_frame(&DataFrame::RequestNodeInfoResponse { accepted: true }, now, &config);

        let other = DataFrame::ApplicationUpdate(ApplicationUpdate {
            status: update_status::NODE_INFO_RECEIVED,
            node_id: 6,
            info: Some(NodeInfo::new(6, 4, 0x10, 1)),
        });
        assert!(!tx.matches(&other));

        let failed = DataFrame::ApplicationUpdate(ApplicationUpdate {
            status: update_status::NODE_INFO_REQ_FAILED,
            node_id: 0,
            info: None,
        });
        tx.on_frame(&failed, now, &config);
        assert_eq!(tx.state(), TransactionState::Completed);
    }

    #[test]
    fn test_retry_schedule_and_budget() {
        let config = LinkConfig::default();
        let now = Instant::now();
        let mut tx = sent(Transaction::new(TransactionId(1), DataFrame::VersionRequest));

        for attempt in 1..=config.max_retries {
            tx.on_link_failure(now, &config);
            assert_eq!(tx.state(), TransactionState::Created);
            assert_eq!(tx.retries(), attempt);

            let due = now + config.retransmit_delay(attempt);
            assert!(!tx.is_transmit_due(due - Duration::from_millis(1)));
            assert!(tx.is_transmit_due(due));
            tx.on_sent();
        }

        tx.on_link_failure(now, &config);
        assert_eq!(
            tx.failure(),
            Some(TransactionFailure::LinkLevel {
                attempts: config.max_retries + 1
            })
        );
    }

    #[test]
    fn test_response_timeout_fires_once() {
        let config = LinkConfig::default();
        let now = Instant::now();
        let mut tx = sent(Transaction::new(TransactionId(1), DataFrame::MemoryGetIdRequest));
        tx.on_ack(now, &config);

        tx.poll_timeout(now + config.response_timeout - Duration::from_millis(1));
        assert_eq!(tx.state(), TransactionState::AwaitingCallback);

        tx.poll_timeout(now + config.response_timeout);
        assert_eq!(
            tx.failure(),
            Some(TransactionFailure::Timeout {
                awaiting_callback: false
            })
        );
        assert_eq!(tx.deadline(), None);
    }

    #[test]
    fn test_send_data_response_timeout_spares_node() {
        let config = LinkConfig::default();
        let now = Instant::now();
        let mut tx = sent(send_data(4));
        tx.on_ack(now, &config);
        tx.poll_timeout(now + config.response_timeout);

        let failure = tx.failure().unwrap();
        assert_eq!(failure, TransactionFailure::Timeout { awaiting_callback: false });
        assert!(!failure.blames_node());
        assert_eq!(failure.to_string(), "timed out waiting for response");
    }

    #[test]
    fn test_send_data_callback_timeout_blames_node() {
        let config = LinkConfig::default();
        let now = Instant::now();
        let mut tx = sent(send_data(4));
        tx.on_ack(now, &config);
        tx.on_frame(&DataFrame::SendDataResponse { accepted: true }, now, &config);
        tx.poll_timeout(now + config.response_timeout);

        let failure = tx.failure().unwrap();
        assert_eq!(failure, TransactionFailure::Timeout { awaiting_callback: true });
        assert!(failure.blames_node());
        assert_eq!(failure.to_string(), "timed out waiting for callback");
    }

    #[test]
    fn test_abort_is_terminal() {
        let mut tx = sent(send_data(1));
        tx.abort();
        assert!(tx.is_terminal());
        assert_eq!(tx.failure(), Some(TransactionFailure::Cancelled));
        assert!(!TransactionFailure::Cancelled.blames_node());
    }

    #[test]
    fn test_display_id() {
        assert_eq!(TransactionId(42).to_string(), "tx#42");
    }
}
