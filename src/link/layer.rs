//! Sans-IO link layer.
//!
//! [`LinkLayer`] owns the ACK handler, the outbound queue and the single
//! active transaction. It is fed inbound items, commands and the current
//! time, and leaves its results in an output queue drained with
//! [`poll_output`](LinkLayer::poll_output).
//!
//! Two gates keep the link single-flight: nothing is written while an ACK
//! is outstanding, and the queue releases the next frame only once the
//! active transaction is terminal.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::time::Instant;

use super::ack::{AckHandler, AckOutcome, Control, LinkStats};
use super::queue::{FrameQueue, OutboundDataFrame};
use super::transaction::{Transaction, TransactionFailure, TransactionId, TransactionState};
use super::LinkConfig;
use crate::backpressure::QueueCapacity;
use crate::error::Result;
use crate::protocol::{DataFrame, Inbound, NodeId, Origin, ACK, NAK};

/// Transaction a received frame was correlated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionContext {
    pub id: TransactionId,
    /// Target node of the request.
    pub node_id: Option<NodeId>,
    /// Function id of the request.
    pub function: u8,
}

/// Event published to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    TransactionStarted {
        id: TransactionId,
        node_id: Option<NodeId>,
    },
    TransactionCompleted {
        id: TransactionId,
        node_id: Option<NodeId>,
        request: DataFrame,
    },
    TransactionFailed {
        id: TransactionId,
        node_id: Option<NodeId>,
        request: DataFrame,
        failure: TransactionFailure,
    },
    /// Valid inbound frame, with its transaction if it was an expected reply.
    Frame {
        frame: DataFrame,
        transaction: Option<TransactionContext>,
    },
}

/// Work produced by the link layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Bytes for the serial writer.
    Write(Bytes),
    Event(LinkEvent),
}

pub struct LinkLayer {
    config: LinkConfig,
    ack: AckHandler,
    queue: FrameQueue,
    active: Option<Transaction>,
    next_transaction: u64,
    next_callback_id: u8,
    outputs: VecDeque<Output>,
}

impl LinkLayer {
    pub fn new(config: LinkConfig, capacity: QueueCapacity) -> Self {
        Self {
            ack: AckHandler::new(config.ack_timeout),
            queue: FrameQueue::new(capacity),
            config,
            active: None,
            next_transaction: 1,
            next_callback_id: 1,
            outputs: VecDeque::new(),
        }
    }

    /// Reserve capacity and queue a frame.
    pub fn enqueue(&mut self, frame: OutboundDataFrame) -> Result<()> {
        self.queue.enqueue(frame)
    }

    /// Queue a frame whose capacity slot is already reserved.
    pub fn enqueue_reserved(&mut self, frame: OutboundDataFrame) {
        self.queue.enqueue_reserved(frame);
    }

    pub fn node_awake(&mut self, node_id: NodeId) {
        self.queue.node_awake(node_id);
    }

    pub fn node_asleep(&mut self, node_id: NodeId) {
        self.queue.node_asleep(node_id);
    }

    /// Process one decoded inbound item.
    pub fn handle_inbound(&mut self, item: Inbound, now: Instant) {
        match item {
            Inbound::Ack => self.on_control(Control::Ack, now),
            Inbound::Nak => self.on_control(Control::Nak, now),
            Inbound::Can => self.on_control(Control::Can, now),
            Inbound::Frame(frame) => {
                self.ack.record_frame_received();
                self.write(Bytes::from_static(&[ACK]));
                let frame = DataFrame::decode(&frame, Origin::Controller);
                tracing::trace!(frame = frame.name(), "frame received");
                self.on_frame(frame, now);
            }
            Inbound::Invalid(reason) => {
                self.ack.record_invalid_frame();
                tracing::warn!(?reason, "invalid frame, sending NAK");
                self.write(Bytes::from_static(&[NAK]));
            }
        }
    }

    /// Fire any deadline that has passed.
    pub fn handle_timeout(&mut self, now: Instant) {
        if let Some(reason) = self.ack.poll_timeout(now) {
            if let Some(tx) = self.active.as_mut() {
                tracing::warn!(tx = %tx.id(), ?reason, retries = tx.retries(), "frame not acknowledged");
                tx.on_link_failure(now, &self.config);
            }
        }
        if let Some(tx) = self.active.as_mut() {
            tx.poll_timeout(now);
        }
        self.finish_if_terminal();
    }

    /// Write the next frame if both ordering gates are open.
    pub fn poll_transmit(&mut self, now: Instant) {
        if self.ack.is_awaiting() {
            return;
        }

        if self.active.is_none() {
            let Some(mut frame) = self.queue.next_ready() else {
                return;
            };
            if frame.callback_id().is_some() {
                let callback_id = self.allocate_callback_id();
                frame.assign_callback_id(callback_id);
            }

            let id = TransactionId(self.next_transaction);
            self.next_transaction += 1;
            let tx = Transaction::new(id, frame);
            tracing::debug!(tx = %id, frame = tx.frame().name(), node = ?tx.node_id(), "transaction started");
            self.emit(LinkEvent::TransactionStarted {
                id,
                node_id: tx.node_id(),
            });
            self.active = Some(tx);
        }

        let Some(tx) = self.active.as_mut() else {
            return;
        };
        if !tx.is_transmit_due(now) {
            return;
        }
        if tx.retries() > 0 {
            self.ack.record_retransmission();
            tracing::debug!(tx = %tx.id(), attempt = tx.retries() + 1, "retransmitting");
        }
        let bytes = match tx.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(tx = %tx.id(), "cannot encode {}: {}", tx.frame().name(), e);
                tx.refuse();
                self.finish_if_terminal();
                return self.poll_transmit(now);
            }
        };
        tx.on_sent();
        self.ack.on_frame_sent(now);
        self.outputs.push_back(Output::Write(bytes));
    }

    /// Earliest instant at which [`handle_timeout`](Self::handle_timeout)
    /// or [`poll_transmit`](Self::poll_transmit) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let tx = self.active.as_ref().and_then(Transaction::deadline);
        match (self.ack.deadline(), tx) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Cancel the active transaction and discard every queued frame.
    pub fn abort(&mut self) {
        self.ack.reset();
        if let Some(tx) = self.active.as_mut() {
            tx.abort();
        }
        self.finish_if_terminal();
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded queued frames");
        }
    }

    /// Take the next pending output.
    pub fn poll_output(&mut self) -> Option<Output> {
        self.outputs.pop_front()
    }

    pub fn active_transaction(&self) -> Option<&Transaction> {
        self.active.as_ref()
    }

    /// Frames waiting in the queue (excluding the active one).
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> LinkStats {
        self.ack.stats()
    }

    fn on_control(&mut self, control: Control, now: Instant) {
        match self.ack.on_control(control) {
            AckOutcome::Delivered => {
                if let Some(tx) = self.active.as_mut() {
                    tx.on_ack(now, &self.config);
                    tracing::trace!(tx = %tx.id(), state = ?tx.state(), "ACK received");
                }
            }
            AckOutcome::Failed(reason) => {
                if let Some(tx) = self.active.as_mut() {
                    tracing::warn!(tx = %tx.id(), ?reason, retries = tx.retries(), "frame not delivered");
                    tx.on_link_failure(now, &self.config);
                }
            }
            AckOutcome::Unexpected => {}
        }
        self.finish_if_terminal();
    }

    fn on_frame(&mut self, frame: DataFrame, now: Instant) {
        let transaction = match self.active.as_mut() {
            Some(tx) if tx.matches(&frame) => {
                if tx.state() == TransactionState::Sent {
                    // Reply proves delivery even if the ACK byte was lost.
                    self.ack.on_implicit_ack();
                    tx.on_ack(now, &self.config);
                }
                tx.on_frame(&frame, now, &self.config);
                Some(TransactionContext {
                    id: tx.id(),
                    node_id: tx.node_id(),
                    function: tx.frame().function(),
                })
            }
            _ => None,
        };
        self.emit(LinkEvent::Frame { frame, transaction });
        self.finish_if_terminal();
    }

    fn finish_if_terminal(&mut self) {
        if !self.active.as_ref().is_some_and(Transaction::is_terminal) {
            return;
        }
        let Some(tx) = self.active.take() else {
            return;
        };

        let id = tx.id();
        let node_id = tx.node_id();
        let event = match tx.failure() {
            None => {
                tracing::debug!(tx = %id, "transaction completed");
                LinkEvent::TransactionCompleted {
                    id,
                    node_id,
                    request: tx.frame().clone(),
                }
            }
            Some(failure) => {
                tracing::warn!(tx = %id, frame = tx.frame().name(), %failure, "transaction failed");
                LinkEvent::TransactionFailed {
                    id,
                    node_id,
                    request: tx.frame().clone(),
                    failure,
                }
            }
        };
        self.emit(event);
    }

    /// Callback ids run 1..=255 and skip 0.
    fn allocate_callback_id(&mut self) -> u8 {
        let id = self.next_callback_id;
        self.next_callback_id = match id {
            u8::MAX => 1,
            n => n + 1,
        };
        id
    }

    fn write(&mut self, bytes: Bytes) {
        self.outputs.push_back(Output::Write(bytes));
    }

    fn emit(&mut self, event: LinkEvent) {
        self.outputs.push_back(Output::Event(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{tx_status, Frame};
    use tokio::time::Duration;

    fn link() -> LinkLayer {
        LinkLayer::new(LinkConfig::default(), QueueCapacity::new(16))
    }

    fn drain(link: &mut LinkLayer) -> (Vec<Bytes>, Vec<LinkEvent>) {
        let mut writes = Vec::new();
        let mut events = Vec::new();
        while let Some(output) = link.poll_output() {
            match output {
                Output::Write(bytes) => writes.push(bytes),
                Output::Event(event) => events.push(event),
            }
        }
        (writes, events)
    }

    fn reply(frame: DataFrame) -> Inbound {
        Inbound::Frame(frame.to_frame().unwrap())
    }

    #[test]
    fn test_single_flight() {
        let mut link = link();
        let now = Instant::now();
        link.enqueue(OutboundDataFrame::listening(DataFrame::VersionRequest)).unwrap();
        link.enqueue(OutboundDataFrame::listening(DataFrame::MemoryGetIdRequest)).unwrap();

        link.poll_transmit(now);
        let (writes, _) = drain(&mut link);
        assert_eq!(writes, vec![DataFrame::VersionRequest.encode().unwrap()]);

        // ACK alone does not open the second gate
        link.handle_inbound(Inbound::Ack, now);
        link.poll_transmit(now);
        let (writes, _) = drain(&mut link);
        assert!(writes.is_empty());

        link.handle_inbound(
            reply(DataFrame::Version {
                library_version: "Z-Wave 2.78".into(),
                library_type: 1,
            }),
            now,
        );
        link.poll_transmit(now);
        let (writes, events) = drain(&mut link);
        assert_eq!(
            writes,
            vec![Bytes::from_static(&[ACK]), DataFrame::MemoryGetIdRequest.encode().unwrap()]
        );
        assert!(matches!(events[0], LinkEvent::Frame { transaction: Some(_), .. }));
        assert!(matches!(events[1], LinkEvent::TransactionCompleted { .. }));
        assert!(matches!(events[2], LinkEvent::TransactionStarted { .. }));
    }

    #[test]
    fn test_retry_bound_without_ack() {
        let config = LinkConfig::default();
        let mut link = link();
        let mut now = Instant::now();
        link.enqueue(OutboundDataFrame::listening(DataFrame::VersionRequest)).unwrap();

        let mut transmissions = 0;
        let mut failure = None;
        for _ in 0..32 {
            link.poll_transmit(now);
            let (writes, events) = drain(&mut link);
            transmissions += writes.len();
            for event in events {
                if let LinkEvent::TransactionFailed { failure: f, .. } = event {
                    failure = Some(f);
                }
            }
            if failure.is_some() {
                break;
            }
            let Some(deadline) = link.next_deadline() else {
                break;
            };
            now = deadline;
            link.handle_timeout(now);
            let (_, events) = drain(&mut link);
            for event in events {
                if let LinkEvent::TransactionFailed { failure: f, .. } = event {
                    failure = Some(f);
                }
            }
        }

        assert_eq!(transmissions, 1 + config.max_retries as usize);
        assert_eq!(
            failure,
            Some(TransactionFailure::LinkLevel {
                attempts: config.max_retries + 1
            })
        );
        assert_eq!(link.stats().retransmissions, config.max_retries as u64);
        assert!(link.active_transaction().is_none());
    }

    #[test]
    fn test_nak_retransmits_same_bytes() {
        let mut link = link();
        let now = Instant::now();
        link.enqueue(OutboundDataFrame::listening(DataFrame::send_data(3, vec![0x20, 0x02])))
            .unwrap();
        link.poll_transmit(now);
        let (first, _) = drain(&mut link);

        link.handle_inbound(Inbound::Nak, now);
        link.poll_transmit(now);
        assert!(drain(&mut link).0.is_empty(), "retransmit waits for its delay");

        let later = now + Duration::from_millis(100);
        link.poll_transmit(later);
        let (second, _) = drain(&mut link);
        assert_eq!(first, second);
    }

    #[test]
    fn test_callback_ids_wrap_and_skip_zero() {
        let mut link = link();
        link.next_callback_id = 254;
        assert_eq!(link.allocate_callback_id(), 254);
        assert_eq!(link.allocate_callback_id(), 255);
        assert_eq!(link.allocate_callback_id(), 1);
    }

    #[test]
    fn test_send_data_round_trip() {
        let mut link = link();
        let now = Instant::now();
        link.enqueue(OutboundDataFrame::listening(DataFrame::send_data(3, vec![0x20, 0x02])))
            .unwrap();
        link.poll_transmit(now);
        let callback_id = link.active_transaction().unwrap().frame().callback_id().unwrap();
        assert_ne!(callback_id, 0);

        link.handle_inbound(Inbound::Ack, now);
        link.handle_inbound(reply(DataFrame::SendDataResponse { accepted: true }), now);
        link.handle_inbound(
            reply(DataFrame::SendDataCallback {
                callback_id,
                tx_status: tx_status::COMPLETE_OK,
            }),
            now,
        );
        let (_, events) = drain(&mut link);
        assert!(matches!(
            events.last(),
            Some(LinkEvent::TransactionCompleted { node_id: Some(3), .. })
        ));
    }

    #[test]
    fn test_response_before_ack_counts_as_delivery() {
        let mut link = link();
        let now = Instant::now();
        link.enqueue(OutboundDataFrame::listening(DataFrame::MemoryGetIdRequest)).unwrap();
        link.poll_transmit(now);

        link.handle_inbound(
            reply(DataFrame::MemoryGetId {
                home_id: 1,
                node_id: 1,
            }),
            now,
        );
        assert!(link.active_transaction().is_none());
        assert_eq!(link.next_deadline(), None);

        // the late ACK is ignored
        link.handle_inbound(Inbound::Ack, now);
        assert_eq!(link.stats().unexpected_control, 1);
    }

    #[test]
    fn test_unsolicited_frame_is_acked_and_surfaced() {
        let mut link = link();
        let now = Instant::now();
        link.handle_inbound(Inbound::Frame(Frame::request(0x99, &[1])), now);

        let (writes, events) = drain(&mut link);
        assert_eq!(writes, vec![Bytes::from_static(&[ACK])]);
        assert!(matches!(
            &events[0],
            LinkEvent::Frame {
                frame: DataFrame::Unknown(_),
                transaction: None
            }
        ));
    }

    #[test]
    fn test_invalid_frame_is_naked() {
        let mut link = link();
        link.handle_inbound(
            Inbound::Invalid(crate::protocol::InvalidFrame::Length(1)),
            Instant::now(),
        );
        let (writes, events) = drain(&mut link);
        assert_eq!(writes, vec![Bytes::from_static(&[NAK])]);
        assert!(events.is_empty());
        assert_eq!(link.stats().invalid_frames, 1);
    }

    #[test]
    fn test_abort_cancels_and_discards() {
        let capacity = QueueCapacity::new(16);
        let mut link = LinkLayer::new(LinkConfig::default(), capacity.clone());
        let now = Instant::now();
        link.enqueue(OutboundDataFrame::listening(DataFrame::VersionRequest)).unwrap();
        link.enqueue(OutboundDataFrame::listening(DataFrame::InitDataRequest)).unwrap();
        link.poll_transmit(now);
        drain(&mut link);

        link.abort();
        let (_, events) = drain(&mut link);
        assert!(matches!(
            events[0],
            LinkEvent::TransactionFailed {
                failure: TransactionFailure::Cancelled,
                ..
            }
        ));
        assert_eq!(link.queued(), 0);
        assert_eq!(capacity.reserved(), 0);
        assert_eq!(link.next_deadline(), None);
    }

    #[test]
    fn test_response_timeout_releases_queue() {
        let config = LinkConfig::default();
        let mut link = link();
        let now = Instant::now();
        link.enqueue(OutboundDataFrame::listening(DataFrame::VersionRequest)).unwrap();
        link.enqueue(OutboundDataFrame::listening(DataFrame::InitDataRequest)).unwrap();
        link.poll_transmit(now);
        link.handle_inbound(Inbound::Ack, now);
        drain(&mut link);

        assert_eq!(link.next_deadline(), Some(now + config.response_timeout));
        let later = now + config.response_timeout;
        link.handle_timeout(later);
        link.poll_transmit(later);
        let (writes, events) = drain(&mut link);
        assert!(matches!(
            events[0],
            LinkEvent::TransactionFailed {
                failure: TransactionFailure::Timeout {
                    awaiting_callback: false
                },
                ..
            }
        ));
        assert_eq!(writes, vec![DataFrame::InitDataRequest.encode().unwrap()]);
    }

    #[test]
    fn test_oversized_send_data_is_refused_at_enqueue() {
        let mut link = link();
        let now = Instant::now();
        let result = link.enqueue(OutboundDataFrame::listening(DataFrame::send_data(3, vec![0u8; 300])));
        assert!(matches!(result, Err(crate::error::ZWaveError::Protocol(_))));

        link.poll_transmit(now);
        let (writes, events) = drain(&mut link);
        assert!(writes.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn test_unencodable_frame_fails_and_next_is_sent() {
        let capacity = QueueCapacity::new(4);
        let mut link = LinkLayer::new(LinkConfig::default(), capacity.clone());
        let now = Instant::now();
        capacity.try_reserve().unwrap();
        link.enqueue_reserved(OutboundDataFrame::listening(DataFrame::send_data(3, vec![0u8; 250])));
        link.enqueue(OutboundDataFrame::listening(DataFrame::VersionRequest)).unwrap();

        link.poll_transmit(now);
        let (writes, events) = drain(&mut link);
        assert_eq!(writes, vec![DataFrame::VersionRequest.encode().unwrap()]);
        assert!(matches!(
            events[1],
            LinkEvent::TransactionFailed {
                failure: TransactionFailure::Rejected,
                node_id: Some(3),
                ..
            }
        ));
        assert!(matches!(events[2], LinkEvent::TransactionStarted { node_id: None, .. }));
    }
}
