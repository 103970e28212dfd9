//! Single-byte ACK/NAK/CAN handshake.
//!
//! Every outbound frame must be acknowledged before anything else is sent.
//! The [`AckHandler`] tracks whether an ACK is outstanding, owns the ACK
//! deadline and turns control bytes into link outcomes for the transaction
//! layer.

use serde::Serialize;
use tokio::time::{Duration, Instant};

/// Link-level control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Ack,
    Nak,
    Can,
}

/// Why an outbound frame was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFailure {
    /// Controller rejected the frame checksum.
    Nak,
    /// Controller was transmitting and dropped our frame.
    Can,
    /// No control byte within the ACK timeout.
    AckTimeout,
}

/// Result of feeding a control byte to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Outstanding frame acknowledged.
    Delivered,
    /// Outstanding frame was not delivered.
    Failed(LinkFailure),
    /// No ACK was outstanding.
    Unexpected,
}

/// Link counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub retransmissions: u64,
    pub acks: u64,
    pub naks: u64,
    pub cans: u64,
    pub ack_timeouts: u64,
    pub invalid_frames: u64,
    pub unexpected_control: u64,
}

/// ACK tracker for the outbound direction.
#[derive(Debug)]
pub struct AckHandler {
    ack_timeout: Duration,
    /// Deadline of the outstanding ACK.
    awaiting: Option<Instant>,
    stats: LinkStats,
}

impl AckHandler {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            ack_timeout,
            awaiting: None,
            stats: LinkStats::default(),
        }
    }

    /// A frame was written; start waiting for its ACK.
    pub fn on_frame_sent(&mut self, now: Instant) {
        self.stats.frames_sent += 1;
        self.awaiting = Some(now + self.ack_timeout);
    }

    /// Whether a written frame still waits for its ACK.
    #[inline]
    pub fn is_awaiting(&self) -> bool {
        self.awaiting.is_some()
    }

    /// ACK deadline, if one is outstanding.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.awaiting
    }

    /// Feed one inbound control byte.
    pub fn on_control(&mut self, control: Control) -> AckOutcome {
        match control {
            Control::Ack => self.stats.acks += 1,
            Control::Nak => self.stats.naks += 1,
            Control::Can => self.stats.cans += 1,
        }

        if self.awaiting.take().is_none() {
            self.stats.unexpected_control += 1;
            tracing::debug!(?control, "control byte with no frame outstanding, ignoring");
            return AckOutcome::Unexpected;
        }

        match control {
            Control::Ack => AckOutcome::Delivered,
            Control::Nak => AckOutcome::Failed(LinkFailure::Nak),
            Control::Can => AckOutcome::Failed(LinkFailure::Can),
        }
    }

    /// Fire the ACK timeout if its deadline has passed. Fires at most once per send.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<LinkFailure> {
        match self.awaiting {
            Some(deadline) if deadline <= now => {
                self.awaiting = None;
                self.stats.ack_timeouts += 1;
                Some(LinkFailure::AckTimeout)
            }
            _ => None,
        }
    }

    /// A response arrived for the outstanding frame, which implies delivery.
    pub fn on_implicit_ack(&mut self) {
        self.awaiting = None;
    }

    pub fn record_frame_received(&mut self) {
        self.stats.frames_received += 1;
    }

    pub fn record_invalid_frame(&mut self) {
        self.stats.invalid_frames += 1;
    }

    pub fn record_retransmission(&mut self) {
        self.stats.retransmissions += 1;
    }

    /// Stop waiting without an outcome (shutdown).
    pub fn reset(&mut self) {
        self.awaiting = None;
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}
