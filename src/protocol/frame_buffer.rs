//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented input:
//! - `WaitingForStart`: expecting SOF or a lone ACK/NAK/CAN, anything else is noise
//! - `WaitingForLength`: SOF seen, need the length byte
//! - `WaitingForBody`: length known, need `LEN` more bytes
//!
//! A frame still incomplete when its receive deadline passes gives up only
//! its SOF and the bytes after it are scanned again. A frame failing its
//! checksum does the same when a valid frame can be found behind its SOF,
//! otherwise it is dropped whole. Either way a stray SOF cannot swallow the
//! ACKs and frames that follow it.
//!
//! # Example
//!
//! ```
//! use zwave_serial::protocol::{FrameBuffer, Inbound};
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // ACK followed by half of a GetVersion request
//! assert_eq!(buffer.push(&[0x06, 0x01, 0x03]), vec![Inbound::Ack]);
//!
//! // Remaining bytes complete the frame
//! let items = buffer.push(&[0x00, 0x15, 0xE9]);
//! assert!(matches!(items[0], Inbound::Frame(_)));
//! ```

use bytes::{Buf, BytesMut};
use tokio::time::{Duration, Instant};

use super::wire_format::{checksum, FrameType, ACK, CAN, MIN_LENGTH, NAK, SOF};
use super::Frame;

/// Reason a structured frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidFrame {
    /// Checksum byte did not match the computed value.
    Checksum { expected: u8, actual: u8 },
    /// Length byte too small to hold type, function and checksum.
    Length(u8),
    /// Type byte was neither request nor response.
    FrameType(u8),
    /// Frame still incomplete when its receive deadline passed.
    Incomplete,
}

/// Time allowed for a frame to arrive completely after its SOF.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1500);

/// One item extracted from the inbound byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Lone ACK byte.
    Ack,
    /// Lone NAK byte.
    Nak,
    /// Lone CAN byte.
    Can,
    /// A complete frame with a valid checksum.
    Frame(Frame),
    /// A structured frame that failed validation; must be answered with NAK.
    Invalid(InvalidFrame),
}

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Between frames.
    WaitingForStart,
    /// SOF consumed, length byte pending.
    WaitingForLength,
    /// Length byte peeked (still in buffer), waiting for `length` more bytes after it.
    WaitingForBody { length: u8 },
}

/// Buffer for accumulating incoming bytes and extracting frames and control bytes.
///
/// The decoder is resumable: a frame split over any number of reads
/// assembles exactly as if it had arrived in one piece.
pub struct FrameBuffer {
    /// Accumulated bytes from serial reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Noise bytes skipped between frames.
    discarded: u64,
    /// When the SOF of the partial frame in progress arrived.
    frame_started: Option<Instant>,
    /// Set on the throwaway decoder that looks behind a bad SOF.
    lookahead: bool,
}

impl FrameBuffer {
    /// Create a new frame buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(512),
            state: State::WaitingForStart,
            discarded: 0,
            frame_started: None,
            lookahead: false,
        }
    }

    /// Push data into the buffer and extract all complete items.
    ///
    /// Partial frames are buffered internally for the next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<Inbound> {
        self.push_at(data, Instant::now())
    }

    /// [`push`](Self::push) with the arrival time of `data`.
    pub fn push_at(&mut self, data: &[u8], now: Instant) -> Vec<Inbound> {
        self.buffer.extend_from_slice(data);

        let mut items = Vec::new();
        while let Some(item) = self.try_extract_one(now) {
            items.push(item);
        }
        items
    }

    /// Arrival time of the SOF of an incomplete frame, if one is pending.
    pub fn partial_since(&self) -> Option<Instant> {
        self.frame_started
    }

    /// Give up on the incomplete frame and rescan the bytes after its SOF.
    ///
    /// Returns [`InvalidFrame::Incomplete`] followed by whatever the rescan
    /// extracts, or nothing when no frame was in progress.
    pub fn abandon_partial(&mut self, now: Instant) -> Vec<Inbound> {
        if self.frame_started.is_none() {
            return Vec::new();
        }
        tracing::debug!(buffered = self.buffer.len(), "frame receive timeout, resyncing");
        self.resync();
        let mut items = vec![Inbound::Invalid(InvalidFrame::Incomplete)];
        items.extend(self.push_at(&[], now));
        items
    }

    /// Try to extract a single item from the buffer.
    ///
    /// Returns `None` when more data is needed.
    fn try_extract_one(&mut self, now: Instant) -> Option<Inbound> {
        loop {
            match self.state {
                State::WaitingForStart => {
                    let byte = *self.buffer.first()?;
                    self.buffer.advance(1);
                    match byte {
                        ACK => return Some(Inbound::Ack),
                        NAK => return Some(Inbound::Nak),
                        CAN => return Some(Inbound::Can),
                        SOF => {
                            self.state = State::WaitingForLength;
                            self.frame_started = Some(now);
                        }
                        other => {
                            self.discarded += 1;
                            tracing::trace!(byte = other, "discarding noise byte");
                        }
                    }
                }

                State::WaitingForLength => {
                    let length = *self.buffer.first()?;
                    if length < MIN_LENGTH {
                        // Leave the byte in place: it may be the SOF of the next frame.
                        self.resync();
                        return Some(Inbound::Invalid(InvalidFrame::Length(length)));
                    }
                    self.state = State::WaitingForBody { length };
                }

                State::WaitingForBody { length } => {
                    let total = 1 + length as usize;
                    if self.buffer.len() < total {
                        return None;
                    }

                    let expected = checksum(&self.buffer[..total - 1]);
                    let actual = self.buffer[total - 1];
                    if expected != actual {
                        if !self.lookahead && self.frame_follows_sof(now) {
                            self.resync();
                        } else {
                            self.buffer.advance(total);
                            self.state = State::WaitingForStart;
                            self.frame_started = None;
                        }
                        return Some(Inbound::Invalid(InvalidFrame::Checksum { expected, actual }));
                    }

                    let raw = self.buffer.split_to(total).freeze();
                    self.state = State::WaitingForStart;
                    self.frame_started = None;

                    let Some(frame_type) = FrameType::from_u8(raw[1]) else {
                        return Some(Inbound::Invalid(InvalidFrame::FrameType(raw[1])));
                    };

                    let function = raw[2];
                    let payload = raw.slice(3..total - 1);
                    return Some(Inbound::Frame(Frame::new(frame_type, function, payload)));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of noise bytes discarded so far.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForStart;
        self.frame_started = None;
    }

    /// Whether the bytes after the current SOF decode to a valid frame.
    fn frame_follows_sof(&self, now: Instant) -> bool {
        let mut lookahead = FrameBuffer {
            lookahead: true,
            ..FrameBuffer::new()
        };
        lookahead
            .push_at(&self.buffer, now)
            .iter()
            .any(|item| matches!(item, Inbound::Frame(_)))
    }

    /// Drop the current SOF, keeping every byte after it for rescanning.
    fn resync(&mut self) {
        self.state = State::WaitingForStart;
        self.frame_started = None;
        self.discarded += 1;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForStart => "WaitingForStart",
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
