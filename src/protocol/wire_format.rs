//! Wire format constants and checksum.
//!
//! Implements the Z-Wave serial API framing:
//! ```text
//! ┌─────┬─────┬──────┬──────┬───────────┬──────────┐
//! │ SOF │ LEN │ TYPE │ FUNC │ payload   │ CHECKSUM │
//! │0x01 │ 1 B │ 1 B  │ 1 B  │ LEN-3 B   │ 1 B      │
//! └─────┴─────┴──────┴──────┴───────────┴──────────┘
//! ```
//!
//! `LEN` counts every byte from `TYPE` through `CHECKSUM`. The checksum is
//! `0xFF` XOR-ed with every byte from `LEN` through the last payload byte.
//! ACK, NAK and CAN travel as lone bytes outside any frame.

/// Start of frame marker.
pub const SOF: u8 = 0x01;

/// Link-level acknowledge.
pub const ACK: u8 = 0x06;

/// Link-level negative acknowledge (checksum failure at the receiver).
pub const NAK: u8 = 0x15;

/// Link-level cancel (receiver was busy sending its own frame).
pub const CAN: u8 = 0x18;

/// Bytes counted by `LEN` that are not payload: type, function id, checksum.
pub const LEN_OVERHEAD: usize = 3;

/// Smallest legal `LEN` value (a frame without payload).
pub const MIN_LENGTH: u8 = LEN_OVERHEAD as u8;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize - LEN_OVERHEAD;

/// Serial API function identifiers.
pub mod function {
    pub const SERIAL_API_GET_INIT_DATA: u8 = 0x02;
    pub const APPLICATION_COMMAND_HANDLER: u8 = 0x04;
    pub const SEND_DATA: u8 = 0x13;
    pub const GET_VERSION: u8 = 0x15;
    pub const MEMORY_GET_ID: u8 = 0x20;
    pub const GET_NODE_PROTOCOL_INFO: u8 = 0x41;
    pub const SET_DEFAULT: u8 = 0x42;
    pub const APPLICATION_UPDATE: u8 = 0x49;
    pub const ADD_NODE_TO_NETWORK: u8 = 0x4A;
    pub const REMOVE_NODE_FROM_NETWORK: u8 = 0x4B;
    pub const REQUEST_NODE_INFO: u8 = 0x60;
}

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Host-initiated request, or an unsolicited/callback request from the controller.
    Request = 0x00,
    /// Direct response to a request.
    Response = 0x01,
}

impl FrameType {
    /// Parse the type byte. Returns `None` for anything but 0x00/0x01.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Request),
            0x01 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Compute the checksum over `LEN`, `TYPE`, `FUNC` and payload.
///
/// # Example
///
/// ```
/// use zwave_serial::protocol::checksum;
///
/// // GetVersion request: LEN=0x03, TYPE=0x00, FUNC=0x15
/// assert_eq!(checksum(&[0x03, 0x00, 0x15]), 0xE9);
/// ```
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0xFF, |acc, b| acc ^ b)
}
