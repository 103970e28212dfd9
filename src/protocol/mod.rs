//! Protocol module - wire format, framing, and typed messages.
//!
//! This module implements the Z-Wave serial API byte protocol:
//! - Frame layout, control bytes and checksum
//! - Resumable frame buffer for fragmented serial reads
//! - Typed [`DataFrame`] view of every supported function

mod frame;
mod frame_buffer;
mod message;
mod node_info;
mod wire_format;

pub use frame::Frame;
pub use frame_buffer::{FrameBuffer, Inbound, InvalidFrame, DEFAULT_RECEIVE_TIMEOUT};
pub use message::{
    tx_options, tx_status, DataFrame, InitData, Origin, SendData, MAX_NODE_ID, NODE_BITMASK_LEN,
};
pub use node_info::{
    network_management, update_status, ApplicationCommand, ApplicationUpdate, NetworkUpdate,
    NodeId, NodeInfo, NodeProtocolInfo, WAKE_UP_COMMAND_CLASS,
};
pub use wire_format::{
    checksum, function, FrameType, ACK, CAN, LEN_OVERHEAD, MAX_PAYLOAD_SIZE,
    MIN_LENGTH, NAK, SOF,
};
