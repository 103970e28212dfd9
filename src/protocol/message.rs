//! Typed serial API messages.
//!
//! [`DataFrame`] is the typed view of a [`Frame`]. Request frames sharing a
//! function id look different depending on who sent them (a host SendData
//! request vs. the controller's SendData callback), so decoding takes the
//! [`Origin`] of the frame.
//!
//! # Example
//!
//! ```
//! use zwave_serial::protocol::{DataFrame, Origin};
//!
//! let request = DataFrame::send_data(5, vec![0x20, 0x01, 0xFF]);
//! let frame = request.to_frame().unwrap();
//! assert_eq!(DataFrame::decode(&frame, Origin::Host), request);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::node_info::{
    ApplicationCommand, ApplicationUpdate, NetworkUpdate, NodeId, NodeInfo, NodeProtocolInfo,
};
use super::wire_format::{function, FrameType};
use super::Frame;
use crate::error::{Result, ZWaveError};

/// Size of the node bitmask in SerialApiGetInitData (232 nodes).
pub const NODE_BITMASK_LEN: usize = 29;

/// Highest valid node id.
pub const MAX_NODE_ID: NodeId = 232;

/// SendData transmit options.
pub mod tx_options {
    pub const ACK: u8 = 0x01;
    pub const LOW_POWER: u8 = 0x02;
    pub const AUTO_ROUTE: u8 = 0x04;
    pub const NO_ROUTE: u8 = 0x10;
    pub const EXPLORE: u8 = 0x20;
    /// ACK + AUTO_ROUTE + EXPLORE.
    pub const DEFAULT: u8 = ACK | AUTO_ROUTE | EXPLORE;
}

/// SendData callback transmit status.
pub mod tx_status {
    pub const COMPLETE_OK: u8 = 0x00;
    pub const NO_ACK: u8 = 0x01;
    pub const FAIL: u8 = 0x02;
}

/// Which side of the serial link produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// This library.
    Host,
    /// The Z-Wave controller firmware.
    Controller,
}

/// SerialApiGetInitData response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub api_version: u8,
    pub capabilities: u8,
    /// Node ids present in the network, ascending.
    pub node_ids: Vec<NodeId>,
    pub chip_type: u8,
    pub chip_version: u8,
}

/// SendData request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendData {
    pub node_id: NodeId,
    /// Command class payload delivered to the node.
    pub data: Bytes,
    pub tx_options: u8,
    /// Assigned by the engine when the frame is dispatched.
    pub callback_id: u8,
}

/// A typed serial API message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFrame {
    VersionRequest,
    Version { library_version: String, library_type: u8 },
    MemoryGetIdRequest,
    MemoryGetId { home_id: u32, node_id: NodeId },
    InitDataRequest,
    InitData(InitData),
    NodeProtocolInfoRequest { node_id: NodeId },
    NodeProtocolInfo(NodeProtocolInfo),
    SendData(SendData),
    SendDataResponse { accepted: bool },
    SendDataCallback { callback_id: u8, tx_status: u8 },
    RequestNodeInfo { node_id: NodeId },
    RequestNodeInfoResponse { accepted: bool },
    ApplicationCommand(ApplicationCommand),
    ApplicationUpdate(ApplicationUpdate),
    AddNodeToNetwork { mode: u8, callback_id: u8 },
    AddNodeStatus(NetworkUpdate),
    RemoveNodeFromNetwork { mode: u8, callback_id: u8 },
    RemoveNodeStatus(NetworkUpdate),
    SetDefault { callback_id: u8 },
    SetDefaultCallback { callback_id: u8 },
    /// Structurally valid frame this library has no typed view for.
    Unknown(Frame),
}

impl DataFrame {
    /// SendData request with default transmit options.
    pub fn send_data(node_id: NodeId, data: impl Into<Bytes>) -> Self {
        DataFrame::SendData(SendData {
            node_id,
            data: data.into(),
            tx_options: tx_options::DEFAULT,
            callback_id: 0,
        })
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            DataFrame::VersionRequest | DataFrame::Version { .. } => "GetVersion",
            DataFrame::MemoryGetIdRequest | DataFrame::MemoryGetId { .. } => "MemoryGetId",
            DataFrame::InitDataRequest | DataFrame::InitData(_) => "SerialApiGetInitData",
            DataFrame::NodeProtocolInfoRequest { .. } | DataFrame::NodeProtocolInfo(_) => {
                "GetNodeProtocolInfo"
            }
            DataFrame::SendData(_) => "SendData",
            DataFrame::SendDataResponse { .. } => "SendDataResponse",
            DataFrame::SendDataCallback { .. } => "SendDataCallback",
            DataFrame::RequestNodeInfo { .. } | DataFrame::RequestNodeInfoResponse { .. } => {
                "RequestNodeInfo"
            }
            DataFrame::ApplicationCommand(_) => "ApplicationCommandHandler",
            DataFrame::ApplicationUpdate(_) => "ApplicationUpdate",
            DataFrame::AddNodeToNetwork { .. } | DataFrame::AddNodeStatus(_) => "AddNodeToNetwork",
            DataFrame::RemoveNodeFromNetwork { .. } | DataFrame::RemoveNodeStatus(_) => {
                "RemoveNodeFromNetwork"
            }
            DataFrame::SetDefault { .. } | DataFrame::SetDefaultCallback { .. } => "SetDefault",
            DataFrame::Unknown(_) => "Unknown",
        }
    }

    /// Serial API function id.
    pub fn function(&self) -> u8 {
        match self {
            DataFrame::VersionRequest | DataFrame::Version { .. } => function::GET_VERSION,
            DataFrame::MemoryGetIdRequest | DataFrame::MemoryGetId { .. } => function::MEMORY_GET_ID,
            DataFrame::InitDataRequest | DataFrame::InitData(_) => function::SERIAL_API_GET_INIT_DATA,
            DataFrame::NodeProtocolInfoRequest { .. } | DataFrame::NodeProtocolInfo(_) => {
                function::GET_NODE_PROTOCOL_INFO
            }
            DataFrame::SendData(_)
            | DataFrame::SendDataResponse { .. }
            | DataFrame::SendDataCallback { .. } => function::SEND_DATA,
            DataFrame::RequestNodeInfo { .. } | DataFrame::RequestNodeInfoResponse { .. } => {
                function::REQUEST_NODE_INFO
            }
            DataFrame::ApplicationCommand(_) => function::APPLICATION_COMMAND_HANDLER,
            DataFrame::ApplicationUpdate(_) => function::APPLICATION_UPDATE,
            DataFrame::AddNodeToNetwork { .. } | DataFrame::AddNodeStatus(_) => {
                function::ADD_NODE_TO_NETWORK
            }
            DataFrame::RemoveNodeFromNetwork { .. } | DataFrame::RemoveNodeStatus(_) => {
                function::REMOVE_NODE_FROM_NETWORK
            }
            DataFrame::SetDefault { .. } | DataFrame::SetDefaultCallback { .. } => {
                function::SET_DEFAULT
            }
            DataFrame::Unknown(frame) => frame.function,
        }
    }

    /// Side of the link that sends this message.
    pub fn origin(&self) -> Origin {
        match self {
            DataFrame::VersionRequest
            | DataFrame::MemoryGetIdRequest
            | DataFrame::InitDataRequest
            | DataFrame::NodeProtocolInfoRequest { .. }
            | DataFrame::SendData(_)
            | DataFrame::RequestNodeInfo { .. }
            | DataFrame::AddNodeToNetwork { .. }
            | DataFrame::RemoveNodeFromNetwork { .. }
            | DataFrame::SetDefault { .. } => Origin::Host,
            _ => Origin::Controller,
        }
    }

    /// Whether this message travels in a response frame.
    pub fn is_response(&self) -> bool {
        match self {
            DataFrame::Version { .. }
            | DataFrame::MemoryGetId { .. }
            | DataFrame::InitData(_)
            | DataFrame::NodeProtocolInfo(_)
            | DataFrame::SendDataResponse { .. }
            | DataFrame::RequestNodeInfoResponse { .. } => true,
            DataFrame::Unknown(frame) => frame.is_response(),
            _ => false,
        }
    }

    /// Node a host request is addressed to.
    pub fn target_node(&self) -> Option<NodeId> {
        match self {
            DataFrame::SendData(send) => Some(send.node_id),
            DataFrame::RequestNodeInfo { node_id } => Some(*node_id),
            DataFrame::NodeProtocolInfoRequest { node_id } => Some(*node_id),
            _ => None,
        }
    }

    /// Callback id carried by this message, if its layout has one.
    pub fn callback_id(&self) -> Option<u8> {
        match self {
            DataFrame::SendData(send) => Some(send.callback_id),
            DataFrame::SendDataCallback { callback_id, .. }
            | DataFrame::AddNodeToNetwork { callback_id, .. }
            | DataFrame::RemoveNodeFromNetwork { callback_id, .. }
            | DataFrame::SetDefault { callback_id }
            | DataFrame::SetDefaultCallback { callback_id } => Some(*callback_id),
            DataFrame::AddNodeStatus(update) | DataFrame::RemoveNodeStatus(update) => {
                Some(update.callback_id)
            }
            _ => None,
        }
    }

    /// Stamp a callback id on a host request. Returns false if the request has none.
    pub(crate) fn assign_callback_id(&mut self, id: u8) -> bool {
        match self {
            DataFrame::SendData(SendData { callback_id, .. })
            | DataFrame::AddNodeToNetwork { callback_id, .. }
            | DataFrame::RemoveNodeFromNetwork { callback_id, .. }
            | DataFrame::SetDefault { callback_id } => {
                *callback_id = id;
                true
            }
            _ => false,
        }
    }

    /// Build the wire frame.
    ///
    /// Fails with [`ZWaveError::Protocol`] when a length-prefixed field is
    /// longer than a length byte can describe.
    pub fn to_frame(&self) -> Result<Frame> {
        use DataFrame::*;

        let request = |func: u8, payload: &[u8]| Frame::request(func, payload);
        let response = |func: u8, payload: &[u8]| Frame::response(func, payload);

        let frame = match self {
            VersionRequest => request(function::GET_VERSION, &[]),
            Version {
                library_version,
                library_type,
            } => {
                let mut payload = library_version.as_bytes().to_vec();
                payload.push(0);
                payload.push(*library_type);
                response(function::GET_VERSION, &payload)
            }
            MemoryGetIdRequest => request(function::MEMORY_GET_ID, &[]),
            MemoryGetId { home_id, node_id } => {
                let mut payload = home_id.to_be_bytes().to_vec();
                payload.push(*node_id);
                response(function::MEMORY_GET_ID, &payload)
            }
            InitDataRequest => request(function::SERIAL_API_GET_INIT_DATA, &[]),
            InitData(data) => response(function::SERIAL_API_GET_INIT_DATA, &encode_init_data(data)),
            NodeProtocolInfoRequest { node_id } => request(function::GET_NODE_PROTOCOL_INFO, &[*node_id]),
            NodeProtocolInfo(npi) => response(
                function::GET_NODE_PROTOCOL_INFO,
                &[
                    npi.capability,
                    npi.security,
                    0,
                    npi.basic_device_class,
                    npi.generic_device_class,
                    npi.specific_device_class,
                ],
            ),
            SendData(send) => {
                let mut buf = BytesMut::with_capacity(send.data.len() + 4);
                buf.put_u8(send.node_id);
                buf.put_u8(length_prefix("SendData payload", send.data.len())?);
                buf.extend_from_slice(&send.data);
                buf.put_u8(send.tx_options);
                buf.put_u8(send.callback_id);
                request(function::SEND_DATA, &buf)
            }
            SendDataResponse { accepted } => response(function::SEND_DATA, &[*accepted as u8]),
            SendDataCallback {
                callback_id,
                tx_status,
            } => request(function::SEND_DATA, &[*callback_id, *tx_status]),
            RequestNodeInfo { node_id } => request(function::REQUEST_NODE_INFO, &[*node_id]),
            RequestNodeInfoResponse { accepted } => {
                response(function::REQUEST_NODE_INFO, &[*accepted as u8])
            }
            ApplicationCommand(cmd) => {
                let length = length_prefix("application command", cmd.command.len())?;
                let mut payload = vec![cmd.rx_status, cmd.source_node, length];
                payload.extend_from_slice(&cmd.command);
                request(function::APPLICATION_COMMAND_HANDLER, &payload)
            }
            ApplicationUpdate(update) => {
                let block = update.info.as_ref().map(NodeInfo::encode_block).unwrap_or_default();
                let length = length_prefix("node info", block.len())?;
                let mut payload = vec![update.status, update.node_id, length];
                payload.extend_from_slice(&block);
                request(function::APPLICATION_UPDATE, &payload)
            }
            AddNodeToNetwork { mode, callback_id } => {
                request(function::ADD_NODE_TO_NETWORK, &[*mode, *callback_id])
            }
            AddNodeStatus(update) => request(function::ADD_NODE_TO_NETWORK, &encode_network_update(update)?),
            RemoveNodeFromNetwork { mode, callback_id } => {
                request(function::REMOVE_NODE_FROM_NETWORK, &[*mode, *callback_id])
            }
            RemoveNodeStatus(update) => {
                request(function::REMOVE_NODE_FROM_NETWORK, &encode_network_update(update)?)
            }
            SetDefault { callback_id } | SetDefaultCallback { callback_id } => {
                request(function::SET_DEFAULT, &[*callback_id])
            }
            Unknown(frame) => frame.clone(),
        };
        Ok(frame)
    }

    /// Encode straight to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        self.to_frame()?.encode()
    }

    /// Check that the frame can be put on the wire.
    pub fn validate(&self) -> Result<()> {
        self.to_frame()?.length_byte().map(|_| ())
    }

    /// Decode a frame into its typed view.
    ///
    /// Frames with an unknown function id or a payload too short for the
    /// typed layout come back as [`DataFrame::Unknown`].
    pub fn decode(frame: &Frame, origin: Origin) -> DataFrame {
        let parsed = match frame.frame_type {
            FrameType::Response => decode_response(frame.function, &frame.payload),
            FrameType::Request => match origin {
                Origin::Host => decode_host_request(frame.function, &frame.payload),
                Origin::Controller => decode_controller_request(frame.function, &frame.payload),
            },
        };
        parsed.unwrap_or_else(|| DataFrame::Unknown(frame.clone()))
    }
}

fn decode_response(func: u8, p: &[u8]) -> Option<DataFrame> {
    match func {
        function::GET_VERSION => {
            let (&last, head) = p.split_last()?;
            // Version string is NUL-terminated, library type follows.
            let (text, library_type) = match p.iter().position(|&b| b == 0) {
                Some(nul) => (&p[..nul], p.get(nul + 1).copied().unwrap_or(0)),
                None => (head, last),
            };
            let library_version = String::from_utf8_lossy(text).into_owned();
            Some(DataFrame::Version {
                library_version,
                library_type,
            })
        }
        function::MEMORY_GET_ID => {
            let home = p.get(..4)?;
            Some(DataFrame::MemoryGetId {
                home_id: u32::from_be_bytes([home[0], home[1], home[2], home[3]]),
                node_id: *p.get(4)?,
            })
        }
        function::SERIAL_API_GET_INIT_DATA => decode_init_data(p).map(DataFrame::InitData),
        function::GET_NODE_PROTOCOL_INFO => {
            let b = p.get(..6)?;
            Some(DataFrame::NodeProtocolInfo(NodeProtocolInfo {
                capability: b[0],
                security: b[1],
                basic_device_class: b[3],
                generic_device_class: b[4],
                specific_device_class: b[5],
            }))
        }
        function::SEND_DATA => Some(DataFrame::SendDataResponse {
            accepted: *p.first()? != 0,
        }),
        function::REQUEST_NODE_INFO => Some(DataFrame::RequestNodeInfoResponse {
            accepted: *p.first()? != 0,
        }),
        _ => None,
    }
}

fn decode_host_request(func: u8, p: &[u8]) -> Option<DataFrame> {
    match func {
        function::GET_VERSION => Some(DataFrame::VersionRequest),
        function::MEMORY_GET_ID => Some(DataFrame::MemoryGetIdRequest),
        function::SERIAL_API_GET_INIT_DATA => Some(DataFrame::InitDataRequest),
        function::GET_NODE_PROTOCOL_INFO => Some(DataFrame::NodeProtocolInfoRequest {
            node_id: *p.first()?,
        }),
        function::SEND_DATA => {
            let node_id = *p.first()?;
            let len = *p.get(1)? as usize;
            let data = p.get(2..2 + len)?;
            Some(DataFrame::SendData(SendData {
                node_id,
                data: Bytes::copy_from_slice(data),
                tx_options: *p.get(2 + len)?,
                callback_id: *p.get(3 + len)?,
            }))
        }
        function::REQUEST_NODE_INFO => Some(DataFrame::RequestNodeInfo {
            node_id: *p.first()?,
        }),
        function::ADD_NODE_TO_NETWORK => Some(DataFrame::AddNodeToNetwork {
            mode: *p.first()?,
            callback_id: *p.get(1)?,
        }),
        function::REMOVE_NODE_FROM_NETWORK => Some(DataFrame::RemoveNodeFromNetwork {
            mode: *p.first()?,
            callback_id: *p.get(1)?,
        }),
        function::SET_DEFAULT => Some(DataFrame::SetDefault {
            callback_id: *p.first()?,
        }),
        _ => None,
    }
}

fn decode_controller_request(func: u8, p: &[u8]) -> Option<DataFrame> {
    match func {
        function::SEND_DATA => Some(DataFrame::SendDataCallback {
            callback_id: *p.first()?,
            tx_status: *p.get(1)?,
        }),
        function::APPLICATION_COMMAND_HANDLER => {
            let len = *p.get(2)? as usize;
            let command = p.get(3..3 + len)?;
            Some(DataFrame::ApplicationCommand(ApplicationCommand {
                rx_status: p[0],
                source_node: p[1],
                command: Bytes::copy_from_slice(command),
            }))
        }
        function::APPLICATION_UPDATE => {
            let len = *p.get(2)? as usize;
            let block = p.get(3..3 + len)?;
            Some(DataFrame::ApplicationUpdate(ApplicationUpdate {
                status: p[0],
                node_id: p[1],
                info: NodeInfo::parse(p[1], block),
            }))
        }
        function::ADD_NODE_TO_NETWORK => decode_network_update(p).map(DataFrame::AddNodeStatus),
        function::REMOVE_NODE_FROM_NETWORK => {
            decode_network_update(p).map(DataFrame::RemoveNodeStatus)
        }
        function::SET_DEFAULT => Some(DataFrame::SetDefaultCallback {
            callback_id: *p.first()?,
        }),
        _ => None,
    }
}

fn decode_init_data(p: &[u8]) -> Option<InitData> {
    let len = *p.get(2)? as usize;
    let bitmask = p.get(3..3 + len)?;
    let node_ids = bitmask
        .iter()
        .enumerate()
        .flat_map(|(i, byte)| {
            (0..8).filter_map(move |bit| (byte & (1 << bit) != 0).then_some((i * 8 + bit + 1) as NodeId))
        })
        .collect();
    Some(InitData {
        api_version: p[0],
        capabilities: p[1],
        node_ids,
        chip_type: p.get(3 + len).copied().unwrap_or(0),
        chip_version: p.get(4 + len).copied().unwrap_or(0),
    })
}

fn encode_init_data(data: &InitData) -> Vec<u8> {
    let mut bitmask = [0u8; NODE_BITMASK_LEN];
    for &id in &data.node_ids {
        if (1..=MAX_NODE_ID).contains(&id) {
            let index = (id - 1) as usize;
            bitmask[index / 8] |= 1 << (index % 8);
        }
    }
    let mut payload = vec![data.api_version, data.capabilities, NODE_BITMASK_LEN as u8];
    payload.extend_from_slice(&bitmask);
    payload.push(data.chip_type);
    payload.push(data.chip_version);
    payload
}

fn decode_network_update(p: &[u8]) -> Option<NetworkUpdate> {
    let source = *p.get(2)?;
    let len = p.get(3).copied().unwrap_or(0) as usize;
    let info = p.get(4..4 + len).and_then(|block| NodeInfo::parse(source, block));
    Some(NetworkUpdate {
        callback_id: p[0],
        status: p[1],
        source,
        info,
    })
}

fn encode_network_update(update: &NetworkUpdate) -> Result<Vec<u8>> {
    let block = update.info.as_ref().map(NodeInfo::encode_block).unwrap_or_default();
    let length = length_prefix("node info", block.len())?;
    let mut payload = vec![update.callback_id, update.status, update.source, length];
    payload.extend_from_slice(&block);
    Ok(payload)
}

fn length_prefix(field: &str, len: usize) -> Result<u8> {
    u8::try_from(len)
        .map_err(|_| ZWaveError::Protocol(format!("{} of {} bytes does not fit a frame", field, len)))
}
