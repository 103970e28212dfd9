//! Codec module - serialization of persisted node records.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//!
//! # Example
//!
//! ```
//! use zwave_serial::codec::MsgPackCodec;
//! use zwave_serial::protocol::NodeInfo;
//!
//! let info = NodeInfo::new(4, 0x04, 0x10, 0x01);
//! let encoded = MsgPackCodec::encode(&info).unwrap();
//! let decoded: NodeInfo = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, info);
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
