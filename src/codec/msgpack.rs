//! MsgPack codec using `rmp-serde`.
//!
//! Records are written with `to_vec_named`, so structs become maps keyed by
//! field name. A store file written before a field was added still decodes
//! as long as the new field has a serde default.

use crate::error::Result;

/// MessagePack codec for the node store.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ZWaveError;
    use crate::node::NodeRecord;
    use crate::protocol::NodeInfo;
    use std::collections::BTreeMap;

    fn record(node_id: u8) -> NodeRecord {
        NodeRecord {
            info: NodeInfo::new(node_id, 0x04, 0x10, 0x01).with_command_classes(vec![0x25, 0x86]),
            is_listening: true,
            kind: "generic".into(),
        }
    }

    #[test]
    fn test_record_encode_decode() {
        let original = record(7);
        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: NodeRecord = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_record_is_map_format() {
        let encoded = MsgPackCodec::encode(&record(1)).unwrap();

        // fixmap with 3 entries (info, is_listening, kind)
        assert_eq!(encoded[0], 0x83, "Expected map format, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_record_table() {
        let table: BTreeMap<u8, NodeRecord> = [(2, record(2)), (9, record(9))].into_iter().collect();
        let encoded = MsgPackCodec::encode(&table).unwrap();
        let decoded: BTreeMap<u8, NodeRecord> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<NodeRecord> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(matches!(result, Err(ZWaveError::MsgPackDecode(_))));
    }
}
