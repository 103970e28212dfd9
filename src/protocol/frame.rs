//! Raw frame struct with typed accessors.
//!
//! Represents one complete serial API frame: type, function id and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use zwave_serial::protocol::{function, Frame, FrameType};
//!
//! let frame = Frame::request(function::GET_VERSION, &[]);
//! assert_eq!(&frame.encode().unwrap()[..], &[0x01, 0x03, 0x00, 0x15, 0xE9]);
//! assert_eq!(frame.frame_type(), FrameType::Request);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{checksum, FrameType, LEN_OVERHEAD, MAX_PAYLOAD_SIZE, SOF};
use crate::error::{Result, ZWaveError};

/// A complete, checksum-verified serial API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Request or response.
    pub frame_type: FrameType,
    /// Serial API function id.
    pub function: u8,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame. The payload size is checked when encoding.
    pub fn new(frame_type: FrameType, function: u8, payload: Bytes) -> Self {
        Self {
            frame_type,
            function,
            payload,
        }
    }

    /// Create a request frame (copies payload).
    pub fn request(function: u8, payload: &[u8]) -> Self {
        Self::new(FrameType::Request, function, Bytes::copy_from_slice(payload))
    }

    /// Create a response frame (copies payload).
    pub fn response(function: u8, payload: &[u8]) -> Self {
        Self::new(FrameType::Response, function, Bytes::copy_from_slice(payload))
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Get the function id.
    #[inline]
    pub fn function(&self) -> u8 {
        self.function
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Check if this is a response frame.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.frame_type == FrameType::Response
    }

    /// Value of the `LEN` byte for this frame.
    ///
    /// Fails with [`ZWaveError::Protocol`] when the payload is longer than
    /// [`MAX_PAYLOAD_SIZE`].
    pub fn length_byte(&self) -> Result<u8> {
        u8::try_from(self.payload.len() + LEN_OVERHEAD).map_err(|_| {
            ZWaveError::Protocol(format!(
                "payload of {} bytes exceeds the {} byte frame limit",
                self.payload.len(),
                MAX_PAYLOAD_SIZE
            ))
        })
    }

    /// Total encoded size (SOF + LEN + TYPE + FUNC + payload + CHECKSUM).
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.payload.len() + LEN_OVERHEAD + 2
    }

    /// Encode to wire bytes including SOF, length and checksum.
    pub fn encode(&self) -> Result<Bytes> {
        let length = self.length_byte()?;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(SOF);
        buf.put_u8(length);
        buf.put_u8(self.frame_type as u8);
        buf.put_u8(self.function);
        buf.extend_from_slice(&self.payload);
        let sum = checksum(&buf[1..]);
        buf.put_u8(sum);
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::function;

    #[test]
    fn test_encode_without_payload() {
        let frame = Frame::request(function::MEMORY_GET_ID, &[]);
        assert_eq!(&frame.encode().unwrap()[..], &[0x01, 0x03, 0x00, 0x20, 0xDC]);
        assert_eq!(frame.encoded_len(), 5);
    }

    #[test]
    fn test_encode_with_payload() {
        let frame = Frame::request(function::GET_NODE_PROTOCOL_INFO, &[0x05]);
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), 6);
        assert_eq!(bytes[1], 0x04);
        assert_eq!(bytes[4], 0x05);
        assert_eq!(bytes[5], checksum(&bytes[1..5]));
    }

    #[test]
    fn test_response_accessors() {
        let frame = Frame::response(function::SEND_DATA, &[0x01]);
        assert!(frame.is_response());
        assert_eq!(frame.function(), function::SEND_DATA);
        assert_eq!(frame.payload(), &[0x01]);
        assert_eq!(frame.length_byte().unwrap(), 4);
    }

    #[test]
    fn test_largest_payload_fits_length_byte() {
        let frame = Frame::request(function::SEND_DATA, &[0u8; MAX_PAYLOAD_SIZE]);
        assert_eq!(frame.length_byte().unwrap(), u8::MAX);
        assert_eq!(frame.encode().unwrap().len(), MAX_PAYLOAD_SIZE + 5);
    }

    #[test]
    fn test_oversized_payload_is_refused() {
        let frame = Frame::request(function::SEND_DATA, &[0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(frame.length_byte(), Err(ZWaveError::Protocol(_))));
        assert!(matches!(frame.encode(), Err(ZWaveError::Protocol(_))));
    }
}
