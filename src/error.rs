//! Error types for zwave-serial.

use thiserror::Error;

/// Main error type for all controller operations.
#[derive(Debug, Error)]
pub enum ZWaveError {
    /// I/O error on the serial link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error (node store).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error (node store).
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed payload, unexpected frame, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No persistent store was provided to the controller.
    #[error("No persistent store available")]
    MissingStore,

    /// Outbound queue is at capacity.
    #[error("Outbound frame queue is full ({0} pending)")]
    QueueFull(usize),

    /// Serial link closed unexpectedly or the engine has stopped.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using ZWaveError.
pub type Result<T> = std::result::Result<T, ZWaveError>;
