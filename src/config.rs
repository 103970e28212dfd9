//! Controller configuration.
//!
//! Every field has a default, so a JSON file only needs the values it
//! changes:
//!
//! ```
//! use zwave_serial::ControllerConfig;
//!
//! let config = ControllerConfig::from_json_str(r#"{ "serial_port": "/dev/ttyUSB0", "max_retries": 2 }"#).unwrap();
//! assert_eq!(config.serial_port, "/dev/ttyUSB0");
//! assert_eq!(config.max_retries, 2);
//! assert_eq!(config.baud_rate, 115_200);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::backpressure::DEFAULT_QUEUE_CAPACITY;
use crate::error::Result;
use crate::link::{LinkConfig, DEFAULT_MAX_RETRIES};
use crate::protocol::DEFAULT_RECEIVE_TIMEOUT;
use crate::transport::DEFAULT_BAUD_RATE;
use crate::writer::DEFAULT_CHANNEL_CAPACITY;

/// Settings for a [`ZWaveController`](crate::ZWaveController).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Serial device path.
    pub serial_port: String,
    pub baud_rate: u32,
    pub ack_timeout_ms: u64,
    /// Per-phase wait for responses and callbacks after the ACK.
    pub response_timeout_ms: u64,
    /// Retransmissions after the first attempt.
    pub max_retries: u8,
    pub retry_delay_base_ms: u64,
    pub retry_delay_step_ms: u64,
    /// Time a partially received frame may take to complete.
    pub frame_receive_timeout_ms: u64,
    /// Maximum frames waiting in the outbound queue.
    pub queue_capacity: usize,
    /// Capacity of the channel feeding the serial writer task.
    pub writer_channel_capacity: usize,
    /// Close the persistent store when the controller stops.
    pub auto_close_store: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let link = LinkConfig::default();
        Self {
            serial_port: "/dev/ttyACM0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            ack_timeout_ms: link.ack_timeout.as_millis() as u64,
            response_timeout_ms: link.response_timeout.as_millis() as u64,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_base_ms: link.retry_delay_base.as_millis() as u64,
            retry_delay_step_ms: link.retry_delay_step.as_millis() as u64,
            frame_receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT.as_millis() as u64,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            writer_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            auto_close_store: true,
        }
    }
}

impl ControllerConfig {
    /// Parse from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Timing parameters for the link layer.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            max_retries: self.max_retries,
            retry_delay_base: Duration::from_millis(self.retry_delay_base_ms),
            retry_delay_step: Duration::from_millis(self.retry_delay_step_ms),
        }
    }

    pub fn frame_receive_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_receive_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ZWaveError;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.ack_timeout_ms, 1600);
        assert_eq!(config.response_timeout_ms, 10_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.frame_receive_timeout(), Duration::from_millis(1500));
        assert!(config.auto_close_store);
        assert_eq!(config.link_config(), LinkConfig::default());
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = ControllerConfig::default();
        config.serial_port = "COM3".into();
        config.queue_capacity = 8;

        let json = config.to_json().unwrap();
        assert_eq!(ControllerConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        let result = ControllerConfig::from_json_str("{ \"max_retries\": \"lots\" }");
        assert!(matches!(result, Err(ZWaveError::Json(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = ControllerConfig::from_file("/nonexistent/zwave.json");
        assert!(matches!(result, Err(ZWaveError::Io(_))));
    }
}
