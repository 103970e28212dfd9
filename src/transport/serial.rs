//! Serial port setup.
//!
//! Z-Wave controllers talk 115200 baud, 8 data bits, no parity, one stop
//! bit and no flow control.
//!
//! # Example
//!
//! ```ignore
//! use zwave_serial::transport::{open_serial, DEFAULT_BAUD_RATE};
//!
//! let port = open_serial("/dev/ttyACM0", DEFAULT_BAUD_RATE)?;
//! ```

use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

pub use tokio_serial::SerialStream;

use crate::error::Result;

/// Baud rate of the Z-Wave serial API.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Open and configure a serial device for the serial API.
pub fn open_serial(path: &str, baud_rate: u32) -> Result<SerialStream> {
    tracing::debug!(path, baud_rate, "opening serial port");
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()?;
    Ok(port)
}
