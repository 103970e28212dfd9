//! Transport module - the serial link to the controller stick.
//!
//! The engine is generic over any duplex byte stream, so besides the real
//! serial port ([`open_serial`]) tests plug in `tokio::io::duplex` pipes.

mod serial;

pub use serial::{open_serial, SerialStream, DEFAULT_BAUD_RATE};

use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream the engine can run on.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
