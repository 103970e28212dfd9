//! # zwave-serial
//!
//! Host-side Z-Wave controller speaking the serial API of a Z-Wave stick.
//!
//! ## Architecture
//!
//! - **Protocol**: frame codec (SOF/LEN/TYPE/FUNC/payload/checksum) and
//!   the ACK/NAK/CAN control bytes
//! - **Link**: ACK handling with retransmission, an outbound queue that
//!   holds frames for sleeping nodes, and one transaction in flight at a time
//! - **Controller**: node registry, inclusion/exclusion and listener
//!   notifications on top of the link
//!
//! ## Example
//!
//! ```ignore
//! use zwave_serial::store::MemoryStore;
//! use zwave_serial::ZWaveController;
//!
//! #[tokio::main]
//! async fn main() -> zwave_serial::Result<()> {
//!     let controller = ZWaveController::builder()
//!         .serial_port("/dev/ttyACM0")
//!         .store(MemoryStore::new())
//!         .start()
//!         .await?;
//!
//!     controller.begin_inclusion().await;
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!     controller.end_inclusion().await;
//!
//!     controller.stop().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod link;
pub mod node;
pub mod protocol;
pub mod store;
pub mod transport;

mod backpressure;
mod writer;

pub use backpressure::QueueCapacity;
pub use config::ControllerConfig;
pub use controller::{ControllerBuilder, ControllerListener, ZWaveController};
pub use error::{Result, ZWaveError};
pub use node::{NodeFactory, ZWaveNode};
pub use store::PersistentStore;
