//! # createlab
//!
//! Command execution engine for CREATE Lab style USB devices.
//!
//! This crate serializes, transmits, verifies and frames binary commands
//! exchanged with small hardware devices over two transports:
//!
//! - byte-stream serial ports, where the firmware echoes every command
//!   byte-for-byte before answering
//! - USB HID devices, where every report carries a one-byte command id that
//!   the device echoes back in its reply
//!
//! ## Architecture
//!
//! ```text
//!  caller ─▶ CommandQueue ─▶ worker thread ─▶ CommandStrategy ─▶ SerialIo / HidIo
//!                │                                  │
//!          ClaimGuard (HID)               SerialIoHelper / HidConnection
//! ```
//!
//! Each open device gets one [`CommandQueue`]. The queue owns the transport
//! and runs submitted [`CommandStrategy`] values one at a time in
//! submission order. Strategies describe a protocol shape (fire-and-forget,
//! fixed-length reply, length-prefixed reply, startup handshake, HID
//! request/response) and use the shared echo and slurp primitives in
//! [`protocol`].
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//! - `hid`: USB HID devices via the `hidapi` crate
//! - `serde`: serialization support for descriptors
//!
//! ## Example
//!
//! ```rust,no_run
//! use createlab::{FixedReturnValueStrategy, QueueSettings};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         use createlab::{SerialConfig, connection::connect_serial};
//!
//!         let config = SerialConfig::new("/dev/ttyUSB0", 115200);
//!         let queue = connect_serial(&config, QueueSettings::default())?;
//!
//!         // Ask for the 3-byte firmware version.
//!         let response = queue.execute(FixedReturnValueStrategy::new([b'V'], 3))?;
//!         if let Some(version) = response.data() {
//!             println!("Firmware: {version:02X?}");
//!         }
//!
//!         queue.shutdown()?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod claim;
pub mod command;
pub mod connection;
pub mod connectivity;
pub mod device;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod strategy;
pub mod transport;

#[cfg(feature = "native")]
pub use transport::NativeSerialPort;
#[cfg(feature = "hid")]
pub use {hidapi, transport::NativeHidDevice};
pub use {
    claim::{ClaimGuard, ClaimRegistry},
    command::{Command, CommandResponse},
    connectivity::{ConnectionListener, ConnectionState, DevicePinger, PingSettings},
    device::{
        DeviceDescriptor, DeviceKind, HidDeviceSpec, HidReportLayout, TransportKind,
        detect_serial_ports, find_serial_port, pick_serial_port,
    },
    error::{Error, Result},
    protocol::{HidConnection, IoSettings, ReadOutcome, SerialIoHelper},
    queue::{CommandQueue, PendingResponse, QueueSettings},
    strategy::{
        CommandStrategy, FixedReturnValueStrategy, HandshakeStrategy, HidCommandStrategy,
        NoReturnValueStrategy, VariableLengthReturnValueStrategy,
    },
    transport::{HidIo, SerialConfig, SerialIo, Transport},
};
