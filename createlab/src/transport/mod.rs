//! Transport I/O capabilities.
//!
//! The command engine never talks to an operating-system API directly. It is
//! written against two small capability traits:
//!
//! - [`SerialIo`] for byte-stream devices (one byte at a time, with an
//!   availability check so reads can be bounded in time)
//! - [`HidIo`] for report-based USB HID devices
//!
//! ```text
//! +--------------------+      +--------------------+
//! |  Command strategy  |      |  Command strategy  |
//! | (echo/slurp/HID)   |      |  (HID correlation) |
//! +---------+----------+      +---------+----------+
//!           |                           |
//!           v                           v
//! +---------+----------+      +---------+----------+
//! |   SerialIo trait   |      |     HidIo trait    |
//! +---------+----------+      +---------+----------+
//!           |                           |
//!           v                           v
//! +---------+----------+      +---------+----------+
//! |  NativeSerialPort  |      |  NativeHidDevice   |
//! |    (serialport)    |      |      (hidapi)      |
//! +--------------------+      +--------------------+
//! ```
//!
//! Neither trait retries anything. Retry and resynchronisation are strategy
//! concerns.

#[cfg(feature = "native")]
pub mod serial;

#[cfg(feature = "hid")]
pub mod hid;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use crate::error::Result;

/// Common behaviour of every open transport handle.
pub trait Transport: Send + 'static {
    /// Human-readable name of the connection (port name or HID path).
    fn name(&self) -> &str;

    /// Close the connection and release OS resources.
    ///
    /// After calling this method the transport cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;
}

/// Byte-level access to an open serial connection.
pub trait SerialIo: Transport {
    /// Read one byte from whatever is currently buffered.
    ///
    /// Returns [`Error::EndOfStream`](crate::Error::EndOfStream) when the
    /// connection has ended.
    fn read_one_byte(&mut self) -> Result<u8>;

    /// Whether at least one byte can be read without blocking.
    fn is_data_available(&mut self) -> Result<bool>;

    /// Write all bytes and flush. Partial writes are not observable.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Report-level access to an open HID device.
pub trait HidIo: Transport {
    /// Write one complete output report, including the leading report-ID byte.
    fn write_report(&mut self, report: &[u8]) -> Result<()>;

    /// Read one input report into `buf`, waiting at most `timeout`.
    ///
    /// Returns the number of bytes read, or `0` if no report arrived in time.
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout of a single blocking OS read/write.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(100),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the OS-level read/write timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the flow control mode.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

#[cfg(feature = "native")]
pub use serial::NativeSerialPort;

#[cfg(feature = "hid")]
pub use hid::NativeHidDevice;
