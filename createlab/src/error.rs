//! Error types for createlab.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for createlab operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for createlab operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// HID API error that does not map to a more specific variant.
    #[cfg(feature = "hid")]
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// The transport reported end-of-stream.
    #[error("End of stream")]
    EndOfStream,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The HID device is gone (unplugged or powered off).
    #[error("Device not connected: {0}")]
    DeviceNotConnected(String),

    /// The HID device reported a general failure.
    #[error("Device failure: {0}")]
    DeviceFailure(String),

    /// No device matched the search criteria.
    #[error("Device not found")]
    DeviceNotFound,

    /// The device path is already claimed by this process.
    #[error("Device already claimed: {0}")]
    ClaimConflict(String),

    /// A submission did not complete within the queue timeout.
    #[error("Command did not complete within {0:?}")]
    QueueTimeout(Duration),

    /// The queue is shutting down or already closed.
    #[error("Command queue is closed")]
    QueueClosed,

    /// Handshake failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the physical connection is gone.
    ///
    /// Retrying a command after one of these is pointless.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotConnected(_) | Self::DeviceFailure(_) | Self::EndOfStream
        )
    }
}
