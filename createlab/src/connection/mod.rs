//! Opening devices and getting a ready command queue.
//!
//! Each helper opens the transport, performs whatever initial exchange the
//! device needs and hands the transport to a [`CommandQueue`]. From then on
//! the queue is the only owner of the handle.

use {
    crate::{
        error::{Error, Result},
        queue::{CommandQueue, QueueSettings},
        strategy::HandshakeStrategy,
        transport::SerialIo,
    },
    log::warn,
};

#[cfg(any(feature = "native", feature = "hid"))]
use log::info;

#[cfg(feature = "native")]
use crate::transport::{NativeSerialPort, SerialConfig};

#[cfg(feature = "hid")]
use {
    crate::{
        claim::ClaimRegistry,
        device::{HidDeviceSpec, hid::open_hid_device},
        protocol::hid::HidConnection,
        transport::NativeHidDevice,
    },
    hidapi::HidApi,
};

/// Queue over a native serial port.
#[cfg(feature = "native")]
pub type SerialQueue = CommandQueue<NativeSerialPort>;

/// Queue over a native HID device.
#[cfg(feature = "hid")]
pub type HidQueue = CommandQueue<HidConnection<NativeHidDevice>>;

/// Run `handshake` through `queue`, failing with [`Error::HandshakeFailed`]
/// if the device does not complete it.
///
/// The wait is bounded by the larger of the queue's task timeout and the
/// handshake's own time budget.
pub fn perform_handshake<T: SerialIo>(
    queue: &CommandQueue<T>,
    handshake: HandshakeStrategy,
) -> Result<()> {
    let timeout = queue.settings().task_timeout.max(handshake.time_budget());
    let response = queue.execute_with_timeout(handshake, timeout)?;

    if response.is_success() {
        Ok(())
    } else if !response.write_succeeded() {
        Err(Error::HandshakeFailed(format!(
            "{} never sent its startup pattern",
            queue.name()
        )))
    } else {
        Err(Error::HandshakeFailed(format!(
            "{} did not echo the handshake response",
            queue.name()
        )))
    }
}

/// Open a serial port and start its queue.
#[cfg(feature = "native")]
pub fn connect_serial(config: &SerialConfig, settings: QueueSettings) -> Result<SerialQueue> {
    let port = NativeSerialPort::open(config)?;
    let queue = CommandQueue::new(port, settings)?;
    info!("Connected to {}", config.port_name);
    Ok(queue)
}

/// Open a serial port, run the startup handshake and start its queue.
///
/// The port is closed again if the handshake fails.
#[cfg(feature = "native")]
pub fn connect_serial_with_handshake(
    config: &SerialConfig,
    handshake: HandshakeStrategy,
    settings: QueueSettings,
) -> Result<SerialQueue> {
    let queue = connect_serial(config, settings)?;
    finish_handshake(queue, handshake)
}

#[cfg(any(feature = "native", test))]
fn finish_handshake<T: SerialIo>(
    queue: CommandQueue<T>,
    handshake: HandshakeStrategy,
) -> Result<CommandQueue<T>> {
    if let Err(e) = perform_handshake(&queue, handshake) {
        warn!("Handshake with {} failed: {e}", queue.name());
        if let Err(close_err) = queue.shutdown() {
            warn!("Error closing {}: {close_err}", queue.name());
        }
        return Err(e);
    }
    Ok(queue)
}

/// Open the first unclaimed HID device matching `spec` and start its queue.
///
/// The claim on the device path is held by the queue and released when it
/// shuts down.
#[cfg(feature = "hid")]
pub fn connect_hid(
    api: &HidApi,
    spec: &HidDeviceSpec,
    registry: &ClaimRegistry,
    settings: QueueSettings,
) -> Result<HidQueue> {
    let (device, descriptor, guard) = open_hid_device(api, spec, registry)?;
    let connection = HidConnection::new(device, descriptor)?;
    let queue = CommandQueue::new(connection, settings)?.with_claim(guard);
    info!("Connected to {} at {}", spec.name, queue.name());
    Ok(queue)
}
