//! Native HID adapter using the `hidapi` crate.

use {
    crate::{
        error::{Error, Result},
        transport::{HidIo, Transport},
    },
    hidapi::{HidDevice, HidError},
    log::{debug, trace},
    std::time::Duration,
};

/// Platform messages meaning the device is physically gone.
const NOT_CONNECTED_MESSAGES: &[&str] = &[
    "device is not connected",
    "no such device",
    "device not configured",
];

/// Platform messages meaning the device stopped functioning.
const FAILURE_MESSAGES: &[&str] = &["not functioning", "general failure"];

/// An open HID device exposed through [`HidIo`].
pub struct NativeHidDevice {
    device: Option<HidDevice>,
    path: String,
}

impl NativeHidDevice {
    /// Wrap a device already opened through `hidapi`.
    pub fn new(device: HidDevice, path: impl Into<String>) -> Self {
        Self {
            device: Some(device),
            path: path.into(),
        }
    }

    fn device(&self) -> Result<&HidDevice> {
        self.device
            .as_ref()
            .ok_or_else(|| Error::DeviceNotConnected(format!("{} is closed", self.path)))
    }
}

/// Translate a `hidapi` error, singling out the disconnect cases.
pub(crate) fn map_hid_error(err: HidError) -> Error {
    if let HidError::HidApiError { message } = &err {
        let lower = message.to_lowercase();
        if NOT_CONNECTED_MESSAGES.iter().any(|m| lower.contains(m)) {
            return Error::DeviceNotConnected(message.clone());
        }
        if FAILURE_MESSAGES.iter().any(|m| lower.contains(m)) {
            return Error::DeviceFailure(message.clone());
        }
    }
    Error::Hid(err)
}

impl Transport for NativeHidDevice {
    fn name(&self) -> &str {
        &self.path
    }

    fn close(&mut self) -> Result<()> {
        if self.device.take().is_some() {
            debug!("Closed HID device {}", self.path);
        }
        Ok(())
    }
}

impl HidIo for NativeHidDevice {
    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        trace!("HID TX {report:02X?}");
        let written = self.device()?.write(report).map_err(map_hid_error)?;
        if written < report.len() {
            return Err(Error::Protocol(format!(
                "short HID write: {written} of {} bytes",
                report.len()
            )));
        }
        Ok(())
    }

    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let n = self
            .device()?
            .read_timeout(buf, millis)
            .map_err(map_hid_error)?;
        if n > 0 {
            trace!("HID RX {:02X?}", &buf[..n]);
        }
        Ok(n)
    }
}
