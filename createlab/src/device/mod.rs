//! Device descriptors and discovery.
//!
//! A [`DeviceDescriptor`] is built once when a device is discovered and never
//! changes afterwards. Serial discovery goes through the `serialport` crate
//! (feature `native`); HID discovery lives in [`hid`] (feature `hid`).

#[cfg(feature = "hid")]
pub mod hid;

use {
    crate::{
        claim::{ClaimGuard, ClaimRegistry},
        error::{Error, Result},
    },
    log::debug,
};

#[cfg(feature = "native")]
use log::{info, trace};

/// Transport type of a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// Byte-stream serial transport (UART, USB CDC, Bluetooth SPP).
    Serial,
    /// Report-based USB HID transport.
    Hid,
}

/// Known USB vendors/bridges seen on CREATE Lab style hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// Native CREATE Lab USB device (Finch, Hummingbird, ...).
    CreateLab,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Unknown device.
    Unknown,
}

/// CREATE Lab USB vendor id.
pub const CREATE_LAB_VENDOR_ID: u16 = 0x2354;

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (CREATE_LAB_VENDOR_ID, &[], DeviceKind::CreateLab),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
];

impl DeviceKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Human-readable name of the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateLab => "CREATE Lab",
            Self::Ftdi => "FTDI",
            Self::Cp210x => "CP210x",
            Self::Ch340 => "CH340/CH341",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a recognised kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// HID report geometry of a device.
///
/// Lengths include the leading report-ID byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HidReportLayout {
    /// Input report length in bytes.
    pub input_report_length: usize,
    /// Output report length in bytes.
    pub output_report_length: usize,
    /// Whether reads return the report-ID byte in front of the payload.
    pub report_id_on_read: bool,
}

impl HidReportLayout {
    /// Layout with the platform's report-ID convention.
    ///
    /// Windows hands the report-ID byte back on reads; other platforms strip it.
    pub fn new(input_report_length: usize, output_report_length: usize) -> Self {
        Self {
            input_report_length,
            output_report_length,
            report_id_on_read: cfg!(windows),
        }
    }

    /// Override the report-ID convention.
    #[must_use]
    pub fn with_report_id_on_read(mut self, present: bool) -> Self {
        self.report_id_on_read = present;
        self
    }

    /// Payload bytes that fit in one output report (minus report id and command id).
    pub fn output_payload_len(&self) -> usize {
        self.output_report_length.saturating_sub(2)
    }
}

/// Identity and metadata of one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceDescriptor {
    name: String,
    path: String,
    transport: TransportKind,
    kind: DeviceKind,
    vendor_id: Option<u16>,
    product_id: Option<u16>,
    reports: Option<HidReportLayout>,
}

impl DeviceDescriptor {
    /// Descriptor of a serial device at `path`.
    pub fn serial(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: path.clone(),
            path,
            transport: TransportKind::Serial,
            kind: DeviceKind::Unknown,
            vendor_id: None,
            product_id: None,
            reports: None,
        }
    }

    /// Descriptor of a serial device behind a USB bridge.
    pub fn usb_serial(path: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            kind: DeviceKind::from_vid_pid(vendor_id, product_id),
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            ..Self::serial(path)
        }
    }

    /// Descriptor of a HID device.
    pub fn hid(
        path: impl Into<String>,
        vendor_id: u16,
        product_id: u16,
        reports: HidReportLayout,
    ) -> Self {
        let path = path.into();
        Self {
            name: format!("HID {vendor_id:04X}:{product_id:04X}"),
            path,
            transport: TransportKind::Hid,
            kind: DeviceKind::from_vid_pid(vendor_id, product_id),
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            reports: Some(reports),
        }
    }

    /// Descriptor of a HID device whose report geometry is not known yet.
    ///
    /// Produced by plain enumeration; [`HidDeviceSpec::descriptor_for`]
    /// builds the connectable form.
    pub fn usb_hid(path: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            reports: None,
            ..Self::hid(path, vendor_id, product_id, HidReportLayout::new(0, 0))
        }
    }

    /// Replace the human-readable name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Human-readable name (diagnostics only).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS path of the device; also the claim key.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Transport type.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Classified device kind.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// USB vendor id, if known.
    pub fn vendor_id(&self) -> Option<u16> {
        self.vendor_id
    }

    /// USB product id, if known.
    pub fn product_id(&self) -> Option<u16> {
        self.product_id
    }

    /// HID report geometry; `None` for serial devices.
    pub fn reports(&self) -> Option<&HidReportLayout> {
        self.reports.as_ref()
    }

    /// HID report geometry, or a configuration error for non-HID descriptors.
    pub fn require_reports(&self) -> Result<&HidReportLayout> {
        self.reports
            .as_ref()
            .ok_or_else(|| Error::Config(format!("{} has no HID report layout", self.path)))
    }

    /// One-line summary for listings.
    pub fn summary(&self) -> String {
        let mut out = self.path.clone();
        if self.kind.is_known() {
            out.push_str(&format!(" [{}]", self.kind.name()));
        }
        if let (Some(vid), Some(pid)) = (self.vendor_id, self.product_id) {
            out.push_str(&format!(" ({vid:04X}:{pid:04X})"));
        }
        if self.name != self.path {
            out.push_str(&format!(" - {}", self.name));
        }
        out
    }
}

/// What to look for when enumerating HID devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidDeviceSpec {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// Report geometry the firmware uses.
    pub reports: HidReportLayout,
    /// Name used in logs and listings.
    pub name: String,
}

impl HidDeviceSpec {
    /// Create a spec with platform-default report-ID handling.
    pub fn new(
        name: impl Into<String>,
        vendor_id: u16,
        product_id: u16,
        input_report_length: usize,
        output_report_length: usize,
    ) -> Self {
        Self {
            vendor_id,
            product_id,
            reports: HidReportLayout::new(input_report_length, output_report_length),
            name: name.into(),
        }
    }

    /// Whether a device with these ids matches.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }

    /// Build the descriptor of a matching device found at `path`.
    pub fn descriptor_for(&self, path: impl Into<String>) -> DeviceDescriptor {
        DeviceDescriptor::hid(path, self.vendor_id, self.product_id, self.reports)
            .with_name(self.name.clone())
    }
}

/// Enumerate serial ports.
#[cfg(feature = "native")]
pub fn detect_serial_ports() -> Vec<DeviceDescriptor> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let descriptor = match port_info.port_type {
                    serialport::SerialPortType::UsbPort(usb_info) => {
                        let mut d = DeviceDescriptor::usb_serial(
                            &port_info.port_name,
                            usb_info.vid,
                            usb_info.pid,
                        );
                        if let Some(product) = usb_info.product {
                            d = d.with_name(product);
                        }
                        trace!(
                            "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                            port_info.port_name,
                            usb_info.vid,
                            usb_info.pid,
                            d.kind()
                        );
                        d
                    },
                    _ => DeviceDescriptor::serial(&port_info.port_name),
                };
                result.push(descriptor);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// Enumerate serial ports (no native support compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_serial_ports() -> Vec<DeviceDescriptor> {
    Vec::new()
}

/// Pick the most likely serial device: CREATE Lab first, then known bridges,
/// then the first port.
pub fn pick_serial_port(ports: Vec<DeviceDescriptor>) -> Result<DeviceDescriptor> {
    if let Some(port) = ports.iter().find(|p| p.kind() == DeviceKind::CreateLab) {
        return Ok(port.clone());
    }
    if let Some(port) = ports.iter().find(|p| p.kind().is_known()) {
        return Ok(port.clone());
    }
    ports.into_iter().next().ok_or(Error::DeviceNotFound)
}

/// Auto-detect a single serial device.
#[cfg(feature = "native")]
pub fn auto_detect_serial_port() -> Result<DeviceDescriptor> {
    let port = pick_serial_port(detect_serial_ports())?;
    info!("Auto-detected serial port: {}", port.summary());
    Ok(port)
}

/// Find a serial port whose path contains `pattern`.
pub fn find_serial_port(pattern: &str) -> Result<DeviceDescriptor> {
    detect_serial_ports()
        .into_iter()
        .find(|p| p.path().contains(pattern))
        .ok_or(Error::DeviceNotFound)
}

/// Claim and open the first candidate nobody else holds.
///
/// Candidates already claimed are skipped. A claim is released again if
/// opening the device fails, and the next candidate is tried. Fails with
/// [`Error::ClaimConflict`] when every candidate is taken and with
/// [`Error::DeviceNotFound`] when there are none.
pub fn claim_and_open<D, F>(
    candidates: Vec<DeviceDescriptor>,
    registry: &ClaimRegistry,
    mut open: F,
) -> Result<(D, DeviceDescriptor, ClaimGuard)>
where
    F: FnMut(&DeviceDescriptor) -> Result<D>,
{
    let mut conflict = None;
    let mut last_error = None;

    for candidate in candidates {
        let guard = match registry.claim(candidate.path()) {
            Ok(guard) => guard,
            Err(e) => {
                conflict = Some(e);
                continue;
            },
        };

        match open(&candidate) {
            Ok(device) => return Ok((device, candidate, guard)),
            Err(e) => {
                debug!("Failed to open {}: {e}", candidate.path());
                drop(guard);
                last_error = Some(e);
            },
        }
    }

    Err(last_error.or(conflict).unwrap_or(Error::DeviceNotFound))
}
