//! HID report framing and command correlation.
//!
//! ## Report Format
//!
//! ```text
//! Output report (host -> device), output_report_length bytes:
//! +-----------+----------------------------+------------+
//! | Report ID |  Payload (padded/truncated) | Command ID |
//! +-----------+----------------------------+------------+
//! |   0x00    |   output_report_length - 2  |   1 byte   |
//! +-----------+----------------------------+------------+
//!
//! Input report (device -> host):
//! +-------------+-----------------+------------+
//! | Report ID ? |     Payload     | Command ID |
//! +-------------+-----------------+------------+
//! ```
//!
//! The report-ID byte is only present on reads on some platforms; see
//! [`HidReportLayout::report_id_on_read`].

use {
    crate::{
        device::{DeviceDescriptor, HidReportLayout},
        error::{Error, Result},
        transport::{HidIo, Transport},
    },
    log::trace,
    std::{
        sync::{Mutex, PoisonError},
        time::Duration,
    },
};

/// Report ID used for every output report.
pub const REPORT_ID: u8 = 0x00;

/// Wrapping one-byte sequence number correlating reads with writes.
#[derive(Debug, Default)]
pub struct CommandIdCounter {
    next: Mutex<u8>,
}

impl CommandIdCounter {
    /// Counter starting at `start`.
    pub fn starting_at(start: u8) -> Self {
        Self {
            next: Mutex::new(start),
        }
    }

    /// Return the current id and advance, wrapping 255 -> 0.
    pub fn next_id(&self) -> u8 {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *next;
        *next = next.wrapping_add(1);
        id
    }
}

/// One input report with the framing bytes stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputReport {
    /// Payload between the optional report-ID byte and the command id.
    pub payload: Vec<u8>,
    /// Trailing command id.
    pub command_id: u8,
}

/// An open HID device plus its report geometry and command-id counter.
pub struct HidConnection<T: HidIo> {
    io: T,
    descriptor: DeviceDescriptor,
    layout: HidReportLayout,
    command_id: CommandIdCounter,
}

impl<T: HidIo> HidConnection<T> {
    /// Wrap `io` for the device described by `descriptor`.
    pub fn new(io: T, descriptor: DeviceDescriptor) -> Result<Self> {
        let layout = *descriptor.require_reports()?;
        if layout.output_report_length < 2 {
            return Err(Error::Config(format!(
                "output report length {} cannot hold report id and command id",
                layout.output_report_length
            )));
        }
        if layout.input_report_length == 0 {
            return Err(Error::Config("input report length is zero".into()));
        }

        Ok(Self {
            io,
            descriptor,
            layout,
            command_id: CommandIdCounter::default(),
        })
    }

    /// Descriptor of the connected device.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Report geometry in use.
    pub fn layout(&self) -> &HidReportLayout {
        &self.layout
    }

    /// Build the output report for `payload` tagged with `command_id`.
    pub fn frame_output(&self, payload: &[u8], command_id: u8) -> Vec<u8> {
        let len = self.layout.output_report_length;
        let mut report = vec![0u8; len];
        report[0] = REPORT_ID;

        let room = self.layout.output_payload_len();
        let n = payload.len().min(room);
        report[1..=n].copy_from_slice(&payload[..n]);
        if payload.len() > room {
            trace!("Truncated HID payload from {} to {room} bytes", payload.len());
        }

        report[len - 1] = command_id;
        report
    }

    /// Split a raw input report into payload and command id.
    ///
    /// Returns `None` for reports too short to carry a command id.
    pub fn parse_input(&self, raw: &[u8]) -> Option<InputReport> {
        let body = if self.layout.report_id_on_read {
            raw.get(1..)?
        } else {
            raw
        };
        let (&command_id, payload) = body.split_last()?;
        Some(InputReport {
            payload: payload.to_vec(),
            command_id,
        })
    }

    /// Write `payload` as one output report. Returns the command id used.
    pub fn write(&mut self, payload: &[u8]) -> Result<u8> {
        let id = self.command_id.next_id();
        let report = self.frame_output(payload, id);
        self.io.write_report(&report)?;
        Ok(id)
    }

    /// Read one input report, waiting at most `timeout`.
    pub fn read(&mut self, timeout: Duration) -> Result<Option<InputReport>> {
        let mut buf = vec![0u8; self.layout.input_report_length];
        let n = self.io.read_report(&mut buf, timeout)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(self.parse_input(&buf[..n]))
    }
}

impl<T: HidIo> Transport for HidConnection<T> {
    fn name(&self) -> &str {
        self.io.name()
    }

    fn close(&mut self) -> Result<()> {
        self.io.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockHid;

    fn descriptor(report_id_on_read: bool) -> DeviceDescriptor {
        DeviceDescriptor::hid(
            "mock",
            0x2354,
            0x1111,
            HidReportLayout::new(9, 9).with_report_id_on_read(report_id_on_read),
        )
    }

    #[test]
    fn test_command_id_wraps() {
        let counter = CommandIdCounter::starting_at(254);
        assert_eq!(counter.next_id(), 254);
        assert_eq!(counter.next_id(), 255);
        assert_eq!(counter.next_id(), 0);
        assert_eq!(counter.next_id(), 1);
    }

    #[test]
    fn test_frame_output_pads_and_tags() {
        let (io, _) = MockHid::with_responder(|_| Vec::new());
        let conn = HidConnection::new(io, descriptor(false)).unwrap();

        let report = conn.frame_output(&[b'L', 1, 2], 0x42);
        assert_eq!(report, vec![0x00, b'L', 1, 2, 0, 0, 0, 0, 0x42]);
    }

    #[test]
    fn test_frame_output_truncates() {
        let (io, _) = MockHid::with_responder(|_| Vec::new());
        let conn = HidConnection::new(io, descriptor(false)).unwrap();

        let report = conn.frame_output(&[9; 20], 7);
        assert_eq!(report.len(), 9);
        assert_eq!(&report[1..8], &[9; 7]);
        assert_eq!(report[8], 7);
    }

    #[test]
    fn test_parse_input_with_and_without_report_id() {
        let (io, _) = MockHid::with_responder(|_| Vec::new());
        let with_id = HidConnection::new(io, descriptor(true)).unwrap();
        let parsed = with_id.parse_input(&[0x00, 0xAA, 0xBB, 0x05]).unwrap();
        assert_eq!(parsed.payload, vec![0xAA, 0xBB]);
        assert_eq!(parsed.command_id, 5);

        let (io, _) = MockHid::with_responder(|_| Vec::new());
        let without_id = HidConnection::new(io, descriptor(false)).unwrap();
        let parsed = without_id.parse_input(&[0xAA, 0xBB, 0x05]).unwrap();
        assert_eq!(parsed.payload, vec![0xAA, 0xBB]);
        assert_eq!(parsed.command_id, 5);

        assert!(with_id.parse_input(&[0x00]).is_none());
        assert!(without_id.parse_input(&[]).is_none());
    }

    #[test]
    fn test_write_uses_sequential_ids() {
        let (io, handle) = MockHid::with_responder(|_| Vec::new());
        let mut conn = HidConnection::new(io, descriptor(false)).unwrap();

        assert_eq!(conn.write(&[1]).unwrap(), 0);
        assert_eq!(conn.write(&[2]).unwrap(), 1);
        let writes = handle.writes();
        assert_eq!(writes[0][8], 0);
        assert_eq!(writes[1][8], 1);
    }

    #[test]
    fn test_rejects_serial_descriptor_and_tiny_reports() {
        let (io, _) = MockHid::with_responder(|_| Vec::new());
        assert!(HidConnection::new(io, DeviceDescriptor::serial("/dev/ttyS0")).is_err());

        let (io, _) = MockHid::with_responder(|_| Vec::new());
        let tiny = DeviceDescriptor::hid("x", 1, 2, HidReportLayout::new(9, 1));
        assert!(matches!(HidConnection::new(io, tiny), Err(Error::Config(_))));
    }
}
