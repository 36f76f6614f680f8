//! Command and response values exchanged with a device.

use std::fmt;

/// An immutable byte sequence to be written to a device.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Command {
    bytes: Vec<u8>,
}

impl Command {
    /// Create a command from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Command consisting of a single ASCII command character followed by
    /// parameter bytes, the convention most CREATE Lab firmware uses.
    pub fn with_opcode(opcode: u8, params: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(1 + params.len());
        bytes.push(opcode);
        bytes.extend_from_slice(params);
        Self { bytes }
    }

    /// The bytes to write.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the command carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({:02X?})", self.bytes)
    }
}

impl From<Vec<u8>> for Command {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl From<&[u8]> for Command {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }
}

impl<const N: usize> From<[u8; N]> for Command {
    fn from(bytes: [u8; N]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }
}

impl AsRef<[u8]> for Command {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Result of executing one command.
///
/// The write and read halves are tracked separately so a caller can tell a
/// rejected write from a response that never (fully) arrived. Data read
/// before a failure is kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    write_ok: bool,
    read_ok: bool,
    data: Option<Vec<u8>>,
}

impl CommandResponse {
    /// A successful execution without payload.
    pub fn success() -> Self {
        Self {
            write_ok: true,
            read_ok: true,
            data: None,
        }
    }

    /// A successful execution carrying `data`.
    pub fn success_with_data(data: Vec<u8>) -> Self {
        Self {
            write_ok: true,
            read_ok: true,
            data: Some(data),
        }
    }

    /// The command could not be written (or its echo never matched).
    pub fn write_failed() -> Self {
        Self {
            write_ok: false,
            read_ok: false,
            data: None,
        }
    }

    /// The command was written but the response did not arrive completely.
    ///
    /// Empty `partial` data is stored as no data.
    pub fn read_failed(partial: Vec<u8>) -> Self {
        Self {
            write_ok: true,
            read_ok: false,
            data: (!partial.is_empty()).then_some(partial),
        }
    }

    /// Build a response from independent write/read outcomes.
    pub fn from_parts(write_ok: bool, read_ok: bool, data: Option<Vec<u8>>) -> Self {
        Self {
            write_ok,
            read_ok,
            data,
        }
    }

    /// Whether both the write and the read succeeded.
    pub fn is_success(&self) -> bool {
        self.write_ok && self.read_ok
    }

    /// Whether the write half succeeded.
    pub fn write_succeeded(&self) -> bool {
        self.write_ok
    }

    /// Whether the read half succeeded.
    pub fn read_succeeded(&self) -> bool {
        self.read_ok
    }

    /// Payload bytes, if any were read.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Consume the response and return its payload.
    pub fn into_data(self) -> Option<Vec<u8>> {
        self.data
    }
}
