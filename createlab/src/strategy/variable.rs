//! Commands answered by a header that announces the body length.
//!
//! ```text
//! +----------------------+---------------------------+
//! |   Header (H bytes)   |        Body (V bytes)     |
//! +----------------------+---------------------------+
//!   V = variable_length_from_header(header)
//! ```

use {
    crate::{
        command::{Command, CommandResponse},
        error::{Error, Result},
        protocol::echo::{IoSettings, ReadOutcome, SerialIoHelper},
        strategy::CommandStrategy,
        transport::SerialIo,
    },
    byteorder::ByteOrder,
    log::debug,
    std::fmt,
};

type LengthFn = Box<dyn Fn(&[u8]) -> usize + Send>;

/// Write a command with echo verification, read a header, then read the
/// body length the header announces.
pub struct VariableLengthReturnValueStrategy {
    command: Command,
    header_size: usize,
    length_from_header: LengthFn,
    helper: SerialIoHelper,
}

impl fmt::Debug for VariableLengthReturnValueStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableLengthReturnValueStrategy")
            .field("command", &self.command)
            .field("header_size", &self.header_size)
            .finish_non_exhaustive()
    }
}

impl VariableLengthReturnValueStrategy {
    /// Strategy with a custom header decoder.
    pub fn new<F>(command: impl Into<Command>, header_size: usize, length_from_header: F) -> Self
    where
        F: Fn(&[u8]) -> usize + Send + 'static,
    {
        Self {
            command: command.into(),
            header_size,
            length_from_header: Box::new(length_from_header),
            helper: SerialIoHelper::default(),
        }
    }

    /// Body length is the header byte at `offset`.
    pub fn with_u8_length(
        command: impl Into<Command>,
        header_size: usize,
        offset: usize,
    ) -> Result<Self> {
        check_field(header_size, offset, 1)?;
        Ok(Self::new(command, header_size, move |header| {
            usize::from(header[offset])
        }))
    }

    /// Body length is a 16-bit field at `offset` in byte order `B`.
    pub fn with_u16_length<B: ByteOrder>(
        command: impl Into<Command>,
        header_size: usize,
        offset: usize,
    ) -> Result<Self> {
        check_field(header_size, offset, 2)?;
        Ok(Self::new(command, header_size, move |header| {
            usize::from(B::read_u16(&header[offset..offset + 2]))
        }))
    }

    /// Use custom I/O settings.
    #[must_use]
    pub fn with_settings(mut self, settings: IoSettings) -> Self {
        self.helper = SerialIoHelper::new(settings);
        self
    }

    /// The command this strategy writes.
    pub fn encode_command(&self) -> &Command {
        &self.command
    }

    /// Number of header bytes read before the body.
    pub fn expected_header_size(&self) -> usize {
        self.header_size
    }

    /// Body length announced by `header`.
    pub fn variable_length_from_header(&self, header: &[u8]) -> usize {
        (self.length_from_header)(header)
    }
}

fn check_field(header_size: usize, offset: usize, width: usize) -> Result<()> {
    if offset + width > header_size {
        return Err(Error::Config(format!(
            "length field at offset {offset} (width {width}) exceeds header size {header_size}"
        )));
    }
    Ok(())
}

impl<T: SerialIo + ?Sized> CommandStrategy<T> for VariableLengthReturnValueStrategy {
    fn execute(&mut self, io: &mut T) -> Result<CommandResponse> {
        if !self
            .helper
            .write_command_with_echo_verify(io, self.command.as_bytes())?
        {
            return Ok(CommandResponse::write_failed());
        }

        let mut header = match self.helper.read(io, self.header_size)? {
            Some(ReadOutcome::Complete(header)) => header,
            Some(ReadOutcome::Partial(partial)) => {
                debug!(
                    "{:?}: header incomplete ({} of {} bytes)",
                    self.command,
                    partial.len(),
                    self.header_size
                );
                return Ok(CommandResponse::read_failed(partial));
            },
            None => return Ok(CommandResponse::read_failed(Vec::new())),
        };

        let body_len = self.variable_length_from_header(&header);
        debug!("{:?}: header announces {body_len} body bytes", self.command);

        match self.helper.read(io, body_len)? {
            Some(ReadOutcome::Complete(body)) => {
                header.extend_from_slice(&body);
                Ok(CommandResponse::success_with_data(header))
            },
            Some(ReadOutcome::Partial(body)) => {
                debug!(
                    "{:?}: body incomplete ({} of {body_len} bytes)",
                    self.command,
                    body.len()
                );
                header.extend_from_slice(&body);
                Ok(CommandResponse::read_failed(header))
            },
            None => Ok(CommandResponse::read_failed(header)),
        }
    }
}
