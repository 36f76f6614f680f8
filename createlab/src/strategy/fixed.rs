//! Commands answered by a fixed number of bytes.

use {
    crate::{
        command::{Command, CommandResponse},
        error::Result,
        protocol::echo::{IoSettings, ReadOutcome, SerialIoHelper},
        strategy::CommandStrategy,
        transport::SerialIo,
    },
    log::debug,
};

/// Write a command with echo verification, then read exactly N bytes.
#[derive(Debug, Clone)]
pub struct FixedReturnValueStrategy {
    command: Command,
    expected_size: usize,
    helper: SerialIoHelper,
}

impl FixedReturnValueStrategy {
    /// Strategy for `command` answered by `expected_size` bytes.
    pub fn new(command: impl Into<Command>, expected_size: usize) -> Self {
        Self {
            command: command.into(),
            expected_size,
            helper: SerialIoHelper::default(),
        }
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

    /// Number of response bytes expected after the echo.
    pub fn expected_response_size(&self) -> usize {
        self.expected_size
    }
}

impl<T: SerialIo + ?Sized> CommandStrategy<T> for FixedReturnValueStrategy {
    fn execute(&mut self, io: &mut T) -> Result<CommandResponse> {
        if !self
            .helper
            .write_command_with_echo_verify(io, self.command.as_bytes())?
        {
            return Ok(CommandResponse::write_failed());
        }

        match self.helper.read(io, self.expected_size)? {
            Some(ReadOutcome::Complete(data)) => Ok(CommandResponse::success_with_data(data)),
            Some(ReadOutcome::Partial(data)) => {
                debug!(
                    "{:?}: got {} of {} response bytes",
                    self.command,
                    data.len(),
                    self.expected_size
                );
                Ok(CommandResponse::read_failed(data))
            },
            None => Ok(CommandResponse::read_failed(Vec::new())),
        }
    }
}
