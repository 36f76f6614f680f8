//! Commands that expect nothing back but their echo.

use {
    crate::{
        command::{Command, CommandResponse},
        error::Result,
        protocol::echo::{IoSettings, SerialIoHelper},
        strategy::CommandStrategy,
        transport::SerialIo,
    },
    log::trace,
};

/// Write a command with echo verification and report only success.
#[derive(Debug, Clone)]
pub struct NoReturnValueStrategy {
    command: Command,
    helper: SerialIoHelper,
}

impl NoReturnValueStrategy {
    /// Strategy for `command` with default I/O settings.
    pub fn new(command: impl Into<Command>) -> Self {
        Self {
            command: command.into(),
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
}

impl<T: SerialIo + ?Sized> CommandStrategy<T> for NoReturnValueStrategy {
    fn execute(&mut self, io: &mut T) -> Result<CommandResponse> {
        trace!("Executing {:?}", self.command);
        if self
            .helper
            .write_command_with_echo_verify(io, self.command.as_bytes())?
        {
            Ok(CommandResponse::success())
        } else {
            Ok(CommandResponse::write_failed())
        }
    }
}
