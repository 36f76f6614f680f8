//! Commands sent as HID output reports.
//!
//! The device answers asynchronously, tagging each input report with the
//! command id of the write it belongs to. Reports carrying any other id are
//! stale replies to earlier, abandoned commands and are skipped.

use {
    crate::{
        command::{Command, CommandResponse},
        error::Result,
        protocol::hid::HidConnection,
        strategy::CommandStrategy,
        transport::HidIo,
    },
    log::{debug, warn},
    std::time::{Duration, Instant},
};

/// Default absolute bound on waiting for the matching input report.
pub const DEFAULT_HID_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default wait for a single report inside the polling loop.
pub const DEFAULT_HID_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Write one output report and wait for the input report with the same id.
#[derive(Debug, Clone)]
pub struct HidCommandStrategy {
    command: Command,
    expected_size: usize,
    read_timeout: Duration,
    poll_timeout: Duration,
}

impl HidCommandStrategy {
    /// Strategy for `command` whose reply carries `expected_size` useful bytes.
    ///
    /// Use `0` for commands whose reply is only an acknowledgement.
    pub fn new(command: impl Into<Command>, expected_size: usize) -> Self {
        Self {
            command: command.into(),
            expected_size,
            read_timeout: DEFAULT_HID_READ_TIMEOUT,
            poll_timeout: DEFAULT_HID_POLL_TIMEOUT,
        }
    }

    /// Set the absolute read deadline.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the per-report poll wait.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// The command payload this strategy writes.
    pub fn encode_command(&self) -> &Command {
        &self.command
    }

    /// Number of payload bytes copied out of the matching report.
    pub fn expected_response_size(&self) -> usize {
        self.expected_size
    }
}

impl<T: HidIo> CommandStrategy<HidConnection<T>> for HidCommandStrategy {
    fn execute(&mut self, conn: &mut HidConnection<T>) -> Result<CommandResponse> {
        let id = match conn.write(self.command.as_bytes()) {
            Ok(id) => id,
            Err(e) if e.is_disconnect() => return Err(e),
            Err(e) => {
                warn!("HID write of {:?} failed: {e}", self.command);
                return Ok(CommandResponse::write_failed());
            },
        };

        let deadline = Instant::now() + self.read_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("No HID report with command id {id} within {:?}", self.read_timeout);
                return Ok(CommandResponse::from_parts(true, false, None));
            }

            let report = match conn.read(remaining.min(self.poll_timeout)) {
                Ok(Some(report)) => report,
                Ok(None) => continue,
                Err(e) if e.is_disconnect() => return Err(e),
                Err(e) => {
                    warn!("HID read failed: {e}");
                    return Ok(CommandResponse::from_parts(true, false, None));
                },
            };

            if report.command_id != id {
                debug!(
                    "Ignoring HID report with command id {} (waiting for {id})",
                    report.command_id
                );
                continue;
            }

            let n = self.expected_size.min(report.payload.len());
            let mut payload = report.payload;
            payload.truncate(n);
            return Ok(CommandResponse::from_parts(true, true, Some(payload)));
        }
    }
}
