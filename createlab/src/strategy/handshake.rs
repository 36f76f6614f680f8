//! Startup handshake for serial devices.
//!
//! After power-up the firmware loops, announcing that it is ready by
//! repeatedly emitting a fixed byte pattern. The host answers with its own
//! pattern, waits for it to be echoed, and then has to leave the device
//! alone long enough for it to leave the loop; anything sent earlier is lost.

use {
    crate::{
        command::CommandResponse,
        error::Result,
        protocol::echo::{IoSettings, SerialIoHelper},
        strategy::CommandStrategy,
        transport::SerialIo,
    },
    log::{debug, info},
    std::{thread, time::Duration},
};

/// Default pause after a confirmed handshake.
///
/// Must be at least one period of the firmware's startup loop.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(600);

/// Wait for the startup pattern, answer, confirm the echo, then settle.
///
/// A full handshake can take longer than a queue's default task timeout
/// (see [`time_budget`](Self::time_budget)). Run it through
/// [`perform_handshake`](crate::connection::perform_handshake), which waits
/// long enough, rather than plain [`CommandQueue::execute`](crate::CommandQueue::execute).
#[derive(Debug, Clone)]
pub struct HandshakeStrategy {
    startup_pattern: Vec<u8>,
    response_pattern: Vec<u8>,
    settle_delay: Duration,
    helper: SerialIoHelper,
}

impl HandshakeStrategy {
    /// Handshake expecting `startup_pattern` and answering `response_pattern`.
    pub fn new(startup_pattern: impl Into<Vec<u8>>, response_pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            startup_pattern: startup_pattern.into(),
            response_pattern: response_pattern.into(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            helper: SerialIoHelper::default(),
        }
    }

    /// Use custom I/O settings.
    #[must_use]
    pub fn with_settings(mut self, settings: IoSettings) -> Self {
        self.helper = SerialIoHelper::new(settings);
        self
    }

    /// Set the pause after a confirmed handshake.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Pattern the device emits while waiting for the host.
    pub fn startup_pattern(&self) -> &[u8] {
        &self.startup_pattern
    }

    /// Pattern the host answers with.
    pub fn response_pattern(&self) -> &[u8] {
        &self.response_pattern
    }

    /// Pause after a confirmed handshake.
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Longest time [`execute`](CommandStrategy::execute) can take: two
    /// pattern scans plus the settle delay.
    pub fn time_budget(&self) -> Duration {
        let s = self.helper.settings();
        (s.slurp_timeout + s.read_timeout) * 2 + self.settle_delay
    }
}

impl<T: SerialIo + ?Sized> CommandStrategy<T> for HandshakeStrategy {
    fn execute(&mut self, io: &mut T) -> Result<CommandResponse> {
        debug!("Waiting for startup pattern {:02X?}", self.startup_pattern);
        if !self.helper.slurp_and_match_pattern(io, &self.startup_pattern)? {
            debug!("Startup pattern not seen");
            return Ok(CommandResponse::write_failed());
        }

        io.write(&self.response_pattern)?;

        if !self.helper.slurp_and_match_pattern(io, &self.response_pattern)? {
            debug!("Device did not echo response pattern");
            return Ok(CommandResponse::read_failed(Vec::new()));
        }

        thread::sleep(self.settle_delay);
        info!("Handshake complete on {}", io.name());
        Ok(CommandResponse::success())
    }
}
