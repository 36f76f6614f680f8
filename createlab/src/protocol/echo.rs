//! Echo and slurp primitives for byte-stream devices.
//!
//! CREATE Lab serial firmware echoes every command byte-for-byte before it
//! sends any real response. These routines build the wire protocol on top of
//! that convention:
//!
//! - [`SerialIoHelper::read`] reads a fixed number of bytes within a time budget
//! - [`SerialIoHelper::write_command_with_echo_verify`] writes a command, checks
//!   the echo and retries after resynchronising the stream
//! - [`SerialIoHelper::slurp_and_match_pattern`] discards input until a known
//!   byte pattern shows up
//!
//! Every loop is bounded by [`IoSettings`], so a silent device can never hold
//! the queue worker longer than the configured budgets.

use {
    crate::{
        error::{Error, Result},
        transport::SerialIo,
    },
    log::{debug, trace},
    std::{
        thread,
        time::{Duration, Instant},
    },
};

/// Default budget for reading a response.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default budget for draining or scanning the input stream.
pub const DEFAULT_SLURP_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of write attempts for echo verification.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default sleep between availability polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Largest buffer reserved up front by [`SerialIoHelper::read`].
const MAX_READ_PREALLOC: usize = 4096;

/// Timing and retry settings of the serial primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSettings {
    /// Budget for reading a response or an echo.
    pub read_timeout: Duration,
    /// Budget for draining the input or scanning for a pattern.
    pub slurp_timeout: Duration,
    /// Total number of writes attempted by echo verification.
    pub max_retries: u32,
    /// Sleep between availability polls.
    pub poll_interval: Duration,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            slurp_timeout: DEFAULT_SLURP_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl IoSettings {
    /// Set the read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the slurp timeout.
    #[must_use]
    pub fn with_slurp_timeout(mut self, timeout: Duration) -> Self {
        self.slurp_timeout = timeout;
        self
    }

    /// Set the number of write attempts.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the availability poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Longest time a single echo-verified write may take.
    ///
    /// Useful for checking that a queue timeout leaves the worker room to
    /// make progress.
    pub fn worst_case_write(&self) -> Duration {
        (self.read_timeout + self.slurp_timeout) * self.max_retries.max(1)
    }
}

/// Outcome of a bounded read that did not hit end-of-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// All requested bytes arrived.
    Complete(Vec<u8>),
    /// The time budget ran out; holds whatever arrived before that.
    Partial(Vec<u8>),
}

impl ReadOutcome {
    /// Whether all requested bytes arrived.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Bytes read, complete or not.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Complete(b) | Self::Partial(b) => b,
        }
    }

    /// Consume and return the bytes read.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Complete(b) | Self::Partial(b) => b,
        }
    }
}

/// Result of waiting for one byte.
enum Polled {
    Byte(u8),
    TimedOut,
    EndOfStream,
}

/// Echo/slurp primitives parameterised by [`IoSettings`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialIoHelper {
    settings: IoSettings,
}

impl SerialIoHelper {
    /// Create a helper with the given settings.
    pub fn new(settings: IoSettings) -> Self {
        Self { settings }
    }

    /// The settings in use.
    pub fn settings(&self) -> &IoSettings {
        &self.settings
    }

    /// Wait for the next byte until `deadline`.
    ///
    /// Buffered data is always consumed, even when the deadline has passed.
    fn poll_byte<T: SerialIo + ?Sized>(&self, io: &mut T, deadline: Instant) -> Result<Polled> {
        loop {
            if io.is_data_available()? {
                match io.read_one_byte() {
                    Ok(b) => return Ok(Polled::Byte(b)),
                    Err(Error::EndOfStream) => return Ok(Polled::EndOfStream),
                    Err(Error::Timeout(_)) => {},
                    Err(e) => return Err(e),
                }
            }
            if Instant::now() >= deadline {
                return Ok(Polled::TimedOut);
            }
            thread::sleep(self.settings.poll_interval);
        }
    }

    /// Read `n` bytes within the read timeout.
    ///
    /// Returns `None` on end-of-stream and [`ReadOutcome::Partial`] when the
    /// budget runs out first.
    pub fn read<T: SerialIo + ?Sized>(&self, io: &mut T, n: usize) -> Result<Option<ReadOutcome>> {
        let deadline = Instant::now() + self.settings.read_timeout;
        // `n` may come from a device header; grow on demand past this.
        let mut buf = Vec::with_capacity(n.min(MAX_READ_PREALLOC));

        while buf.len() < n {
            match self.poll_byte(io, deadline)? {
                Polled::Byte(b) => buf.push(b),
                Polled::EndOfStream => {
                    debug!("End of stream after {} of {n} bytes", buf.len());
                    return Ok(None);
                },
                Polled::TimedOut => {
                    debug!(
                        "Read timed out after {} of {n} bytes ({:?})",
                        buf.len(),
                        self.settings.read_timeout
                    );
                    return Ok(Some(ReadOutcome::Partial(buf)));
                },
            }
        }

        trace!("Read {n} bytes: {buf:02X?}");
        Ok(Some(ReadOutcome::Complete(buf)))
    }

    /// Write `command` and confirm the device echoes it back.
    ///
    /// A failed attempt drains the input stream before the next write. At
    /// most `max_retries` writes are made; running out of attempts returns
    /// `Ok(false)`, which strategies report as a failed write. Transport
    /// errors are returned immediately.
    pub fn write_command_with_echo_verify<T: SerialIo + ?Sized>(
        &self,
        io: &mut T,
        command: &[u8],
    ) -> Result<bool> {
        let attempts = self.settings.max_retries.max(1);

        for attempt in 1..=attempts {
            io.write(command)?;

            if self.echo_matches(io, command)? {
                if attempt > 1 {
                    debug!("Echo verified on attempt {attempt}/{attempts}");
                }
                return Ok(true);
            }

            debug!("Echo mismatch (attempt {attempt}/{attempts}), resynchronising");
            self.slurp(io)?;
        }

        debug!("Giving up on {command:02X?} after {attempts} attempts");
        Ok(false)
    }

    fn echo_matches<T: SerialIo + ?Sized>(&self, io: &mut T, command: &[u8]) -> Result<bool> {
        let deadline = Instant::now() + self.settings.read_timeout;

        for (i, &expected) in command.iter().enumerate() {
            match self.poll_byte(io, deadline)? {
                Polled::Byte(b) if b == expected => {},
                Polled::Byte(b) => {
                    trace!("Echo byte {i}: expected 0x{expected:02X}, got 0x{b:02X}");
                    return Ok(false);
                },
                Polled::EndOfStream => return Ok(false),
                Polled::TimedOut => {
                    trace!("Echo timed out after {i} of {} bytes", command.len());
                    return Ok(false);
                },
            }
        }

        Ok(true)
    }

    /// Discard buffered input until none is left or the slurp timeout ends.
    ///
    /// Returns the number of discarded bytes.
    pub fn slurp<T: SerialIo + ?Sized>(&self, io: &mut T) -> Result<usize> {
        let deadline = Instant::now() + self.settings.slurp_timeout;
        let mut discarded = 0usize;

        while Instant::now() < deadline && io.is_data_available()? {
            match io.read_one_byte() {
                Ok(_) => discarded += 1,
                Err(Error::EndOfStream | Error::Timeout(_)) => break,
                Err(e) => return Err(e),
            }
        }

        if discarded > 0 {
            debug!("Slurped {discarded} bytes");
        }
        Ok(discarded)
    }

    /// Discard input until `pattern` arrives contiguously.
    ///
    /// The first byte is searched for within the slurp timeout; the rest
    /// must follow within a fresh read timeout. An empty pattern matches
    /// immediately.
    pub fn slurp_and_match_pattern<T: SerialIo + ?Sized>(
        &self,
        io: &mut T,
        pattern: &[u8],
    ) -> Result<bool> {
        let Some((&first, rest)) = pattern.split_first() else {
            return Ok(true);
        };

        let deadline = Instant::now() + self.settings.slurp_timeout;
        let mut discarded = 0usize;
        loop {
            match self.poll_byte(io, deadline)? {
                Polled::Byte(b) if b == first => break,
                Polled::Byte(_) => discarded += 1,
                Polled::EndOfStream => return Ok(false),
                Polled::TimedOut => {
                    debug!("Pattern {pattern:02X?} not seen within {:?}", self.settings.slurp_timeout);
                    return Ok(false);
                },
            }
        }
        if discarded > 0 {
            trace!("Discarded {discarded} bytes before pattern start");
        }

        let deadline = Instant::now() + self.settings.read_timeout;
        for &expected in rest {
            match self.poll_byte(io, deadline)? {
                Polled::Byte(b) if b == expected => {},
                Polled::Byte(b) => {
                    debug!("Pattern {pattern:02X?} broken by 0x{b:02X}");
                    return Ok(false);
                },
                Polled::EndOfStream | Polled::TimedOut => return Ok(false),
            }
        }

        Ok(true)
    }
}
