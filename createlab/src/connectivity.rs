//! Detecting a device that went away.
//!
//! Serial devices give no reliable signal when they are unplugged; the
//! only way to notice is that commands stop working. [`DevicePinger`] sends a
//! cheap command through the device's queue at a fixed interval and reports
//! a lost connection once enough pings in a row have failed.

use {
    crate::{
        error::Result,
        queue::CommandQueue,
        strategy::CommandStrategy,
        transport::Transport,
    },
    log::{debug, warn},
    std::{
        fmt,
        sync::{
            Arc, Mutex, PoisonError,
            mpsc::{self, RecvTimeoutError, Sender},
        },
        thread::{self, JoinHandle},
        time::Duration,
    },
};

/// Default time between pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Connection state as seen by the pinger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// The device answers pings.
    Connected,
    /// The device stopped answering.
    Disconnected {
        /// Why the connection was declared lost.
        reason: String,
    },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected { reason } => write!(f, "disconnected ({reason})"),
        }
    }
}

/// Receives connection state changes.
///
/// Called from the pinger thread; keep it short.
pub trait ConnectionListener: Send + Sync {
    /// The state changed to `state`.
    fn on_state_change(&self, state: &ConnectionState);
}

impl<F> ConnectionListener for F
where
    F: Fn(&ConnectionState) + Send + Sync,
{
    fn on_state_change(&self, state: &ConnectionState) {
        self(state);
    }
}

/// Ping timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSettings {
    /// Time between pings.
    pub interval: Duration,
    /// Consecutive failed pings before the device counts as lost.
    pub failure_threshold: u32,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PING_INTERVAL,
            failure_threshold: 1,
        }
    }
}

impl PingSettings {
    /// Set the ping interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the number of consecutive failures tolerated.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }
}

/// Background thread pinging one device.
pub struct DevicePinger {
    state: Arc<Mutex<ConnectionState>>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DevicePinger {
    /// Start pinging `queue` with strategies built by `make_ping`.
    ///
    /// The thread exits after reporting a lost connection, or when the
    /// pinger is stopped.
    pub fn start<T, S, F, L>(
        queue: Arc<CommandQueue<T>>,
        make_ping: F,
        settings: PingSettings,
        listener: L,
    ) -> Result<Self>
    where
        T: Transport,
        S: CommandStrategy<T> + 'static,
        F: Fn() -> S + Send + 'static,
        L: ConnectionListener + 'static,
    {
        let state = Arc::new(Mutex::new(ConnectionState::Connected));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(format!("createlab-ping-{}", queue.name()))
            .spawn(move || {
                let mut failures = 0u32;
                loop {
                    match stop_rx.recv_timeout(settings.interval) {
                        Err(RecvTimeoutError::Timeout) => {},
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let reason = match queue.execute(make_ping()) {
                        Ok(response) if response.is_success() => {
                            failures = 0;
                            continue;
                        },
                        Ok(_) => "ping failed".to_string(),
                        Err(e) => e.to_string(),
                    };

                    failures += 1;
                    debug!(
                        "Ping {failures}/{} on {} failed: {reason}",
                        settings.failure_threshold,
                        queue.name()
                    );
                    if failures >= settings.failure_threshold {
                        warn!("Lost connection to {}: {reason}", queue.name());
                        let new_state = ConnectionState::Disconnected { reason };
                        *thread_state.lock().unwrap_or_else(PoisonError::into_inner) =
                            new_state.clone();
                        listener.on_state_change(&new_state);
                        break;
                    }
                }
            })?;

        Ok(Self {
            state,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Last known connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the pinger still considers the device connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Stop pinging and wait for the thread to exit.
    ///
    /// Waits for a ping already in progress.
    pub fn stop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Ping thread panicked");
            }
        }
    }
}

impl Drop for DevicePinger {
    fn drop(&mut self) {
        self.stop();
    }
}
