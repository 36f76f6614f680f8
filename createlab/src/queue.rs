//! Per-device command execution queue.
//!
//! One worker thread owns the transport. Submissions are sent to it over a
//! channel, so execution order equals submission order and no two
//! strategies ever touch the transport at the same time.
//!
//! ```text
//!   caller ──submit──▶ [ job channel ] ──▶ worker ──execute──▶ transport
//!      ▲                                     │
//!      └──────────── reply channel ◀─────────┘
//! ```
//!
//! Timeouts at this layer bound how long a caller waits. They cannot
//! interrupt a strategy that is already running; the worker moves on once it
//! returns.

use {
    crate::{
        claim::ClaimGuard,
        command::CommandResponse,
        error::{Error, Result},
        strategy::CommandStrategy,
        transport::Transport,
    },
    log::{debug, info, trace, warn},
    std::{
        panic::{self, AssertUnwindSafe},
        sync::{
            Mutex, PoisonError,
            atomic::{AtomicBool, Ordering},
            mpsc::{self, Receiver, RecvTimeoutError, Sender},
        },
        thread,
        time::Duration,
    },
};

/// Default bound on one submission.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on waiting for the in-flight command during shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on closing the transport.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeouts applied by a [`CommandQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Bound used by [`CommandQueue::execute`].
    pub task_timeout: Duration,
    /// Bound on waiting for the in-flight command during shutdown.
    pub drain_timeout: Duration,
    /// Bound on closing the transport during shutdown.
    pub close_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl QueueSettings {
    /// Set the default per-submission timeout.
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set the shutdown drain timeout.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the transport close timeout.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

struct Job<T: ?Sized> {
    strategy: Box<dyn CommandStrategy<T>>,
    reply: Sender<Result<CommandResponse>>,
}

/// A submitted command whose response has not been collected yet.
#[must_use = "a pending response does nothing unless waited on"]
pub struct PendingResponse {
    label: String,
    reply: Receiver<Result<CommandResponse>>,
}

impl PendingResponse {
    /// Block until the command completes or `timeout` elapses.
    ///
    /// On timeout the command is abandoned from the caller's point of view;
    /// the worker still runs it to completion.
    pub fn wait(self, timeout: Duration) -> Result<CommandResponse> {
        match self.reply.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!("{} did not complete within {timeout:?}", self.label);
                Err(Error::QueueTimeout(timeout))
            },
            Err(RecvTimeoutError::Disconnected) => Err(Error::QueueClosed),
        }
    }
}

/// Serial executor for commands against one open transport.
pub struct CommandQueue<T: Transport> {
    name: String,
    settings: QueueSettings,
    jobs: Mutex<Option<Sender<Job<T>>>>,
    closing: AtomicBool,
    finished: Mutex<Option<Receiver<T>>>,
    claim: Mutex<Option<ClaimGuard>>,
}

impl<T: Transport> CommandQueue<T> {
    /// Take ownership of `transport` and start the worker.
    pub fn new(transport: T, settings: QueueSettings) -> Result<Self> {
        let name = transport.name().to_string();
        let (job_tx, job_rx) = mpsc::channel::<Job<T>>();
        let (done_tx, done_rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("createlab-queue-{name}"))
            .spawn(move || {
                let transport = run_worker(transport, &job_rx);
                // Shutdown may have given up waiting.
                let _ = done_tx.send(transport);
            })?;

        debug!("Command queue started for {name}");
        Ok(Self {
            name,
            settings,
            jobs: Mutex::new(Some(job_tx)),
            closing: AtomicBool::new(false),
            finished: Mutex::new(Some(done_rx)),
            claim: Mutex::new(None),
        })
    }

    /// Hold `guard` until the queue shuts down.
    #[must_use]
    pub fn with_claim(self, guard: ClaimGuard) -> Self {
        *self.claim.lock().unwrap_or_else(PoisonError::into_inner) = Some(guard);
        self
    }

    /// Name of the underlying transport.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Timeouts in use.
    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Whether the queue still accepts submissions.
    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::SeqCst)
    }

    /// Enqueue `strategy` for execution.
    pub fn submit<S>(&self, strategy: S) -> Result<PendingResponse>
    where
        S: CommandStrategy<T> + 'static,
    {
        let label = strategy.label();
        let (reply_tx, reply_rx) = mpsc::channel();
        let job = Job {
            strategy: Box::new(strategy),
            reply: reply_tx,
        };

        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        match jobs.as_ref() {
            Some(tx) if self.is_open() => {
                tx.send(job).map_err(|_| Error::QueueClosed)?;
                trace!("Queued {label} on {}", self.name);
            },
            _ => return Err(Error::QueueClosed),
        }

        Ok(PendingResponse {
            label,
            reply: reply_rx,
        })
    }

    /// Execute `strategy` with the default task timeout.
    pub fn execute<S>(&self, strategy: S) -> Result<CommandResponse>
    where
        S: CommandStrategy<T> + 'static,
    {
        self.execute_with_timeout(strategy, self.settings.task_timeout)
    }

    /// Execute `strategy`, waiting at most `timeout` for its response.
    pub fn execute_with_timeout<S>(&self, strategy: S, timeout: Duration) -> Result<CommandResponse>
    where
        S: CommandStrategy<T> + 'static,
    {
        self.submit(strategy)?.wait(timeout)
    }

    /// Execute `strategy` and report only whether it succeeded.
    pub fn execute_and_return_status<S>(&self, strategy: S) -> bool
    where
        S: CommandStrategy<T> + 'static,
    {
        match self.execute(strategy) {
            Ok(response) => response.is_success(),
            Err(e) => {
                debug!("Command on {} failed: {e}", self.name);
                false
            },
        }
    }

    /// Stop accepting commands, let every submitted command finish, release
    /// the claim and close the transport. Calling it again is a no-op.
    ///
    /// Commands already queued still run in submission order; the whole
    /// drain is bounded by the drain timeout.
    pub fn shutdown(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down command queue for {}", self.name);

        // Dropping the sender ends the worker loop after the queued jobs.
        drop(self.jobs.lock().unwrap_or_else(PoisonError::into_inner).take());

        let finished = self
            .finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let transport = finished.and_then(|rx| match rx.recv_timeout(self.settings.drain_timeout) {
            Ok(transport) => Some(transport),
            Err(_) => {
                warn!(
                    "Queued commands on {} did not finish within {:?}; abandoning them",
                    self.name, self.settings.drain_timeout
                );
                None
            },
        });

        if let Some(guard) = self
            .claim
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            guard.release();
        }

        match transport {
            Some(transport) => close_with_timeout(transport, &self.name, self.settings.close_timeout),
            None => Ok(()),
        }
    }
}

impl<T: Transport> Drop for CommandQueue<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error shutting down command queue for {}: {e}", self.name);
        }
    }
}

fn run_worker<T: Transport>(mut transport: T, jobs: &Receiver<Job<T>>) -> T {
    for Job {
        mut strategy,
        reply,
    } in jobs
    {
        let label = strategy.label();
        trace!("Executing {label} on {}", transport.name());
        let result = panic::catch_unwind(AssertUnwindSafe(|| strategy.execute(&mut transport)))
            .unwrap_or_else(|_| {
                warn!("{label} panicked on {}", transport.name());
                Err(Error::Protocol(format!("{label} panicked")))
            });

        if let Err(e) = &result {
            debug!("{label} failed: {e}");
        }
        // The caller may have timed out and gone away.
        let _ = reply.send(result);
    }
    transport
}

fn close_with_timeout<T: Transport>(mut transport: T, name: &str, timeout: Duration) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("createlab-close-{name}"))
        .spawn(move || {
            let _ = tx.send(transport.close());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            info!("Closed {name}");
            result
        },
        Err(_) => {
            warn!("Closing {name} did not finish within {timeout:?}; continuing without it");
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        claim::ClaimRegistry,
        protocol::IoSettings,
        strategy::NoReturnValueStrategy,
        transport::mock::MockSerial,
    };
    use std::{
        sync::{Arc, atomic::AtomicUsize},
        time::Instant,
    };

    fn echoed(byte: u8) -> NoReturnValueStrategy {
        NoReturnValueStrategy::new([byte]).with_settings(
            IoSettings::default()
                .with_read_timeout(Duration::from_millis(200))
                .with_slurp_timeout(Duration::from_millis(50)),
        )
    }

    struct Record {
        index: usize,
        log: Arc<Mutex<Vec<usize>>>,
        delay: Duration,
    }

    impl CommandStrategy<MockSerial> for Record {
        fn execute(&mut self, _io: &mut MockSerial) -> Result<CommandResponse> {
            thread::sleep(self.delay);
            self.log.lock().unwrap().push(self.index);
            Ok(CommandResponse::success_with_data(vec![self.index as u8]))
        }
    }

    struct Sleep(Duration);

    impl CommandStrategy<MockSerial> for Sleep {
        fn execute(&mut self, _io: &mut MockSerial) -> Result<CommandResponse> {
            thread::sleep(self.0);
            Ok(CommandResponse::success())
        }
    }

    struct Exclusive {
        active: Arc<AtomicUsize>,
        overlaps: Arc<AtomicUsize>,
    }

    impl CommandStrategy<MockSerial> for Exclusive {
        fn execute(&mut self, _io: &mut MockSerial) -> Result<CommandResponse> {
            if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(2));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(CommandResponse::success())
        }
    }

    struct Panics;

    impl CommandStrategy<MockSerial> for Panics {
        fn execute(&mut self, _io: &mut MockSerial) -> Result<CommandResponse> {
            panic!("strategy bug");
        }
    }

    struct Fails;

    impl CommandStrategy<MockSerial> for Fails {
        fn execute(&mut self, _io: &mut MockSerial) -> Result<CommandResponse> {
            Err(Error::EndOfStream)
        }
    }

    fn queue() -> (CommandQueue<MockSerial>, crate::transport::mock::MockSerialHandle) {
        let _ = env_logger::builder().is_test(true).try_init();
        let (io, handle) = MockSerial::silent();
        let settings = QueueSettings::default()
            .with_task_timeout(Duration::from_secs(2))
            .with_drain_timeout(Duration::from_secs(2))
            .with_close_timeout(Duration::from_secs(1));
        (CommandQueue::new(io, settings).unwrap(), handle)
    }

    #[test]
    fn test_execution_order_matches_submission_order() {
        let (queue, _handle) = queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pending: Vec<_> = (0..20)
            .map(|index| {
                queue
                    .submit(Record {
                        index,
                        log: Arc::clone(&log),
                        delay: Duration::from_millis(if index % 3 == 0 { 3 } else { 0 }),
                    })
                    .unwrap()
            })
            .collect();

        for (index, p) in pending.into_iter().enumerate() {
            let resp = p.wait(Duration::from_secs(2)).unwrap();
            assert_eq!(resp.data(), Some(&[index as u8][..]));
        }
        assert_eq!(*log.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_submitters_never_overlap() {
        let (queue, _handle) = queue();
        let queue = Arc::new(queue);
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let active = Arc::clone(&active);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    for _ in 0..10 {
                        let resp = queue
                            .execute(Exclusive {
                                active: Arc::clone(&active),
                                overlaps: Arc::clone(&overlaps),
                            })
                            .unwrap();
                        assert!(resp.is_success());
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_timeout_does_not_stop_queue() {
        let (queue, _handle) = queue();

        let err = queue
            .execute_with_timeout(Sleep(Duration::from_millis(200)), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::QueueTimeout(_)));

        let resp = queue.execute(Sleep(Duration::ZERO)).unwrap();
        assert!(resp.is_success());
    }

    #[test]
    fn test_strategy_error_and_panic_do_not_stop_worker() {
        let (queue, _handle) = queue();

        assert!(matches!(queue.execute(Fails), Err(Error::EndOfStream)));
        assert!(queue.execute(Panics).is_err());
        assert!(queue.execute_and_return_status(Sleep(Duration::ZERO)));
        assert!(!queue.execute_and_return_status(Fails));
    }

    #[test]
    fn test_shutdown_finishes_queued_commands() {
        let (queue, handle) = queue();

        let running = queue.submit(Sleep(Duration::from_millis(100))).unwrap();
        // Let the worker pick up the first job.
        thread::sleep(Duration::from_millis(20));
        let queued = queue.submit(Sleep(Duration::ZERO)).unwrap();

        queue.shutdown().unwrap();

        assert!(running.wait(Duration::from_secs(1)).unwrap().is_success());
        assert!(queued.wait(Duration::from_secs(1)).unwrap().is_success());
        assert!(matches!(
            queue.submit(Sleep(Duration::ZERO)),
            Err(Error::QueueClosed)
        ));
        assert!(!queue.is_open());
        assert!(handle.is_closed());

        // Idempotent.
        queue.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_writes_queued_command_to_transport() {
        let (io, handle) = MockSerial::echoing(&[]);
        handle.lock().write_delay = Duration::from_millis(50);
        let queue = CommandQueue::new(io, QueueSettings::default()).unwrap();

        let first = queue.submit(echoed(0x01)).unwrap();
        let second = queue.submit(echoed(0x02)).unwrap();
        queue.shutdown().unwrap();

        assert!(first.wait(Duration::from_secs(1)).unwrap().is_success());
        assert!(second.wait(Duration::from_secs(1)).unwrap().is_success());
        assert_eq!(handle.writes(), vec![vec![0x01], vec![0x02]]);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_transport_sees_commands_in_submission_order() {
        let (io, handle) = MockSerial::echoing(&[]);
        let queue = Arc::new(CommandQueue::new(io, QueueSettings::default()).unwrap());
        // Submitting while holding this lock fixes the global submission order.
        let submitted = Arc::new(Mutex::new(Vec::new()));

        let threads: Vec<_> = (0..4u8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                let submitted = Arc::clone(&submitted);
                thread::spawn(move || {
                    let pending: Vec<_> = (0..8u8)
                        .map(|i| {
                            let byte = t * 16 + i;
                            let mut order = submitted.lock().unwrap();
                            let p = queue.submit(echoed(byte)).unwrap();
                            order.push(byte);
                            p
                        })
                        .collect();
                    for p in pending {
                        assert!(p.wait(Duration::from_secs(5)).unwrap().is_success());
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        let expected: Vec<Vec<u8>> = submitted.lock().unwrap().iter().map(|b| vec![*b]).collect();
        assert_eq!(expected.len(), 32);
        assert_eq!(handle.writes(), expected);
    }

    #[test]
    fn test_hung_close_is_bounded() {
        let (io, handle) = MockSerial::silent();
        handle.lock().close_delay = Duration::from_secs(3);
        let queue = CommandQueue::new(
            io,
            QueueSettings::default().with_close_timeout(Duration::from_millis(50)),
        )
        .unwrap();

        let start = Instant::now();
        queue.shutdown().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_shutdown_releases_claim() {
        let registry = ClaimRegistry::new();
        let guard = registry.claim("/dev/hidraw3").unwrap();
        let (queue, _handle) = queue();
        let queue = queue.with_claim(guard);

        assert!(registry.is_claimed("/dev/hidraw3"));
        queue.shutdown().unwrap();
        assert!(!registry.is_claimed("/dev/hidraw3"));
    }

    #[test]
    fn test_drop_closes_transport() {
        let (queue, handle) = queue();
        assert_eq!(queue.name(), "mock-serial");
        drop(queue);
        assert!(handle.is_closed());
    }
}
