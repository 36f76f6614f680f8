//! In-memory transports for unit tests.

use {
    crate::{
        error::{Error, Result},
        transport::{HidIo, SerialIo, Transport},
    },
    std::{
        collections::VecDeque,
        sync::{Arc, Mutex, MutexGuard},
        thread,
        time::Duration,
    },
};

type SerialResponder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;
type HidResponder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
pub(crate) struct SerialState {
    pub rx: VecDeque<u8>,
    pub writes: Vec<Vec<u8>>,
    pub eof_when_empty: bool,
    pub closed: bool,
    pub write_delay: Duration,
    pub close_delay: Duration,
    responder: Option<SerialResponder>,
}

/// Scripted serial device. Bytes produced by the responder for a write are
/// appended to the receive buffer.
pub(crate) struct MockSerial {
    state: Arc<Mutex<SerialState>>,
}

/// Inspection handle that stays with the test after the mock moves into a queue.
#[derive(Clone)]
pub(crate) struct MockSerialHandle {
    state: Arc<Mutex<SerialState>>,
}

impl MockSerial {
    pub fn silent() -> (Self, MockSerialHandle) {
        let state = Arc::new(Mutex::new(SerialState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockSerialHandle { state },
        )
    }

    pub fn with_responder<F>(responder: F) -> (Self, MockSerialHandle)
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let (mock, handle) = Self::silent();
        handle.lock().responder = Some(Box::new(responder));
        (mock, handle)
    }

    /// Echoes every write and then appends `reply`.
    pub fn echoing(reply: &[u8]) -> (Self, MockSerialHandle) {
        let reply = reply.to_vec();
        Self::with_responder(move |written| {
            let mut out = written.to_vec();
            out.extend_from_slice(&reply);
            out
        })
    }
}

impl MockSerialHandle {
    pub fn lock(&self) -> MutexGuard<'_, SerialState> {
        self.state.lock().unwrap()
    }

    pub fn push_rx(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes.iter().copied());
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Transport for MockSerial {
    fn name(&self) -> &str {
        "mock-serial"
    }

    fn close(&mut self) -> Result<()> {
        let delay = self.state.lock().unwrap().close_delay;
        thread::sleep(delay);
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

impl SerialIo for MockSerial {
    fn read_one_byte(&mut self) -> Result<u8> {
        let mut state = self.state.lock().unwrap();
        match state.rx.pop_front() {
            Some(b) => Ok(b),
            None if state.eof_when_empty => Err(Error::EndOfStream),
            None => Err(Error::Timeout("mock: no data".into())),
        }
    }

    fn is_data_available(&mut self) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if state.rx.is_empty() && state.eof_when_empty {
            // Let the reader observe end-of-stream.
            return Ok(true);
        }
        Ok(!state.rx.is_empty())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let delay = self.state.lock().unwrap().write_delay;
        thread::sleep(delay);

        let mut state = self.state.lock().unwrap();
        state.writes.push(bytes.to_vec());
        if let Some(mut responder) = state.responder.take() {
            let reply = responder(bytes);
            state.rx.extend(reply);
            state.responder = Some(responder);
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct HidState {
    pub reports: VecDeque<Vec<u8>>,
    pub writes: Vec<Vec<u8>>,
    pub read_error: Option<fn() -> Error>,
    pub write_error: Option<fn() -> Error>,
    responder: Option<HidResponder>,
}

/// Scripted HID device. Each write may enqueue any number of input reports.
pub(crate) struct MockHid {
    state: Arc<Mutex<HidState>>,
}

#[derive(Clone)]
pub(crate) struct MockHidHandle {
    state: Arc<Mutex<HidState>>,
}

impl MockHid {
    pub fn with_responder<F>(responder: F) -> (Self, MockHidHandle)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(HidState {
            responder: Some(Box::new(responder)),
            ..HidState::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockHidHandle { state },
        )
    }
}

impl MockHidHandle {
    pub fn lock(&self) -> MutexGuard<'_, HidState> {
        self.state.lock().unwrap()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }
}

impl Transport for MockHid {
    fn name(&self) -> &str {
        "mock-hid"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl HidIo for MockHid {
    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(make_error) = state.write_error {
            return Err(make_error());
        }
        state.writes.push(report.to_vec());
        if let Some(mut responder) = state.responder.take() {
            let reports = responder(report);
            state.reports.extend(reports);
            state.responder = Some(responder);
        }
        Ok(())
    }

    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let next = {
            let mut state = self.state.lock().unwrap();
            if let Some(make_error) = state.read_error {
                return Err(make_error());
            }
            state.reports.pop_front()
        };
        match next {
            Some(report) => {
                let n = report.len().min(buf.len());
                buf[..n].copy_from_slice(&report[..n]);
                Ok(n)
            },
            None => {
                thread::sleep(timeout);
                Ok(0)
            },
        }
    }
}
