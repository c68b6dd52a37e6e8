//! In-memory adapter port shared by the integration tests
#![allow(dead_code)]

use j1708_core::protocol::{encode_frame, FrameDecoder, PortStream};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Produces response payloads for each payload written by the host
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct State {
    inbound: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    write_calls: usize,
    read_timeout: Duration,
    fail_reads: Option<io::ErrorKind>,
    fail_writes: Option<io::ErrorKind>,
    short_writes: bool,
    responder: Option<Responder>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

/// Fake VNA2 adapter. Clones share the same buffers.
#[derive(Clone, Default)]
pub struct MockPort {
    shared: Arc<Shared>,
}

impl MockPort {
    pub fn new() -> Self {
        let port = Self::default();
        port.shared.state.lock().unwrap().read_timeout = Duration::from_millis(10);
        port
    }

    /// Port that acknowledges every command
    pub fn acking() -> Self {
        let port = Self::new();
        port.respond_with(|payload| vec![vec![0x00, payload[0]]]);
        port
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.shared.state.lock().unwrap().responder = Some(Box::new(responder));
    }

    /// Queue raw bytes for the host to read
    pub fn inject(&self, bytes: &[u8]) {
        self.shared.state.lock().unwrap().inbound.extend(bytes);
        self.shared.ready.notify_all();
    }

    /// Queue a framed payload for the host to read
    pub fn inject_frame(&self, payload: &[u8]) {
        self.inject(&encode_frame(payload).unwrap());
    }

    /// Make every following read fail
    pub fn fail_reads(&self, kind: io::ErrorKind) {
        self.shared.state.lock().unwrap().fail_reads = Some(kind);
        self.shared.ready.notify_all();
    }

    /// Make every following write fail
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.shared.state.lock().unwrap().fail_writes = Some(kind);
    }

    /// Make every following write accept one byte less than offered
    pub fn short_writes(&self) {
        self.shared.state.lock().unwrap().short_writes = true;
    }

    /// Number of `write` calls, successful or not
    pub fn write_calls(&self) -> usize {
        self.shared.state.lock().unwrap().write_calls
    }

    /// Payloads written by the host, decoded from the wire
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().unwrap().written.clone()
    }

    pub fn boxed(&self) -> Box<dyn PortStream> {
        Box::new(self.clone())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock().unwrap();
        if state.inbound.is_empty() && state.fail_reads.is_none() {
            let timeout = state.read_timeout;
            state = self.shared.ready.wait_timeout(state, timeout).unwrap().0;
        }

        if let Some(kind) = state.fail_reads {
            return Err(io::Error::new(kind, "mock read failure"));
        }
        if state.inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timeout"));
        }

        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock().unwrap();
        state.write_calls += 1;

        if let Some(kind) = state.fail_writes {
            return Err(io::Error::new(kind, "mock write failure"));
        }
        if state.short_writes {
            return Ok(buf.len().saturating_sub(1));
        }

        let mut decoder = FrameDecoder::new();
        let payloads: Vec<Vec<u8>> = decoder
            .feed(buf)
            .into_iter()
            .map(|r| r.expect("host wrote a malformed frame"))
            .collect();

        for payload in payloads {
            let responses = match state.responder.as_mut() {
                Some(responder) => responder(&payload),
                None => Vec::new(),
            };
            state.written.push(payload);
            for response in responses {
                let wire = encode_frame(&response).unwrap();
                state.inbound.extend(wire);
            }
        }

        drop(state);
        self.shared.ready.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PortStream for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.shared.state.lock().unwrap().read_timeout = timeout;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.shared.state.lock().unwrap().inbound.clear();
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn PortStream>> {
        Ok(Box::new(self.clone()))
    }
}

/// Route library logs to the test output. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds, panicking after two seconds
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Frame payload of a stats report
pub fn stats_payload(valid: u32, invalid: u32) -> Vec<u8> {
    let mut payload = vec![0x17];
    payload.extend_from_slice(&valid.to_be_bytes());
    payload.extend_from_slice(&invalid.to_be_bytes());
    payload.extend_from_slice(&[0, 0, 0, 0, 3, 7]);
    payload
}
