//! Byte channel
//!
//! Owns the open port for the lifetime of a session. A dedicated worker thread
//! blocks on port reads and runs the receive state machine; writers frame and
//! escape payloads under a single write lock.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::{Frame, FrameDecoder, PortStream, ProtocolError};

/// Callback receiving each valid frame payload, in arrival order.
/// Runs on the read worker thread.
pub type FrameReceiver = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Cumulative channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounters {
    /// Frames written to the port
    pub tx_frames: u64,
    /// Bytes written to the port, after escaping
    pub tx_bytes: u64,
    /// Valid frames received
    pub rx_frames: u64,
    /// Bytes read from the port
    pub rx_bytes: u64,
    /// Frames dropped for checksum, escape or length errors
    pub rx_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    tx_frames: AtomicU64,
    tx_bytes: AtomicU64,
    rx_frames: AtomicU64,
    rx_bytes: AtomicU64,
    rx_dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ChannelCounters {
        ChannelCounters {
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
        }
    }
}

struct Writer {
    port: Box<dyn PortStream>,
    buffer: Vec<u8>,
}

/// An open adapter port
pub struct Channel {
    port_name: String,
    writer: Mutex<Writer>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Channel {
    /// Take ownership of `stream` and start the read worker.
    ///
    /// Valid frames are handed to `receiver`; the returned handle reports how
    /// the worker ended.
    pub fn open(
        port_name: &str,
        mut stream: Box<dyn PortStream>,
        read_timeout: Duration,
        receiver: FrameReceiver,
    ) -> Result<(Self, ReaderHandle), ProtocolError> {
        stream.set_timeout(read_timeout)?;
        stream.clear_input_buffer()?;
        let reader = stream.try_clone()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let (exit_tx, exit_rx) = oneshot::channel();

        let worker = ReadWorker {
            port_name: port_name.to_string(),
            port: reader,
            decoder: FrameDecoder::new(),
            receiver,
            shutdown: Arc::clone(&shutdown),
            counters: Arc::clone(&counters),
        };
        let thread = thread::Builder::new()
            .name("j1708-reader".to_string())
            .spawn(move || {
                let result = worker.run();
                let _ = exit_tx.send(result);
            })?;

        let channel = Self {
            port_name: port_name.to_string(),
            writer: Mutex::new(Writer {
                port: stream,
                buffer: Vec::with_capacity(2 * super::MAX_FRAME_PAYLOAD),
            }),
            shutdown,
            counters,
        };

        Ok((
            channel,
            ReaderHandle {
                exit: Some(exit_rx),
                result: None,
                thread: Some(thread),
            },
        ))
    }

    /// Frame, escape and write one payload
    pub fn write(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        let frame = Frame::new(payload.to_vec())?;

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let Writer { port, buffer } = &mut *writer;
        buffer.clear();
        frame.write_wire(buffer);

        let written = port.write(buffer.as_slice())?;
        if written != buffer.len() {
            return Err(ProtocolError::PartialWrite {
                written,
                expected: buffer.len(),
            });
        }
        port.flush()?;

        self.counters.tx_frames.fetch_add(1, Ordering::Relaxed);
        self.counters
            .tx_bytes
            .fetch_add(written as u64, Ordering::Relaxed);
        trace!(port = %self.port_name, bytes = written, "frame written");

        Ok(())
    }

    /// Ask the read worker to stop. It exits at its next read timeout.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Port this channel was opened on
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Current counters
    pub fn counters(&self) -> ChannelCounters {
        self.counters.snapshot()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle on the read worker
pub struct ReaderHandle {
    exit: Option<oneshot::Receiver<Result<(), ProtocolError>>>,
    result: Option<Result<(), ProtocolError>>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Wait for the worker to end.
    ///
    /// Returns the worker's error on the first completed call after a fatal
    /// read failure; later calls return `Ok(())`. Cancel-safe: the result is
    /// kept until a call runs to completion.
    pub async fn wait(&mut self) -> Result<(), ProtocolError> {
        if let Some(exit) = self.exit.as_mut() {
            let result = exit.await.unwrap_or(Err(ProtocolError::ReaderStopped));
            self.exit = None;
            self.result = Some(result);
        }

        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }

        self.result.take().unwrap_or(Ok(()))
    }

    /// Whether the worker has already stopped
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }
}

struct ReadWorker {
    port_name: String,
    port: Box<dyn PortStream>,
    decoder: FrameDecoder,
    receiver: FrameReceiver,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl ReadWorker {
    fn run(mut self) -> Result<(), ProtocolError> {
        debug!(port = %self.port_name, "read worker started");
        let mut buffer = [0u8; 1024];

        while !self.shutdown.load(Ordering::SeqCst) {
            let read = match self.port.read(&mut buffer) {
                Ok(0) => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "port closed",
                )),
                other => other,
            };

            let n = match read {
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(source) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!(port = %self.port_name, error = %source, "read failed");
                    return Err(ProtocolError::ReadFailed {
                        port: self.port_name.clone(),
                        source,
                    });
                }
            };

            self.counters
                .rx_bytes
                .fetch_add(n as u64, Ordering::Relaxed);

            for result in self.decoder.feed(&buffer[..n]) {
                match result {
                    Ok(payload) => {
                        self.counters.rx_frames.fetch_add(1, Ordering::Relaxed);
                        (self.receiver)(payload);
                    }
                    Err(e) => {
                        self.counters.rx_dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(port = %self.port_name, error = %e, "dropping frame");
                    }
                }
            }
        }

        debug!(port = %self.port_name, "read worker stopped");
        Ok(())
    }
}
