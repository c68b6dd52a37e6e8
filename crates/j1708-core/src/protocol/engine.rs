//! Reliability and dispatch
//!
//! Sends commands and waits for their acknowledgements, and routes unsolicited
//! frames (vehicle messages, statistics) coming off the read worker.
//!
//! Acks carry only the opcode of the acknowledged command, so a send is
//! matched with the next ack for its opcode. Only one command may be in flight
//! at a time: `send` holds a lock over the whole write/wait/retry sequence.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    Ack, Channel, ChannelCounters, Encode, FrameReceiver, Opcode, PortStream, ProtocolError,
    ReaderHandle, Stats, VehicleMessage, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_READ_TIMEOUT_MS,
};

/// Handler for decoded vehicle messages. Runs on the read worker thread.
pub type VehicleHandler = Arc<dyn Fn(VehicleMessage) + Send + Sync>;

/// Protocol timing
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Time to wait for an ack after each write
    pub ack_timeout: Duration,
    /// Writes per command before giving up
    pub max_attempts: u32,
    /// Port read timeout for the read worker
    pub read_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}

/// Tracks the adapter's invalid-byte counter across stats reports
#[derive(Debug, Default)]
pub struct StatsMonitor {
    last_invalid_bytes: u32,
    latest: Option<Stats>,
}

impl StatsMonitor {
    /// Create a monitor with no observations
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a report. Returns the new cumulative count when the invalid-byte
    /// counter went up since the last report.
    pub fn observe(&mut self, stats: Stats) -> Option<u32> {
        self.latest = Some(stats);
        let count = stats.invalid_j1708_bytes;

        if count > self.last_invalid_bytes {
            self.last_invalid_bytes = count;
            return Some(count);
        }
        if count < self.last_invalid_bytes {
            // adapter restarted its counters
            debug!(previous = self.last_invalid_bytes, count, "stats counter reset");
            self.last_invalid_bytes = count;
        }
        None
    }

    /// Most recent report
    pub fn latest(&self) -> Option<Stats> {
        self.latest
    }
}

struct Dispatcher {
    port_name: String,
    ack_waiter: Mutex<Option<mpsc::UnboundedSender<Ack>>>,
    vehicle_handler: VehicleHandler,
    stats: Mutex<StatsMonitor>,
}

impl Dispatcher {
    fn new(port_name: &str, vehicle_handler: VehicleHandler) -> Self {
        Self {
            port_name: port_name.to_string(),
            ack_waiter: Mutex::new(None),
            vehicle_handler,
            stats: Mutex::new(StatsMonitor::new()),
        }
    }

    fn dispatch(&self, payload: Vec<u8>) {
        let Some(&first) = payload.first() else {
            trace!(port = %self.port_name, "ignoring empty frame");
            return;
        };

        match Opcode::from_byte(first) {
            Some(Opcode::Ack) => match Ack::decode(&payload) {
                Ok(ack) => self.deliver_ack(ack),
                Err(e) => warn!(port = %self.port_name, error = %e, "dropping ack"),
            },
            Some(Opcode::VehicleMessage) => match VehicleMessage::decode(&payload) {
                Ok(message) => (self.vehicle_handler)(message),
                Err(e) => warn!(port = %self.port_name, error = %e, "dropping j1587 message"),
            },
            Some(Opcode::Stats) => match Stats::decode(&payload) {
                Ok(stats) => {
                    let increased = self
                        .stats
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .observe(stats);
                    if let Some(count) = increased {
                        warn!(port = %self.port_name, count, "invalid j1708 bytes received");
                    }
                }
                Err(e) => warn!(port = %self.port_name, error = %e, "dropping stats"),
            },
            _ => trace!(port = %self.port_name, opcode = first, "ignoring frame"),
        }
    }

    fn deliver_ack(&self, ack: Ack) {
        let waiter = self.ack_waiter.lock().unwrap_or_else(|e| e.into_inner());
        match waiter.as_ref() {
            Some(tx) => {
                let _ = tx.send(ack);
            }
            None => debug!(opcode = ack.opcode, "ack with no command in flight"),
        }
    }

    fn register_waiter(&self) -> AckWaiter<'_> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.ack_waiter.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        AckWaiter {
            dispatcher: self,
            rx,
        }
    }

    fn latest_stats(&self) -> Option<Stats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).latest()
    }
}

/// The registered ack waiter; unregisters on drop
struct AckWaiter<'a> {
    dispatcher: &'a Dispatcher,
    rx: mpsc::UnboundedReceiver<Ack>,
}

impl Drop for AckWaiter<'_> {
    fn drop(&mut self) {
        self.dispatcher
            .ack_waiter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

/// Reliable command layer over a [`Channel`]
pub struct Protocol {
    channel: Channel,
    dispatcher: Arc<Dispatcher>,
    in_flight: tokio::sync::Mutex<()>,
    config: ProtocolConfig,
    cancel: CancellationToken,
}

impl Protocol {
    /// Open the channel on `stream` and start dispatching inbound frames.
    ///
    /// `cancel` interrupts any in-flight [`Protocol::send`].
    pub fn start(
        port_name: &str,
        stream: Box<dyn PortStream>,
        config: ProtocolConfig,
        vehicle_handler: VehicleHandler,
        cancel: CancellationToken,
    ) -> Result<(Self, ReaderHandle), ProtocolError> {
        let dispatcher = Arc::new(Dispatcher::new(port_name, vehicle_handler));
        let receiver: FrameReceiver = {
            let dispatcher = Arc::clone(&dispatcher);
            Arc::new(move |payload| dispatcher.dispatch(payload))
        };

        let (channel, reader) = Channel::open(port_name, stream, config.read_timeout, receiver)?;

        Ok((
            Self {
                channel,
                dispatcher,
                in_flight: tokio::sync::Mutex::new(()),
                config,
                cancel,
            },
            reader,
        ))
    }

    /// Send a command and wait for its acknowledgement, retrying on timeout.
    ///
    /// Fails with [`ProtocolError::RetriesExhausted`] after
    /// `max_attempts` unacknowledged writes.
    pub async fn send<M: Encode + ?Sized>(&self, message: &M) -> Result<(), ProtocolError> {
        let _in_flight = tokio::select! {
            guard = self.in_flight.lock() => guard,
            _ = self.cancel.cancelled() => return Err(ProtocolError::Cancelled),
        };

        let payload = message.encode();
        let opcode = *payload
            .first()
            .ok_or_else(|| ProtocolError::InvalidInput("empty command".to_string()))?;

        let mut waiter = self.dispatcher.register_waiter();

        for attempt in 1..=self.config.max_attempts {
            debug!(port = %self.channel.port_name(), opcode, attempt, "sending command");
            self.channel.write(&payload)?;

            let deadline = Instant::now() + self.config.ack_timeout;
            if self.await_ack(&mut waiter, opcode, deadline).await? {
                trace!(opcode, attempt, "command acknowledged");
                return Ok(());
            }
            warn!(port = %self.channel.port_name(), opcode, attempt, "no acknowledgement");
        }

        Err(ProtocolError::RetriesExhausted {
            opcode,
            attempts: self.config.max_attempts,
        })
    }

    async fn await_ack(
        &self,
        waiter: &mut AckWaiter<'_>,
        opcode: u8,
        deadline: Instant,
    ) -> Result<bool, ProtocolError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ProtocolError::Cancelled),
                received = tokio::time::timeout_at(deadline, waiter.rx.recv()) => match received {
                    Err(_) => return Ok(false),
                    Ok(Some(ack)) if ack.opcode == opcode => return Ok(true),
                    Ok(Some(ack)) => debug!(
                        expected = opcode,
                        received = ack.opcode,
                        "ignoring ack for another command"
                    ),
                    Ok(None) => return Err(ProtocolError::ReaderStopped),
                },
            }
        }
    }

    /// Stop the read worker
    pub fn close(&self) {
        self.channel.close();
    }

    /// Most recent adapter statistics
    pub fn stats(&self) -> Option<Stats> {
        self.dispatcher.latest_stats()
    }

    /// Channel counters
    pub fn counters(&self) -> ChannelCounters {
        self.channel.counters()
    }

    /// Port the protocol runs on
    pub fn port_name(&self) -> &str {
        self.channel.port_name()
    }
}
