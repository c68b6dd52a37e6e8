//! Device session
//!
//! Runs one session against a VNA2 adapter: opens the port, switches the
//! adapter into pass-all mode, forwards received J1587 messages to the
//! registered handler and sends J1587 messages on request.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::message::J1587Message;
use crate::protocol::{
    default_port_name, list_ports, open_port, ChannelCounters, PassAllModeConfig, PortInfo,
    PortStream, Protocol, ProtocolConfig, ProtocolError, ReaderHandle, Stats, VehicleHandler,
    VehicleMessage, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_BAUD_RATE, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_READ_TIMEOUT_MS,
};

/// Consumer callback for received messages. Called on the read worker thread.
pub type MessageHandler = Arc<dyn Fn(J1587Message) + Send + Sync>;

/// Opens the byte port for a session
pub type PortOpener =
    Arc<dyn Fn(&DeviceConfig) -> Result<Box<dyn PortStream>, ProtocolError> + Send + Sync>;

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Port read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Ack timeout per attempt in milliseconds
    pub ack_timeout_ms: u64,
    /// Writes per command before giving up
    pub max_attempts: u32,
    /// Mode sent to the adapter when the session starts
    pub pass_all: PassAllModeConfig,
}

impl DeviceConfig {
    /// Default configuration on the given port
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            max_attempts: self.max_attempts,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port_name: default_port_name().to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pass_all: PassAllModeConfig::default(),
        }
    }
}

fn open_serial(config: &DeviceConfig) -> Result<Box<dyn PortStream>, ProtocolError> {
    let stream = open_port(
        &config.port_name,
        config.baud_rate,
        Duration::from_millis(config.read_timeout_ms),
    )?;
    Ok(Box::new(stream))
}

/// A VNA2 adapter session
pub struct Device {
    config: DeviceConfig,
    opener: PortOpener,
    handler: MessageHandler,
    protocol: RwLock<Option<Arc<Protocol>>>,
    running: AtomicBool,
}

impl Device {
    /// Create a device on the named serial port with default settings
    pub fn new<F>(port_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(J1587Message) + Send + Sync + 'static,
    {
        Self::with_config(DeviceConfig::new(port_name), handler)
    }

    /// Create a device from a configuration
    pub fn with_config<F>(config: DeviceConfig, handler: F) -> Self
    where
        F: Fn(J1587Message) + Send + Sync + 'static,
    {
        Self::with_opener(config, open_serial, handler)
    }

    /// Create a device that opens its port through `opener`
    pub fn with_opener<O, F>(config: DeviceConfig, opener: O, handler: F) -> Self
    where
        O: Fn(&DeviceConfig) -> Result<Box<dyn PortStream>, ProtocolError> + Send + Sync + 'static,
        F: Fn(J1587Message) + Send + Sync + 'static,
    {
        Self {
            config,
            opener: Arc::new(opener),
            handler: Arc::new(handler),
            protocol: RwLock::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// List available serial ports
    pub fn list_ports() -> Vec<PortInfo> {
        list_ports()
    }

    /// Device configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Whether a session is up, in pass-all mode and accepting sends
    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Latest adapter statistics of the running session
    pub fn stats(&self) -> Option<Stats> {
        self.current().and_then(|p| p.stats())
    }

    /// Channel counters of the running session
    pub fn counters(&self) -> Option<ChannelCounters> {
        self.current().map(|p| p.counters())
    }

    /// Run the session in the background until `cancel` fires or the port fails
    pub fn open(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<Result<(), ProtocolError>> {
        let device = Arc::clone(self);
        tokio::spawn(async move { device.run(cancel).await })
    }

    /// Run the session until `cancel` fires or the port fails.
    ///
    /// Returns `Ok(())` on cancellation, the first error otherwise. Dropping
    /// the future tears the session down as well.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ProtocolError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::AlreadyRunning);
        }
        let mut guard = SessionGuard {
            device: self,
            session: cancel.child_token(),
            protocol: None,
        };
        self.run_session(&mut guard, &cancel).await
    }

    async fn run_session(
        &self,
        guard: &mut SessionGuard<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), ProtocolError> {
        let stream = (self.opener)(&self.config)?;

        let handler = Arc::clone(&self.handler);
        let on_message: VehicleHandler =
            Arc::new(move |m: VehicleMessage| handler(J1587Message::from(m)));

        let (protocol, mut reader) = Protocol::start(
            &self.config.port_name,
            stream,
            self.config.protocol_config(),
            on_message,
            guard.session.clone(),
        )?;
        let protocol = Arc::new(protocol);
        guard.protocol = Some(Arc::clone(&protocol));

        let result = self.serve(&protocol, &mut reader, cancel).await;

        guard.teardown();
        let reader_result = reader.wait().await;

        info!(port = %self.config.port_name, "session stopped");
        result.and(reader_result)
    }

    async fn serve(
        &self,
        protocol: &Arc<Protocol>,
        reader: &mut ReaderHandle,
        cancel: &CancellationToken,
    ) -> Result<(), ProtocolError> {
        tokio::select! {
            sent = protocol.send(&self.config.pass_all) => match sent {
                Ok(()) => info!(port = %self.config.port_name, "pass all mode enabled"),
                Err(ProtocolError::Cancelled) => return Ok(()),
                Err(e) => {
                    warn!(port = %self.config.port_name, error = %e, "failed to enable pass all mode");
                    return Err(e);
                }
            },
            exited = reader.wait() => return exited,
            _ = cancel.cancelled() => return Ok(()),
        }

        *self.protocol.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(protocol));
        info!(port = %self.config.port_name, "session started");

        tokio::select! {
            exited = reader.wait() => exited,
            _ = cancel.cancelled() => Ok(()),
        }
    }

    /// Send a raw J1587 message: MID, PID, then data
    pub async fn send(&self, raw: &[u8]) -> Result<(), ProtocolError> {
        if raw.len() < 2 {
            return Err(ProtocolError::TooShort {
                kind: "raw j1587",
                minimum: 2,
                actual: raw.len(),
            });
        }

        let protocol = self.current().ok_or(ProtocolError::NotConnected)?;
        let message = VehicleMessage::new(raw[0], raw[1] as u16, raw[2..].to_vec());
        protocol.send(&message).await
    }

    fn current(&self) -> Option<Arc<Protocol>> {
        self.protocol
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Releases a session on every exit path of [`Device::run`], including the
/// run future being dropped. The read worker notices the closed channel at its
/// next read timeout.
struct SessionGuard<'a> {
    device: &'a Device,
    session: CancellationToken,
    protocol: Option<Arc<Protocol>>,
}

impl SessionGuard<'_> {
    fn teardown(&mut self) {
        self.session.cancel();
        self.device
            .protocol
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(protocol) = self.protocol.take() {
            protocol.close();
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.teardown();
        self.device.running.store(false, Ordering::SeqCst);
    }
}
