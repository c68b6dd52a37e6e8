//! Text front door for sending messages
//!
//! Upstream consumers (the web hub) hand over messages as text such as
//! `"188 128 5"`: decimal byte values separated by whitespace.

use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::device::Device;
use crate::protocol::ProtocolError;

/// Something that can put a raw J1587 message (MID, PID, data) on the network
pub trait RawSender: Send + Sync {
    /// Send the message
    fn send_raw(&self, raw: &[u8]) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}

impl RawSender for Device {
    async fn send_raw(&self, raw: &[u8]) -> Result<(), ProtocolError> {
        self.send(raw).await
    }
}

impl<T: RawSender> RawSender for Arc<T> {
    fn send_raw(&self, raw: &[u8]) -> impl Future<Output = Result<(), ProtocolError>> + Send {
        (**self).send_raw(raw)
    }
}

/// Parses text messages and forwards them to a [`RawSender`]
pub struct SendProxy<S> {
    sender: S,
}

impl<S: RawSender> SendProxy<S> {
    /// Wrap a sender
    pub fn new(sender: S) -> Self {
        Self { sender }
    }

    /// Parse `message` and send it
    pub async fn send(&self, message: &str) -> Result<(), ProtocolError> {
        let raw = match parse_message(message) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to send");
                return Err(e);
            }
        };

        self.sender.send_raw(&raw).await.inspect_err(|e| {
            warn!(error = %e, "failed to send");
        })
    }

    /// The wrapped sender
    pub fn sender(&self) -> &S {
        &self.sender
    }
}

/// Parse whitespace separated decimal byte values
pub fn parse_message(message: &str) -> Result<Vec<u8>, ProtocolError> {
    let raw = message
        .split_whitespace()
        .map(|token| {
            token.parse::<u8>().map_err(|e| {
                ProtocolError::InvalidInput(format!("'{}' is not a byte value: {}", token, e))
            })
        })
        .collect::<Result<Vec<u8>, _>>()?;

    if raw.is_empty() {
        return Err(ProtocolError::InvalidInput("empty message".to_string()));
    }
    Ok(raw)
}
