//! # J1708 Core Library
//!
//! Gateway between a J1708/J1587 vehicle network and host software, talking to
//! a Simma VNA2 USB adapter over a serial port.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Adapter framing: start marker, escaping, length and checksum
//! - Adapter message encoding and decoding
//! - Acknowledged command delivery with retries
//! - A device session that enables pass-all mode and forwards J1587 traffic
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use j1708_core::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! let device = Arc::new(Device::new("/dev/ttyUSB0", |message: J1587Message| {
//!     println!("MID {} PID {}: {:?}", message.mid, message.pid, message.data);
//! }));
//!
//! let cancel = CancellationToken::new();
//! let session = device.open(cancel.clone());
//!
//! SendProxy::new(Arc::clone(&device)).send("188 128 5").await?;
//!
//! cancel.cancel();
//! session.await??;
//! ```

pub mod device;
pub mod message;
pub mod protocol;
pub mod send_proxy;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::device::{Device, DeviceConfig, MessageHandler};
    pub use crate::message::J1587Message;
    pub use crate::protocol::{
        ChannelCounters, PassAllModeConfig, PortInfo, ProtocolError, Stats,
    };
    pub use crate::send_proxy::{RawSender, SendProxy};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
