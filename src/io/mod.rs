// src/io/mod.rs
//
// Serial telemetry link: port discovery, the single link session, and the
// event queue that carries classified lines to the consumer.

mod error;
pub mod events;
pub mod serial;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use error::LinkError;
pub use events::{
    event_channel, ClassifiedLine, EventReceiver, EventSender, EventSink, LineCategory, LinkEvent,
};
pub use serial::{
    list_ports, LinkConfig, LinkSession, PortDescriptor, PortDirectory, PortEnumerator, PortKind,
    PortOpener, SerialPortOpener, SystemPorts, UsbId,
};

/// Connection state of the link session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkState {
    Disconnected,
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "DISCONNECTED"),
            LinkState::Connected => write!(f, "CONNECTED"),
        }
    }
}

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
