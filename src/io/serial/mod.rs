// src/io/serial/mod.rs
//
// Serial port driver for newline-delimited telemetry.
//
// Features:
// - Port enumeration with default-selection policy (directory)
// - Line framing with decode-and-drop of invalid UTF-8 (framer)
// - Single-connection session with a dedicated blocking read thread (session)

pub mod directory;
pub mod framer;
pub mod session;
pub mod transport;

pub use directory::{
    list_ports, PortDescriptor, PortDirectory, PortEnumerator, PortKind, SystemPorts, UsbId,
};
pub use framer::{decode_dropping_invalid, LineFramer};
pub use session::{LinkConfig, LinkSession};
pub use transport::{LinkReader, PortOpener, SerialPortOpener};
