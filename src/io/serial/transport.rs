// src/io/serial/transport.rs
//
// Opening the device behind a port identifier. The session only ever sees a
// byte reader, which the read thread owns until it exits.

use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::Read;

use super::session::LinkConfig;

/// Open handle handed to the read thread. Dropping it closes the device.
pub type LinkReader = Box<dyn Read + Send>;

/// Opens a port for reading.
///
/// Reads on the returned handle must give up after `config.read_timeout()`
/// with `ErrorKind::TimedOut` so the read thread can notice a disconnect.
pub trait PortOpener: Send + Sync {
    fn open(&self, port: &str, config: &LinkConfig) -> Result<LinkReader, String>;
}

/// Opens real serial devices through the serialport crate, always 8-N-1
/// without flow control
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialPortOpener;

impl PortOpener for SerialPortOpener {
    fn open(&self, port: &str, config: &LinkConfig) -> Result<LinkReader, String> {
        let serial = serialport::new(port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout())
            .open()
            .map_err(|e| e.to_string())?;

        Ok(Box::new(serial))
    }
}
