// src/io/serial/directory.rs
//
// Serial port discovery. Stateless scans polled on a fixed cadence, plus the
// operator's port selection which survives those scans.

use serde::Serialize;
use std::fmt;

// ============================================================================
// Types
// ============================================================================

/// Bus a port hangs off, as far as the OS can tell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PortKind {
    #[serde(rename = "USB")]
    Usb,
    Bluetooth,
    #[serde(rename = "PCI")]
    Pci,
    Unknown,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PortKind::Usb => "USB",
            PortKind::Bluetooth => "Bluetooth",
            PortKind::Pci => "PCI",
            PortKind::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// USB vendor and product ids, shown as `vvvv:pppp`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// One entry of a port scan. `port_name` is what `connect` takes; the rest is
/// only there to help the operator pick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortDescriptor {
    /// OS device path or name, e.g. "/dev/ttyUSB0" or "COM3"
    pub port_name: String,
    pub kind: PortKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb_id: Option<UsbId>,
}

impl PortDescriptor {
    /// Descriptor with only a name, for ports the OS reports nothing else about
    pub fn named(port_name: impl Into<String>) -> Self {
        PortDescriptor {
            port_name: port_name.into(),
            kind: PortKind::Unknown,
            manufacturer: None,
            product: None,
            usb_id: None,
        }
    }
}

impl From<serialport::SerialPortInfo> for PortDescriptor {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let mut port = PortDescriptor::named(info.port_name);
        match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                port.kind = PortKind::Usb;
                port.manufacturer = usb.manufacturer;
                port.product = usb.product;
                port.usb_id = Some(UsbId {
                    vid: usb.vid,
                    pid: usb.pid,
                });
            }
            serialport::SerialPortType::BluetoothPort => port.kind = PortKind::Bluetooth,
            serialport::SerialPortType::PciPort => port.kind = PortKind::Pci,
            serialport::SerialPortType::Unknown => {}
        }
        port
    }
}

/// Source of port scans
pub trait PortEnumerator {
    /// Scan the OS for serial ports. No hardware is an empty list, not an error.
    fn scan(&self) -> Vec<PortDescriptor>;
}

/// Enumerates the real serial ports of this machine
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn scan(&self) -> Vec<PortDescriptor> {
        list_ports()
    }
}

// ============================================================================
// Enumeration
// ============================================================================

/// Serial ports present right now. Enumeration failures are logged and
/// reported as no ports.
pub fn list_ports() -> Vec<PortDescriptor> {
    match serialport::available_ports() {
        Ok(found) => found
            .into_iter()
            .filter(|info| is_openable(&info.port_name))
            .map(PortDescriptor::from)
            .collect(),
        Err(e) => {
            tlog!("[ports] Failed to enumerate ports: {}", e);
            Vec::new()
        }
    }
}

/// macOS lists every device twice. The /dev/tty.* twin blocks on open until
/// carrier detect, so only the /dev/cu.* side is offered.
fn is_openable(port_name: &str) -> bool {
    !(cfg!(target_os = "macos") && port_name.starts_with("/dev/tty."))
}

// ============================================================================
// Directory
// ============================================================================

/// How the current port came to be selected
#[derive(Clone, Debug, PartialEq, Eq)]
enum Selection {
    None,
    /// Filled in from the first scanned port
    Suggested(String),
    /// Picked by the operator
    Explicit(String),
}

/// Latest scan results plus the selected port.
///
/// A refresh suggests the first port when nothing is selected and clears a
/// suggestion whose port vanished. An operator's pick is never overwritten.
pub struct PortDirectory<E: PortEnumerator = SystemPorts> {
    enumerator: E,
    ports: Vec<PortDescriptor>,
    selection: Selection,
}

impl PortDirectory<SystemPorts> {
    pub fn system() -> Self {
        PortDirectory::new(SystemPorts)
    }
}

impl<E: PortEnumerator> PortDirectory<E> {
    pub fn new(enumerator: E) -> Self {
        PortDirectory {
            enumerator,
            ports: Vec::new(),
            selection: Selection::None,
        }
    }

    /// Rescan. Returns true if the set of port names changed.
    pub fn refresh(&mut self) -> bool {
        let ports = self.enumerator.scan();
        let changed = !same_names(&self.ports, &ports);
        self.ports = ports;

        if let Selection::Suggested(ref name) = self.selection {
            if !self.ports.iter().any(|p| &p.port_name == name) {
                self.selection = Selection::None;
            }
        }
        if self.selection == Selection::None {
            if let Some(first) = self.ports.first() {
                self.selection = Selection::Suggested(first.port_name.clone());
            }
        }

        if changed {
            tlog!(
                "[ports] {} port(s) available: [{}]",
                self.ports.len(),
                self.ports
                    .iter()
                    .map(|p| p.port_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        changed
    }

    /// Ports from the latest scan
    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    /// Currently selected port identifier, empty when none
    pub fn selected(&self) -> &str {
        match &self.selection {
            Selection::None => "",
            Selection::Suggested(name) | Selection::Explicit(name) => name,
        }
    }

    /// Record the operator's pick. An empty name clears the selection.
    pub fn select(&mut self, port_name: impl Into<String>) {
        let port_name = port_name.into();
        self.selection = if port_name.is_empty() {
            Selection::None
        } else {
            Selection::Explicit(port_name)
        };
    }
}

fn same_names(a: &[PortDescriptor], b: &[PortDescriptor]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.port_name == y.port_name)
}

// ============================================================================
// Tests
// ============================================================================
