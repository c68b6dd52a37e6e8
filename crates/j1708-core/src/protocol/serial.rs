//! Serial port handling
//!
//! Opens and enumerates the serial ports the adapter can appear on.

use serialport::{SerialPortInfo, SerialPortType};
use std::time::Duration;

use super::{ProtocolError, SerialStream};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    /// Whether the port looks like a Simma vehicle network adapter
    pub fn is_vna_adapter(&self) -> bool {
        let matches = |s: &Option<String>| {
            s.as_deref()
                .map(|s| {
                    let s = s.to_ascii_lowercase();
                    s.contains("simma") || s.contains("vna")
                })
                .unwrap_or(false)
        };
        matches(&self.manufacturer) || matches(&self.product)
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
            ),
            _ => (None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
        }
    }
}

/// List available serial ports, adapters first
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by(|a, b| {
        b.is_vna_adapter()
            .cmp(&a.is_vna_adapter())
            .then_with(|| a.name.cmp(&b.name))
    });
    ports
}

/// Where the adapter shows up when nothing else is configured
pub fn default_port_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "COM1"
    } else {
        "/dev/serial/by-id/usb-Simma_Software_VNA2-USB_1-if00"
    }
}

/// Open a serial port with the adapter's line settings (8N1, no flow control)
pub fn open_port(
    name: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<SerialStream, ProtocolError> {
    let port = serialport::new(name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(read_timeout)
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(name.to_string()),
            _ => ProtocolError::SerialError(format!("failed opening port '{}': {}", name, e)),
        })?;

    Ok(SerialStream::new(port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, product: Option<&str>) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: product.map(str::to_string),
        }
    }

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        for port in &list_ports() {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_adapter_detection() {
        assert!(port("/dev/ttyUSB0", Some("VNA2-USB")).is_vna_adapter());
        assert!(!port("/dev/ttyUSB1", Some("FT232R USB UART")).is_vna_adapter());
        assert!(!port("/dev/ttyS0", None).is_vna_adapter());
    }

    #[test]
    fn test_default_port_name() {
        let name = default_port_name();
        if cfg!(target_os = "windows") {
            assert_eq!(name, "COM1");
        } else {
            assert!(name.contains("VNA2"));
        }
    }

    #[test]
    fn test_open_missing_port() {
        let result = open_port(
            "/dev/does-not-exist-j1708",
            115200,
            Duration::from_millis(100),
        );
        assert!(result.is_err());
    }
}
