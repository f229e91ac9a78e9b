//! Serial port transport
//!
//! Direct USB/RS-232 connection to a GRBL board using the `serialport` crate.
//! The port is opened 8N1 without flow control and read with a short
//! internal timeout so `read_lines` can honour its own bound.

use super::{ConnectionParams, LineBuffer, ReceivedLines, Transport};
use g2burn_core::{ConnectionError, Error, Result};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Internal read slice; `read_lines` loops over these until its deadline.
const READ_SLICE: Duration = Duration::from_millis(10);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor and product IDs if applicable
    pub usb_ids: Option<(u16, u16)>,
}

/// List serial ports that look like CNC controllers
///
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.wchusbserial*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| {
            let (manufacturer, usb_ids) = match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    (usb.manufacturer.clone(), Some((usb.vid, usb.pid)))
                }
                _ => (None, None),
            };
            SerialPortInfo {
                port_name: port.port_name.clone(),
                description: port_description(port),
                manufacturer,
                usb_ids,
            }
        })
        .collect())
}

fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(num) = port_name.strip_prefix("COM") {
        return !num.is_empty() && num.chars().all(|c| c.is_ascii_digit());
    }

    const PREFIXES: [&str; 5] = [
        "/dev/ttyUSB",
        "/dev/ttyACM",
        "/dev/cu.usbserial",
        "/dev/cu.wchusbserial",
        "/dev/cu.usbmodem",
    ];
    PREFIXES.iter().any(|p| port_name.starts_with(p))
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => format!(
            "USB {} {}",
            usb_info.manufacturer.as_deref().unwrap_or("Device"),
            usb_info.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Serial session to a controller
pub struct SerialTransport {
    port_name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
    lines: LineBuffer,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_name", &self.port_name)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialTransport {
    /// Open the port. Fails with `PortUnavailable` when the device is
    /// missing, busy or refuses the settings.
    pub fn open(params: &ConnectionParams) -> std::result::Result<Self, ConnectionError> {
        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(READ_SLICE)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                ConnectionError::PortUnavailable {
                    port: params.port.clone(),
                    reason: e.to_string(),
                }
            })?;

        tracing::info!("Opened {} at {} baud", params.port, params.baud_rate);
        Ok(Self {
            port_name: params.port.clone(),
            port: Some(port),
            lines: LineBuffer::new(),
        })
    }
}

fn link_error(e: impl std::fmt::Display) -> ConnectionError {
    ConnectionError::LinkError {
        reason: e.to_string(),
    }
}

impl Transport for SerialTransport {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn send_raw(&mut self, bytes: &[u8]) -> std::result::Result<(), ConnectionError> {
        let port = self.port.as_mut().ok_or(ConnectionError::NotConnected)?;
        port.write_all(bytes).map_err(link_error)?;
        port.flush().map_err(link_error)
    }

    fn read_lines(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<ReceivedLines, ConnectionError> {
        let port = self.port.as_mut().ok_or(ConnectionError::NotConnected)?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];

        loop {
            if self.lines.has_lines() {
                return Ok(self.lines.take_lines());
            }
            match port.read(&mut chunk) {
                Ok(n) if n > 0 => {
                    self.lines.push(&chunk[..n]);
                    continue;
                }
                Ok(_) => {}
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
                Err(e) => return Err(link_error(e)),
            }
            if Instant::now() >= deadline {
                return Err(ConnectionError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    fn clear_input(&mut self) -> std::result::Result<(), ConnectionError> {
        let port = self.port.as_mut().ok_or(ConnectionError::NotConnected)?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(link_error)?;
        self.lines.clear();
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!("Closed {}", self.port_name);
        }
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cnc_port_patterns() {
        assert!(is_valid_cnc_port("COM3"));
        assert!(!is_valid_cnc_port("COM"));
        assert!(!is_valid_cnc_port("COMX"));
        assert!(is_valid_cnc_port("/dev/ttyUSB0"));
        assert!(is_valid_cnc_port("/dev/ttyACM1"));
        assert!(is_valid_cnc_port("/dev/cu.wchusbserial1130"));
        assert!(is_valid_cnc_port("/dev/cu.usbmodem14201"));
        assert!(!is_valid_cnc_port("/dev/ttyS0"));
    }

    #[test]
    fn test_open_missing_port_is_unavailable() {
        let params = ConnectionParams::new("/dev/g2burn-does-not-exist", 115200);
        match SerialTransport::open(&params) {
            Err(ConnectionError::PortUnavailable { port, .. }) => {
                assert_eq!(port, "/dev/g2burn-does-not-exist")
            }
            other => panic!("expected PortUnavailable, got {:?}", other),
        }
    }
}
