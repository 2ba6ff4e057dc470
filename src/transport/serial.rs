//! Serial port links.
//!
//! Ports are opened 8N1 with no flow control inside `spawn_blocking`, so
//! port initialization never stalls the runtime.

use super::StreamTransport;
use crate::error::{MonitorError, MonitorResult};
use serialport::{SerialPortInfo, SerialPortType};
use tokio::task::spawn_blocking;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// A serial transport.
pub type SerialTransport = StreamTransport<SerialStream>;

/// One enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port path (`/dev/ttyUSB0`, `COM3`).
    pub name: String,
    /// USB serial number, when the port is a USB adapter that reports one.
    pub serial_number: Option<String>,
    /// Manufacturer / product string, when available.
    pub description: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = match (usb.manufacturer, usb.product) {
                    (Some(m), Some(p)) => Some(format!("{m} {p}")),
                    (Some(m), None) => Some(m),
                    (None, p) => p,
                };
                Self {
                    name: info.port_name,
                    serial_number: usb.serial_number,
                    description,
                }
            }
            other => Self {
                name: info.port_name,
                serial_number: None,
                description: Some(format!("{other:?}")),
            },
        }
    }
}

/// Enumerate the serial ports on this machine.
pub fn list_ports() -> MonitorResult<Vec<PortInfo>> {
    let ports = serialport::available_ports()
        .map_err(|e| MonitorError::Connection(format!("failed to enumerate serial ports: {e}")))?;
    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// Return the first port in `ports` whose USB serial number is `serial_number`.
pub fn select_by_serial_number(ports: &[PortInfo], serial_number: &str) -> Option<String> {
    ports
        .iter()
        .find(|p| p.serial_number.as_deref() == Some(serial_number))
        .map(|p| p.name.clone())
}

/// Resolve a USB serial number to a port path.
///
/// # Errors
///
/// [`MonitorError::Connection`] if no attached port reports that number.
pub fn find_port_by_serial_number(serial_number: &str) -> MonitorResult<String> {
    let ports = list_ports()?;
    select_by_serial_number(&ports, serial_number).ok_or_else(|| {
        MonitorError::Connection(format!(
            "no serial port with USB serial number '{serial_number}'"
        ))
    })
}

/// Open `port_path` at `baud_rate`, 8N1, no flow control.
pub async fn open_serial(port_path: &str, baud_rate: u32) -> MonitorResult<SerialTransport> {
    let path = port_path.to_string();
    let stream = spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| MonitorError::Connection(format!("failed to open serial port {path}: {e}")))
    })
    .await
    .map_err(|e| MonitorError::Connection(format!("spawn_blocking for serial open failed: {e}")))??;

    tracing::info!(port = port_path, baud_rate, "serial port opened");
    Ok(StreamTransport::new(stream, format!("serial:{port_path}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, serial: Option<&str>) -> PortInfo {
        PortInfo {
            name: name.into(),
            serial_number: serial.map(Into::into),
            description: None,
        }
    }

    #[test]
    fn test_select_by_serial_number_takes_first_match() {
        let ports = vec![
            port("/dev/ttyS0", None),
            port("/dev/ttyUSB0", Some("6561E2CB0E32")),
            port("/dev/ttyUSB1", Some("AYDPE11BS13")),
            port("/dev/ttyUSB2", Some("AYDPE11BS13")),
        ];
        assert_eq!(
            select_by_serial_number(&ports, "AYDPE11BS13").as_deref(),
            Some("/dev/ttyUSB1")
        );
        assert_eq!(select_by_serial_number(&ports, "missing"), None);
    }

    #[tokio::test]
    async fn test_open_missing_port_is_connection_error() {
        let err = open_serial("/dev/does-not-exist-lab-monitor", 9600)
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Connection(_)));
    }
}
