//! Lists the serial devices visible on this machine.
//!
//! Only used to populate UIs, the session never looks at this.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio_serial::{SerialPortInfo, SerialPortType, UsbPortInfo};
use tracing::debug;

use crate::error::Error;

/// A serial device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortInfo {
    /// What to pass as the port when connecting.
    pub device: String,

    /// Human readable, `n/a` if nothing is known.
    pub description: String,

    /// Hardware id, `n/a` if nothing is known.
    pub hwid: String,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (description, hwid) = match &info.port_type {
            SerialPortType::UsbPort(usb) => (
                usb.product.clone().unwrap_or_else(|| "n/a".into()),
                usb_hwid(usb),
            ),
            SerialPortType::PciPort => ("PCI device".into(), "n/a".into()),
            SerialPortType::BluetoothPort => ("Bluetooth device".into(), "n/a".into()),
            SerialPortType::Unknown => ("n/a".into(), "n/a".into()),
        };

        Self {
            device: info.port_name,
            description,
            hwid,
        }
    }
}

fn usb_hwid(usb: &UsbPortInfo) -> String {
    let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);

    if let Some(serial) = &usb.serial_number {
        hwid += &format!(" SER={serial}");
    }

    hwid
}

/// The serial devices present right now, sorted by device name.
pub fn available() -> Result<Vec<PortInfo>, Error> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| Error::TransportIo(format!("Could not list serial ports: {e}")))?
        .into_iter()
        .map(PortInfo::from)
        .sorted_by(|a, b| a.device.cmp(&b.device))
        .collect::<Vec<_>>();

    debug!(count = ports.len(), "Listed ports");

    Ok(ports)
}
