//! USB device enumeration.
//!
//! The agent only needs a snapshot of attached devices per poll cycle. On
//! Linux that snapshot is read from sysfs, where every device node under
//! `/sys/bus/usb/devices` exposes its descriptor fields as small text files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use protocol::{format_usb_id, sanitize, DeviceRecord, UNKNOWN};

/// Default sysfs directory listing USB devices.
pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

/// Identifying fields of one attached device, as read from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Serial number string, if the device reports one.
    pub serial: Option<String>,
    /// Product string, if the device reports one.
    pub product: Option<String>,
}

impl RawDeviceDescriptor {
    /// Converts to a ledger record, sanitizing descriptor strings.
    pub fn to_record(&self) -> DeviceRecord {
        DeviceRecord::new(
            format_usb_id(self.vendor_id),
            format_usb_id(self.product_id),
            descriptor_string(self.serial.as_deref()),
            descriptor_string(self.product.as_deref()),
        )
    }
}

fn descriptor_string(raw: Option<&str>) -> String {
    match raw {
        Some(value) => sanitize(value),
        None => UNKNOWN.to_string(),
    }
}

/// Source of the currently attached USB devices.
pub trait UsbEnumerator {
    /// Lists attached devices.
    fn enumerate(&self) -> io::Result<Vec<RawDeviceDescriptor>>;
}

/// Enumerates devices from the Linux sysfs tree.
#[derive(Debug, Clone)]
pub struct SysfsEnumerator {
    root: PathBuf,
}

impl Default for SysfsEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsEnumerator {
    /// Reads from `/sys/bus/usb/devices`.
    pub fn new() -> Self {
        Self::with_root(SYSFS_USB_DEVICES)
    }

    /// Reads from an alternative directory with the same layout.
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Returns true when the device directory exists.
    pub fn is_available(&self) -> bool {
        self.root.is_dir()
    }

    fn read_device(dir: &Path) -> Option<RawDeviceDescriptor> {
        // Interface nodes (e.g. `1-1:1.0`) carry no idVendor.
        let vendor_id = read_hex_id(&dir.join("idVendor"))?;
        let product_id = read_hex_id(&dir.join("idProduct"))?;
        Some(RawDeviceDescriptor {
            vendor_id,
            product_id,
            serial: read_attr(&dir.join("serial")),
            product: read_attr(&dir.join("product")),
        })
    }
}

impl UsbEnumerator for SysfsEnumerator {
    fn enumerate(&self) -> io::Result<Vec<RawDeviceDescriptor>> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        dirs.sort();

        Ok(dirs
            .iter()
            .filter_map(|dir| Self::read_device(dir))
            .collect())
    }
}

fn read_attr(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim_end_matches(['\n', '\0']).to_string())
}

fn read_hex_id(path: &Path) -> Option<u16> {
    let raw = read_attr(path)?;
    u16::from_str_radix(raw.trim(), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_device(root: &Path, name: &str, attrs: &[(&str, &str)]) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for (attr, value) in attrs {
            fs::write(dir.join(attr), format!("{}\n", value)).unwrap();
        }
    }

    #[test]
    fn test_to_record_formats_ids() {
        let raw = RawDeviceDescriptor {
            vendor_id: 0x1234,
            product_id: 0x5678,
            serial: Some("AB12".to_string()),
            product: Some("Test Drive".to_string()),
        };
        let record = raw.to_record();
        assert_eq!(record.vendor_id, "0x1234");
        assert_eq!(record.product_id, "0x5678");
        assert_eq!(record.identity_key, "f5e16d64b9e21eef3e01fc69e7849afc");
        assert_eq!(record.description, "Test Drive");
    }

    #[test]
    fn test_to_record_sanitizes_and_defaults() {
        let raw = RawDeviceDescriptor {
            vendor_id: 0x46d,
            product_id: 0xc52b,
            serial: None,
            product: Some("USB <Receiver>; rm -rf".to_string()),
        };
        let record = raw.to_record();
        assert_eq!(record.vendor_id, "0x46d");
        assert_eq!(record.serial_number, UNKNOWN);
        assert_eq!(record.description, "USB Receiver rm -rf");
    }

    #[test]
    fn test_sysfs_enumerate() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_device(
            root,
            "1-1",
            &[
                ("idVendor", "046d"),
                ("idProduct", "c52b"),
                ("product", "USB Receiver"),
            ],
        );
        write_device(
            root,
            "1-2",
            &[
                ("idVendor", "1234"),
                ("idProduct", "5678"),
                ("serial", "AB12"),
                ("product", "Test Drive"),
            ],
        );
        write_device(root, "1-1:1.0", &[("bInterfaceClass", "03")]);

        let devices = SysfsEnumerator::with_root(root).enumerate().unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].vendor_id, 0x046d);
        assert_eq!(devices[0].serial, None);
        assert_eq!(devices[1].product_id, 0x5678);
        assert_eq!(devices[1].serial.as_deref(), Some("AB12"));
    }

    #[test]
    fn test_sysfs_skips_unparseable_ids() {
        let temp_dir = TempDir::new().unwrap();
        write_device(
            temp_dir.path(),
            "2-1",
            &[("idVendor", "zzzz"), ("idProduct", "0001")],
        );
        let devices = SysfsEnumerator::with_root(temp_dir.path())
            .enumerate()
            .unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn test_sysfs_missing_root() {
        let enumerator = SysfsEnumerator::with_root("/nonexistent/usb/devices");
        assert!(!enumerator.is_available());
        assert!(enumerator.enumerate().is_err());
    }
}
