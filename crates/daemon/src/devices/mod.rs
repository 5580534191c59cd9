//! Device management module.
//!
//! This module provides USB enumeration and the persistent trust ledger
//! that classifies attached devices.

pub mod ledger;
pub mod usb;

pub use ledger::{load_file, LedgerError, LedgerKind, LedgerPaths, TrustLedger};
pub use usb::{RawDeviceDescriptor, SysfsEnumerator, UsbEnumerator};
