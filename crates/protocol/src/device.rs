//! Device records as stored in the trust ledger.
//!
//! On disk every record is a single-key object mapping the identity key to
//! the device's descriptor fields:
//!
//! ```json
//! {
//!   "f5e16d64b9e21eef3e01fc69e7849afc": {
//!     "vendorId": "0x1234",
//!     "productId": "0x5678",
//!     "serialNumber": "AB12",
//!     "description": "Test Drive"
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProtocolError, Result};
use crate::fingerprint::identity_key;

/// A fingerprinted USB device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Digest of vendor and product identifiers; the ledger's primary key.
    pub identity_key: String,
    /// Vendor identifier in ledger form (`0x46d`).
    pub vendor_id: String,
    /// Product identifier in ledger form (`0xc52b`).
    pub product_id: String,
    /// Sanitized serial number, or `"Unknown"`.
    pub serial_number: String,
    /// Sanitized product string, or `"Unknown"`.
    pub description: String,
}

/// Descriptor fields nested under the identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceFields {
    vendor_id: String,
    product_id: String,
    serial_number: String,
    description: String,
}

impl DeviceRecord {
    /// Creates a record, deriving the identity key from vendor and product.
    pub fn new(
        vendor_id: impl Into<String>,
        product_id: impl Into<String>,
        serial_number: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let vendor_id = vendor_id.into();
        let product_id = product_id.into();
        Self {
            identity_key: identity_key(&vendor_id, &product_id),
            vendor_id,
            product_id,
            serial_number: serial_number.into(),
            description: description.into(),
        }
    }

    /// Parses a ledger file body (a JSON array of single-key objects).
    pub fn list_from_json(json: &str) -> Result<Vec<DeviceRecord>> {
        Ok(serde_json::from_str(json)?)
    }

    /// Renders records as an indented JSON array, preserving order.
    pub fn list_to_json(records: &[DeviceRecord]) -> Result<String> {
        serde_json::to_string_pretty(records)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    fn fields(&self) -> DeviceFields {
        DeviceFields {
            vendor_id: self.vendor_id.clone(),
            product_id: self.product_id.clone(),
            serial_number: self.serial_number.clone(),
            description: self.description.clone(),
        }
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}:{}] serial={} \"{}\"",
            self.identity_key, self.vendor_id, self.product_id, self.serial_number, self.description
        )
    }
}

impl Serialize for DeviceRecord {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.identity_key, &self.fields())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for DeviceRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entry: BTreeMap<String, DeviceFields> = BTreeMap::deserialize(deserializer)?;
        if entry.len() != 1 {
            return Err(D::Error::custom(format!(
                "expected exactly one identity key per record, got {}",
                entry.len()
            )));
        }
        let (identity_key, fields) = entry
            .into_iter()
            .next()
            .ok_or_else(|| D::Error::custom("empty device record"))?;
        Ok(DeviceRecord {
            identity_key,
            vendor_id: fields.vendor_id,
            product_id: fields.product_id,
            serial_number: fields.serial_number,
            description: fields.description,
        })
    }
}
