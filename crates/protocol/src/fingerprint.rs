//! Device fingerprinting.
//!
//! A device's identity key is derived from its vendor and product
//! identifiers only. Two physical devices of the same model therefore share
//! one key; the serial number is recorded in the ledger but never consulted
//! when classifying a device.

use md5::{Digest, Md5};

/// Sentinel stored when a descriptor string cannot be read from the device.
pub const UNKNOWN: &str = "Unknown";

/// Computes the identity key for a vendor/product pair.
///
/// The key is the lowercase hex MD5 digest of `vendor_id` immediately
/// followed by `product_id`, both in their ledger form (see
/// [`format_usb_id`]).
pub fn identity_key(vendor_id: &str, product_id: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(vendor_id.as_bytes());
    hasher.update(product_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Renders a numeric USB identifier the way the ledger stores it.
///
/// Lowercase hex with a `0x` prefix and no zero padding, e.g. `0xa` or
/// `0x1234`.
pub fn format_usb_id(id: u16) -> String {
    format!("{:#x}", id)
}

/// Strips every character outside `[A-Za-z0-9 '\-_]`.
pub fn sanitize(raw: &str) -> String {
    raw.chars().filter(|c| is_allowed(*c)).collect()
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '\'' | '-' | '_')
}
