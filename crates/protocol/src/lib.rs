//! # USB2FA Protocol Library
//!
//! Pure building blocks shared by the USB2FA agent and its tooling. Nothing
//! in this crate touches the filesystem or the network.
//!
//! ## Overview
//!
//! - **Fingerprinting**: stable identity keys for USB devices and
//!   sanitizing of descriptor strings
//! - **Device Records**: the single-key JSON shape used by the trust ledger
//! - **Request Signing**: canonical request strings and HMAC-SHA1 Basic
//!   authorization for the push-authentication provider
//! - **Provider Messages**: endpoint paths, request parameters and response
//!   envelopes
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{identity_key, DeviceRecord};
//! use protocol::signing::{sign_with_date, Credentials, Params};
//!
//! let record = DeviceRecord::new("0x1234", "0x5678", "AB12", "Test Drive");
//! assert_eq!(record.identity_key, identity_key("0x1234", "0x5678"));
//!
//! let credentials = Credentials {
//!     integration_key: "DIXXXXXXXXXXXXXXXXXX".to_string(),
//!     secret_key: "secret".to_string(),
//! };
//! let headers = sign_with_date(
//!     &credentials,
//!     "Tue, 21 Aug 2012 17:29:18 -0000",
//!     "GET",
//!     "api-xxxxxxxx.duosecurity.com",
//!     "/auth/v2/check",
//!     &Params::new(),
//! )
//! .unwrap();
//! assert!(headers.authorization.starts_with("Basic "));
//! ```
//!
//! ## Modules
//!
//! - [`fingerprint`]: Identity keys and sanitizing
//! - [`device`]: Ledger device records
//! - [`signing`]: Request canonicalization and signing
//! - [`messages`]: Provider endpoints and responses
//! - [`error`]: Error types

pub mod device;
pub mod error;
pub mod fingerprint;
pub mod messages;
pub mod signing;

pub use device::DeviceRecord;
pub use error::{ProtocolError, Result};
pub use fingerprint::{format_usb_id, identity_key, sanitize, UNKNOWN};
pub use messages::{AuthResult, ProviderResponse};
pub use signing::{Credentials, Params, SignedHeaders};
