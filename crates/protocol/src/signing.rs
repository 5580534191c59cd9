//! Request signing for the push-authentication provider.
//!
//! Every authenticated request carries a `Date` header and an HTTP Basic
//! `Authorization` header whose password is an HMAC-SHA1 over a canonical
//! form of the request:
//!
//! ```text
//! <date>\n<METHOD>\n<host>\n<path>\n<k1=v1&k2=v2...>
//! ```
//!
//! Parameters are sorted by name and percent-encoded. The date inside the
//! canonical string must be byte-identical to the `Date` header, so callers
//! take both from one [`SignedHeaders`] value.

use std::collections::BTreeMap;

use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;

use crate::error::{ProtocolError, Result};

type HmacSha1 = Hmac<Sha1>;

/// Characters left unescaped in parameter names and values.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Request parameters, ordered by name.
pub type Params = BTreeMap<String, String>;

/// Credentials issued by the provider for one integration.
#[derive(Clone)]
pub struct Credentials {
    /// Integration key, sent in clear as the Basic auth user.
    pub integration_key: String,
    /// Secret key used to key the HMAC. Never sent.
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("integration_key", &self.integration_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Headers to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// Value for the `Date` header.
    pub date: String,
    /// Value for the `Authorization` header, including the `Basic ` scheme.
    pub authorization: String,
}

/// Current time in RFC 2822 form, e.g. `Tue, 21 Aug 2012 17:29:18 +0000`.
pub fn rfc2822_now() -> String {
    chrono::Utc::now().to_rfc2822()
}

/// Percent-encodes a single name or value.
pub fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, UNRESERVED).to_string()
}

/// Builds the sorted, encoded `k=v&k=v` parameter string.
pub fn encode_params(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Builds the newline-joined canonical request string.
pub fn canonicalize(date: &str, method: &str, host: &str, path: &str, params: &Params) -> String {
    [
        date.to_string(),
        method.to_uppercase(),
        host.to_lowercase(),
        path.to_string(),
        encode_params(params),
    ]
    .join("\n")
}

/// Hex HMAC-SHA1 of `message` keyed with `secret_key`.
pub fn hmac_sha1_hex(secret_key: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ProtocolError::Signing(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signs a request with an explicit date.
pub fn sign_with_date(
    credentials: &Credentials,
    date: &str,
    method: &str,
    host: &str,
    path: &str,
    params: &Params,
) -> Result<SignedHeaders> {
    let canonical = canonicalize(date, method, host, path, params);
    let digest = hmac_sha1_hex(&credentials.secret_key, &canonical)?;
    let token = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", credentials.integration_key, digest));

    Ok(SignedHeaders {
        date: date.to_string(),
        authorization: format!("Basic {}", token),
    })
}

/// Signs a request stamped with the current time.
pub fn sign(
    credentials: &Credentials,
    method: &str,
    host: &str,
    path: &str,
    params: &Params,
) -> Result<SignedHeaders> {
    sign_with_date(credentials, &rfc2822_now(), method, host, path, params)
}
