//! Push-authentication provider endpoints and message definitions.
//!
//! Every provider response is a JSON envelope with a top-level `stat`
//! field. Successful calls carry `"stat": "OK"` and a `response` payload;
//! failures carry `"stat": "FAIL"` with a numeric `code` and a `message`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::signing::Params;

/// Unauthenticated liveness probe.
pub const PING_PATH: &str = "/auth/v2/ping";
/// Signed credential check.
pub const CHECK_PATH: &str = "/auth/v2/check";
/// Signed enrollment check for a principal.
pub const PREAUTH_PATH: &str = "/auth/v2/preauth";
/// Signed authentication request.
pub const AUTH_PATH: &str = "/auth/v2/auth";

/// The `stat` value of a successful response.
pub const STAT_OK: &str = "OK";
/// The `response.result` value of an approved push.
pub const RESULT_ALLOW: &str = "allow";

/// Prefix of the context line shown on the approver's phone.
pub const PUSH_CONTEXT_PREFIX: &str = "USB Connect: ";

/// Response envelope shared by all endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// `"OK"` or `"FAIL"`.
    pub stat: String,
    /// Endpoint-specific payload.
    #[serde(default)]
    pub response: Option<serde_json::Value>,
    /// Error code on failure.
    #[serde(default)]
    pub code: Option<u32>,
    /// Error message on failure.
    #[serde(default)]
    pub message: Option<String>,
    /// Additional error detail on failure.
    #[serde(default)]
    pub message_detail: Option<String>,
}

impl ProviderResponse {
    /// Parses a response body.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Returns true when `stat` is `"OK"`.
    pub fn is_ok(&self) -> bool {
        self.stat == STAT_OK
    }

    /// Extracts the `/auth` payload, if present and well formed.
    pub fn auth_result(&self) -> Option<AuthResult> {
        self.response
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// One-line description of a failed response for logging.
    pub fn failure_summary(&self) -> String {
        let mut summary = format!("stat={}", self.stat);
        if let Some(code) = self.code {
            summary.push_str(&format!(" code={}", code));
        }
        if let Some(message) = &self.message {
            summary.push_str(&format!(" message={}", message));
        }
        if let Some(detail) = &self.message_detail {
            summary.push_str(&format!(" ({})", detail));
        }
        summary
    }
}

/// Payload of a completed `/auth` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// `"allow"` or `"deny"`.
    pub result: String,
    /// Machine-readable status, e.g. `"allow"`, `"deny"`, `"timeout"`.
    #[serde(default)]
    pub status: Option<String>,
    /// Human-readable status.
    #[serde(default)]
    pub status_msg: Option<String>,
}

impl AuthResult {
    /// Returns true only for an explicit `"allow"`.
    pub fn is_allow(&self) -> bool {
        self.result == RESULT_ALLOW
    }
}

/// Parameters for `/auth/v2/preauth`.
pub fn preauth_params(username: &str) -> Params {
    let mut params = Params::new();
    params.insert("username".to_string(), username.to_string());
    params
}

/// Parameters for a push `/auth/v2/auth` request.
///
/// `description` is the sanitized USB product string; it is shown to the
/// approver prefixed with [`PUSH_CONTEXT_PREFIX`].
pub fn push_params(username: &str, description: &str) -> Params {
    let mut params = preauth_params(username);
    params.insert("factor".to_string(), "push".to_string());
    params.insert("device".to_string(), "auto".to_string());
    params.insert(
        "type".to_string(),
        format!("{}{}", PUSH_CONTEXT_PREFIX, description),
    );
    params
}
