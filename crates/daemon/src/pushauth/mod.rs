//! Second-factor approval through a push-authentication provider.
//!
//! Approving a device takes four sequential requests: an unauthenticated
//! ping, a signed credential check, a signed pre-authorization for the
//! principal, and finally a signed push challenge that blocks until the
//! approver answers on their phone. Any failing step stops the handshake.

mod client;

pub use client::DuoClient;

use thiserror::Error;

use crate::config::PushAuthConfig;

/// Terminal result of one escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Approval {
    /// The approver allowed the device.
    Approved,
    /// The provider answered, and the answer was not "allow".
    Denied { reason: String },
    /// The handshake could not be completed.
    Unavailable { reason: String },
}

impl Approval {
    pub fn is_approved(&self) -> bool {
        matches!(self, Approval::Approved)
    }
}

/// A handshake step, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ping,
    Check,
    Preauth,
    Auth,
}

impl Step {
    pub fn method(self) -> &'static str {
        match self {
            Step::Ping | Step::Check => "GET",
            Step::Preauth | Step::Auth => "POST",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Step::Ping => protocol::messages::PING_PATH,
            Step::Check => protocol::messages::CHECK_PATH,
            Step::Preauth => protocol::messages::PREAUTH_PATH,
            Step::Auth => protocol::messages::AUTH_PATH,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::Ping => "ping",
            Step::Check => "check",
            Step::Preauth => "preauth",
            Step::Auth => "auth",
        };
        f.write_str(name)
    }
}

/// Reasons a handshake stops before a terminal answer.
#[derive(Debug, Error)]
pub enum PushAuthError {
    #[error("push authentication is not configured (host and keys are required)")]
    NotConfigured,

    #[error("{step}: request failed: {source}")]
    Http {
        step: Step,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: request timed out")]
    Timeout { step: Step },

    #[error("{step}: HTTP {status}: {detail}")]
    Status {
        step: Step,
        status: u16,
        detail: String,
    },

    #[error("{step}: provider returned {stat}")]
    BadStat { step: Step, stat: String },

    #[error("{step}: malformed response: {reason}")]
    Malformed { step: Step, reason: String },

    #[error("failed to sign request: {0}")]
    Signing(#[from] protocol::ProtocolError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Asks a human to approve a device.
#[allow(async_fn_in_trait)]
pub trait PushAuthenticator {
    /// Runs one escalation for the device described by `description`.
    ///
    /// Never fails: every error collapses into a not-approved [`Approval`].
    async fn authorize(&self, description: &str) -> Approval;

    /// Picks up changed provider settings after a configuration reload.
    fn apply_config(&mut self, _config: &PushAuthConfig) {}
}

/// Stand-in used when no provider is configured. Never approves.
#[derive(Debug, Clone, Default)]
pub struct Unconfigured;

impl PushAuthenticator for Unconfigured {
    async fn authorize(&self, description: &str) -> Approval {
        tracing::error!(
            "Cannot escalate \"{}\": {}",
            description,
            PushAuthError::NotConfigured
        );
        Approval::Unavailable {
            reason: PushAuthError::NotConfigured.to_string(),
        }
    }
}

/// Builds a client when the provider is configured, logging why not otherwise.
pub fn client_from_config(config: &PushAuthConfig) -> Option<DuoClient> {
    match DuoClient::new(config) {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!("Push authentication disabled: {}", e);
            None
        }
    }
}

impl PushAuthenticator for Option<DuoClient> {
    async fn authorize(&self, description: &str) -> Approval {
        match self {
            Some(client) => client.authorize(description).await,
            None => Unconfigured.authorize(description).await,
        }
    }

    fn apply_config(&mut self, config: &PushAuthConfig) {
        *self = client_from_config(config);
    }
}
