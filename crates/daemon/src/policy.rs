//! Paranoia policy.
//!
//! Each outcome (a device connecting, a device failing approval) has its own
//! paranoia level. Level 1 only logs, level 2 also locks the session and
//! level 3 also shuts the host down.

use crate::config::ParanoiaConfig;
use crate::host::HostActions;

/// Configured severity for an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paranoia {
    Log,
    Lock,
    Shutdown,
}

impl Paranoia {
    /// Maps a configured level. Unrecognized levels log only.
    pub fn from_level(level: u8) -> Self {
        match level {
            1 => Paranoia::Log,
            2 => Paranoia::Lock,
            3 => Paranoia::Shutdown,
            other => {
                tracing::warn!("Unrecognized paranoia level {}, logging only", other);
                Paranoia::Log
            }
        }
    }

    pub fn action(self) -> Action {
        match self {
            Paranoia::Log => Action::LogOnly,
            Paranoia::Lock => Action::LockSession,
            Paranoia::Shutdown => Action::ShutdownHost,
        }
    }
}

/// What happened to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// An unknown or previously rejected device was attached.
    Connect,
    /// A device failed second-factor approval.
    Reject,
}

/// What the agent does about an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    LogOnly,
    LockSession,
    ShutdownHost,
}

/// Applies the paranoia levels for connect and reject outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEngine {
    connect: Paranoia,
    reject: Paranoia,
}

impl PolicyEngine {
    pub fn new(config: &ParanoiaConfig) -> Self {
        Self {
            connect: Paranoia::from_level(config.connect),
            reject: Paranoia::from_level(config.reject),
        }
    }

    pub fn action_for(&self, outcome: Outcome) -> Action {
        match outcome {
            Outcome::Connect => self.connect.action(),
            Outcome::Reject => self.reject.action(),
        }
    }

    /// Logs the outcome and runs the configured action on `host`.
    pub fn execute<H: HostActions>(&self, outcome: Outcome, host: &H) -> Action {
        let action = self.action_for(outcome);
        match action {
            Action::LogOnly => match outcome {
                Outcome::Connect => tracing::info!("Policy: unknown device was connected"),
                Outcome::Reject => tracing::info!("Policy: unknown device was rejected"),
            },
            Action::LockSession => {
                tracing::info!("Policy: locking session ({:?})", outcome);
                host.lock_session();
            }
            Action::ShutdownHost => {
                tracing::warn!("Policy: shutting down host ({:?})", outcome);
                host.shutdown_host();
            }
        }
        action
    }
}
