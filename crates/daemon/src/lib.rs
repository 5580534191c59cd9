//! # USB2FA Agent Library
//!
//! This crate provides the agent that gates newly attached USB devices
//! behind a second-factor push approval.
//!
//! ## Overview
//!
//! The agent polls the USB bus and classifies every device against a
//! persisted trust ledger:
//!
//! - **Trusted** devices are left alone
//! - **Unknown** and **rejected** devices are escalated: the approver gets a
//!   push notification on their phone, and the answer decides whether the
//!   device joins the trusted or the rejected ledger
//! - **Paranoia levels** decide whether a connect or a reject also locks the
//!   session or shuts the host down
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │   poll interval ──┐        ┌── control channel (signals)     │
//! │                   ▼        ▼                                  │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                        Agent                           │  │
//! │  │  UsbEnumerator → TrustLedger → RequestThrottle         │  │
//! │  │        → PushAuthenticator → PolicyEngine → HostActions│  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Agent, Config, ConfigSource, Orchestrator, SysfsEnumerator, SystemHost};
//! use daemon::pushauth::client_from_config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let authenticator = client_from_config(&config.push_auth);
//!     let host = SystemHost::new(config.actions.clone());
//!     let agent = Agent::new(
//!         config,
//!         ConfigSource::default(),
//!         SysfsEnumerator::new(),
//!         authenticator,
//!         host,
//!     );
//!
//!     let mut orchestrator = Orchestrator::new(agent);
//!     orchestrator.run().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`devices`]: USB enumeration and the trust ledger
//! - [`throttle`]: Suppresses repeated prompts for the same device
//! - [`pushauth`]: Push-authentication client
//! - [`policy`]: Paranoia levels
//! - [`host`]: Notifications, session lock, shutdown
//! - [`poll`]: One poll cycle
//! - [`control`]: Reload, discovery and reset commands
//! - [`orchestrator`]: Main agent loop
//! - [`pidfile`]: Running-agent detection
//! - [`logging`]: Tracing setup

pub mod config;
pub mod control;
pub mod devices;
pub mod host;
pub mod logging;
pub mod orchestrator;
pub mod pidfile;
pub mod policy;
pub mod poll;
pub mod pushauth;
pub mod throttle;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{CliOverrides, Config, ConfigError};

// Re-export device types for convenience
pub use devices::{
    LedgerError, LedgerKind, LedgerPaths, RawDeviceDescriptor, SysfsEnumerator, TrustLedger,
    UsbEnumerator,
};

// Re-export agent types for convenience
pub use control::{ControlCommand, ControlError, ControlHandle};
pub use host::{HostActions, SystemHost};
pub use orchestrator::{Orchestrator, OrchestratorState};
pub use policy::{Action, Outcome, Paranoia, PolicyEngine};
pub use poll::{Agent, ConfigSource, CycleError, CycleReport};
pub use pushauth::{Approval, DuoClient, PushAuthError, PushAuthenticator};
pub use throttle::RequestThrottle;
