//! One poll cycle of the agent.
//!
//! [`Agent`] owns everything a cycle touches: configuration, the trust
//! ledger, the request throttle and the collaborators. The orchestrator
//! drives it from a single task, so cycles and control commands never
//! overlap.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;

use protocol::DeviceRecord;
use thiserror::Error;

use crate::config::{CliOverrides, Config};
use crate::devices::{LedgerError, LedgerKind, TrustLedger, UsbEnumerator};
use crate::host::HostActions;
use crate::policy::{Outcome, PolicyEngine};
use crate::pushauth::{Approval, PushAuthenticator};
use crate::throttle::RequestThrottle;

/// Title used for desktop notifications.
const NOTIFY_TITLE: &str = "USB2FA";

/// Errors that abort the rest of a cycle or control command.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("USB enumeration failed: {0}")]
    Enumerate(#[source] io::Error),
}

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Devices enumerated.
    pub seen: usize,
    /// Devices escalated to push authentication.
    pub escalated: usize,
    /// Escalations that ended approved.
    pub approved: usize,
    /// Escalations that ended not approved.
    pub rejected: usize,
}

/// Where configuration comes from on reload.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    /// Config file; `None` keeps the current configuration.
    pub path: Option<PathBuf>,
    /// Command-line values applied on top.
    pub overrides: CliOverrides,
}

impl ConfigSource {
    /// Re-reads the file on top of `current` and applies overrides.
    pub fn reload(&self, current: &Config) -> Config {
        let mut config = match &self.path {
            Some(path) => current.reload(path),
            None => current.clone(),
        };
        config.apply_env_overrides();
        self.overrides.apply(&mut config);
        config.repair();
        config
    }
}

/// The agent's state and collaborators.
pub struct Agent<E, P, H> {
    config: Config,
    source: ConfigSource,
    ledger: TrustLedger,
    throttle: RequestThrottle,
    policy: PolicyEngine,
    /// Trusted keys already logged this process lifetime.
    seen: HashSet<String>,
    enumerator: E,
    authenticator: P,
    host: H,
}

impl<E, P, H> Agent<E, P, H>
where
    E: UsbEnumerator,
    P: PushAuthenticator,
    H: HostActions,
{
    /// Creates an agent, opening the ledger named by `config`.
    pub fn new(
        config: Config,
        source: ConfigSource,
        enumerator: E,
        authenticator: P,
        host: H,
    ) -> Self {
        let ledger = TrustLedger::open(config.ledger_paths());
        let throttle = RequestThrottle::new(config.daemon.throttle_ticks);
        let policy = PolicyEngine::new(&config.paranoia);
        Self {
            config,
            source,
            ledger,
            throttle,
            policy,
            seen: HashSet::new(),
            enumerator,
            authenticator,
            host,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &TrustLedger {
        &self.ledger
    }

    pub fn throttle(&self) -> &RequestThrottle {
        &self.throttle
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Runs one cycle: enumerate, classify, escalate, then tick the throttle.
    ///
    /// Enumeration failure skips the cycle. A ledger write failure aborts the
    /// remaining devices; the throttle still ticks.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport::default();
        let result = self.process_devices(&mut report).await;
        self.throttle.tick();
        result.map(|()| report)
    }

    async fn process_devices(&mut self, report: &mut CycleReport) -> Result<(), CycleError> {
        let devices = match self.enumerator.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("USB enumeration failed, skipping cycle: {}", e);
                return Ok(());
            }
        };

        for raw in devices {
            let record = raw.to_record();
            report.seen += 1;

            if self.ledger.contains(LedgerKind::Trusted, &record.identity_key) {
                if self.seen.insert(record.identity_key.clone()) {
                    tracing::info!("Trusted device connected: {}", record);
                }
                continue;
            }

            if self.throttle.is_pending(&record.identity_key) {
                continue;
            }

            report.escalated += 1;
            if self.escalate(record).await? {
                report.approved += 1;
            } else {
                report.rejected += 1;
            }
        }

        Ok(())
    }

    /// Escalates one unknown or rejected device. Returns true if approved.
    async fn escalate(&mut self, record: DeviceRecord) -> Result<bool, CycleError> {
        // Marked first so a ledger failure below cannot cause a prompt flood.
        self.throttle.mark_pending(&record.identity_key);

        if self.ledger.contains(LedgerKind::Rejected, &record.identity_key) {
            tracing::warn!("Rejected device connected again: {}", record);
            self.host.notify(
                NOTIFY_TITLE,
                &format!("Rejected device connected: {}", record.description),
            );
        } else {
            tracing::warn!("Unknown device connected: {}", record);
            self.host.notify(
                NOTIFY_TITLE,
                &format!("Unknown device connected: {}", record.description),
            );
        }
        self.policy.execute(Outcome::Connect, &self.host);

        let approval = self.authenticator.authorize(&record.description).await;
        match approval {
            Approval::Approved => {
                let description = record.description.clone();
                self.ledger.accept(record)?;
                self.host
                    .notify(NOTIFY_TITLE, &format!("Device trusted: {}", description));
                Ok(true)
            }
            Approval::Denied { reason } | Approval::Unavailable { reason } => {
                tracing::warn!("Device {} not approved: {}", record.identity_key, reason);
                let persisted = self.ledger.reject(record);
                // The punitive action runs even if the rejection was not saved.
                self.policy.execute(Outcome::Reject, &self.host);
                persisted?;
                Ok(false)
            }
        }
    }

    /// Trusts exactly the devices attached right now. Returns how many.
    pub fn force_discovery(&mut self) -> Result<usize, CycleError> {
        let records: Vec<DeviceRecord> = self
            .enumerator
            .enumerate()
            .map_err(CycleError::Enumerate)?
            .iter()
            .map(|raw| raw.to_record())
            .collect();

        self.ledger.replace_trusted(records)?;
        let count = self.ledger.trusted().len();
        tracing::info!("Discovery trusted {} devices", count);
        Ok(count)
    }

    /// Empties the rejected ledger.
    pub fn reset_rejected(&mut self) -> Result<(), CycleError> {
        self.ledger.reset_rejected()?;
        Ok(())
    }

    /// Replaces the configuration and re-reads the ledger.
    pub fn reload_config(&mut self) {
        let config = self.source.reload(&self.config);

        if config.ledger_paths() == *self.ledger.paths() {
            self.ledger.reload();
        } else {
            tracing::info!("Ledger paths changed, reopening ledger");
            self.ledger = TrustLedger::open(config.ledger_paths());
        }

        self.policy = PolicyEngine::new(&config.paranoia);
        self.throttle.set_threshold(config.daemon.throttle_ticks);
        self.host.apply_config(&config.actions);
        self.authenticator.apply_config(&config.push_auth);
        self.config = config;

        tracing::info!("Configuration reloaded");
    }
}
