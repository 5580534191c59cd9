//! Persistent trust ledger.
//!
//! The ledger keeps three JSON files: the trusted devices, the rejected
//! devices, and a backup of the trusted devices taken before every change to
//! them. Trusted and rejected sets are held in memory in insertion order and
//! written through on every mutation. Memory only changes after the file
//! write has succeeded, so a failed write never leaves the two out of step.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use protocol::{DeviceRecord, ProtocolError};
use thiserror::Error;

/// Errors raised when a ledger file cannot be written.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to serialize {kind} ledger: {source}")]
    Serialize {
        kind: LedgerKind,
        #[source]
        source: ProtocolError,
    },

    #[error("Failed to create ledger directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {kind} ledger {}: {source}", path.display())]
    Write {
        kind: LedgerKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One of the three ledger files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Trusted,
    Rejected,
    Backup,
}

impl std::fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LedgerKind::Trusted => "trusted",
            LedgerKind::Rejected => "rejected",
            LedgerKind::Backup => "backup",
        };
        f.write_str(name)
    }
}

/// File locations of the three ledgers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPaths {
    pub trusted: PathBuf,
    pub rejected: PathBuf,
    pub backup: PathBuf,
}

impl LedgerPaths {
    /// Returns the file backing `kind`.
    pub fn path(&self, kind: LedgerKind) -> &Path {
        match kind {
            LedgerKind::Trusted => &self.trusted,
            LedgerKind::Rejected => &self.rejected,
            LedgerKind::Backup => &self.backup,
        }
    }
}

/// Trusted and rejected device sets backed by JSON files.
#[derive(Debug)]
pub struct TrustLedger {
    paths: LedgerPaths,
    trusted: Vec<DeviceRecord>,
    rejected: Vec<DeviceRecord>,
}

impl TrustLedger {
    /// Opens the ledger, loading trusted and rejected sets from disk.
    ///
    /// Missing or malformed files load as empty sets.
    pub fn open(paths: LedgerPaths) -> Self {
        let trusted = load_file(&paths.trusted);
        let rejected = load_file(&paths.rejected);
        tracing::info!(
            "Loaded {} trusted and {} rejected devices",
            trusted.len(),
            rejected.len()
        );
        Self {
            paths,
            trusted,
            rejected,
        }
    }

    /// Re-reads both sets from disk, discarding in-memory state.
    pub fn reload(&mut self) {
        self.trusted = load_file(&self.paths.trusted);
        self.rejected = load_file(&self.paths.rejected);
        tracing::debug!(
            "Reloaded {} trusted and {} rejected devices",
            self.trusted.len(),
            self.rejected.len()
        );
    }

    /// Returns the file locations.
    pub fn paths(&self) -> &LedgerPaths {
        &self.paths
    }

    /// Returns true if `identity_key` is in the in-memory `kind` set.
    ///
    /// The backup set is never held in memory and always reports false.
    pub fn contains(&self, kind: LedgerKind, identity_key: &str) -> bool {
        let set = match kind {
            LedgerKind::Trusted => &self.trusted,
            LedgerKind::Rejected => &self.rejected,
            LedgerKind::Backup => return false,
        };
        set.iter().any(|r| r.identity_key == identity_key)
    }

    /// Trusted devices in insertion order.
    pub fn trusted(&self) -> &[DeviceRecord] {
        &self.trusted
    }

    /// Rejected devices in insertion order.
    pub fn rejected(&self) -> &[DeviceRecord] {
        &self.rejected
    }

    /// Writes the current trusted set to the backup file.
    pub fn backup(&self) -> Result<(), LedgerError> {
        save_file(LedgerKind::Backup, &self.paths.backup, &self.trusted)
    }

    /// Trusts a device.
    ///
    /// The backup is written before the trusted file. A previously rejected
    /// entry with the same key is dropped from the rejected set afterwards.
    pub fn accept(&mut self, record: DeviceRecord) -> Result<(), LedgerError> {
        self.backup()?;

        let mut trusted = self.trusted.clone();
        if !trusted.iter().any(|r| r.identity_key == record.identity_key) {
            trusted.push(record.clone());
        }
        save_file(LedgerKind::Trusted, &self.paths.trusted, &trusted)?;
        self.trusted = trusted;

        if self.contains(LedgerKind::Rejected, &record.identity_key) {
            let rejected: Vec<DeviceRecord> = self
                .rejected
                .iter()
                .filter(|r| r.identity_key != record.identity_key)
                .cloned()
                .collect();
            save_file(LedgerKind::Rejected, &self.paths.rejected, &rejected)?;
            self.rejected = rejected;
        }

        tracing::info!("Trusted device {}", record);
        Ok(())
    }

    /// Rejects a device. A key that is already rejected is not duplicated.
    pub fn reject(&mut self, record: DeviceRecord) -> Result<(), LedgerError> {
        if self.contains(LedgerKind::Rejected, &record.identity_key) {
            tracing::debug!("Device {} already rejected", record.identity_key);
            return Ok(());
        }

        let mut rejected = self.rejected.clone();
        rejected.push(record.clone());
        save_file(LedgerKind::Rejected, &self.paths.rejected, &rejected)?;
        self.rejected = rejected;

        tracing::info!("Rejected device {}", record);
        Ok(())
    }

    /// Empties the rejected set and its file.
    pub fn reset_rejected(&mut self) -> Result<(), LedgerError> {
        save_file(LedgerKind::Rejected, &self.paths.rejected, &[])?;
        let cleared = self.rejected.len();
        self.rejected.clear();
        tracing::info!("Reset {} rejected devices", cleared);
        Ok(())
    }

    /// Overwrites the trusted set with `records`, after a backup.
    ///
    /// Duplicate identity keys keep their first occurrence. Rejected entries
    /// whose key is now trusted are dropped.
    pub fn replace_trusted(&mut self, records: Vec<DeviceRecord>) -> Result<(), LedgerError> {
        self.backup()?;

        let mut trusted: Vec<DeviceRecord> = Vec::with_capacity(records.len());
        for record in records {
            if !trusted.iter().any(|r| r.identity_key == record.identity_key) {
                trusted.push(record);
            }
        }
        save_file(LedgerKind::Trusted, &self.paths.trusted, &trusted)?;
        self.trusted = trusted;
        tracing::info!("Trusted set replaced with {} devices", self.trusted.len());

        let rejected: Vec<DeviceRecord> = self
            .rejected
            .iter()
            .filter(|r| !self.contains(LedgerKind::Trusted, &r.identity_key))
            .cloned()
            .collect();
        if rejected.len() != self.rejected.len() {
            save_file(LedgerKind::Rejected, &self.paths.rejected, &rejected)?;
            self.rejected = rejected;
        }
        Ok(())
    }
}

/// Reads a ledger file, treating any failure as an empty set.
pub fn load_file(path: &Path) -> Vec<DeviceRecord> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("Ledger file not found at {:?}, starting empty", path);
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("Failed to read ledger {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    match DeviceRecord::list_from_json(&contents) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("Failed to parse ledger {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Writes a ledger file atomically (temp file, then rename).
fn save_file(kind: LedgerKind, path: &Path, records: &[DeviceRecord]) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let contents =
        DeviceRecord::list_to_json(records).map_err(|source| LedgerError::Serialize { kind, source })?;

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    fs::write(&temp_path, &contents).map_err(|source| LedgerError::Write {
        kind,
        path: temp_path.clone(),
        source,
    })?;

    fs::rename(&temp_path, path).map_err(|source| LedgerError::Write {
        kind,
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!("Saved {} {} devices to {:?}", records.len(), kind, path);
    Ok(())
}
