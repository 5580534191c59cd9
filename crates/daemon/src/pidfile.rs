//! PID file utilities for agent running detection.
//!
//! `start` records its PID here; the signalling subcommands (`reload`,
//! `rediscover`, `reset-rejected`) read it back to find the agent.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};

/// Writes the current process ID to `path`, creating parent directories.
pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create PID directory: {}", parent.display()))?;
    }

    fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("Failed to write PID file: {}", path.display()))?;

    tracing::debug!("Wrote PID file {:?}", path);
    Ok(())
}

/// Reads a PID from `path`. Missing or unparseable files yield `None`.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Returns the PID of a running agent, removing stale PID files.
pub fn running_pid(path: &Path) -> Option<u32> {
    if !path.exists() {
        return None;
    }

    match read_pid(path) {
        Some(pid) if is_process_running(pid) => Some(pid),
        _ => {
            tracing::debug!("Removing stale PID file {:?}", path);
            cleanup_stale_pid_file(path);
            None
        }
    }
}

/// Removes the PID file if it still names this process.
pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    match read_pid(path) {
        Some(pid) if pid != std::process::id() => {
            tracing::warn!("PID file {:?} belongs to process {}, leaving it", path, pid);
            Ok(())
        }
        _ => match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
    }
}

/// Check if a process with the given PID is running.
///
/// On Linux, this checks if `/proc/{pid}/stat` exists.
/// On other Unix systems, this sends signal 0.
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        let proc_path = format!("/proc/{}/stat", pid);
        Path::new(&proc_path).exists()
    }

    #[cfg(not(target_os = "linux"))]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        i32::try_from(pid)
            .map(|pid| kill(Pid::from_raw(pid), None).is_ok())
            .unwrap_or(false)
    }
}

fn cleanup_stale_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_pid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run").join("usb2fac.pid");

        write_pid_file(&path).unwrap();

        assert_eq!(read_pid(&path), Some(std::process::id()));
        assert_eq!(running_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn test_read_pid_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("usb2fac.pid");
        fs::write(&path, "not a pid").unwrap();

        assert_eq!(read_pid(&path), None);
        assert_eq!(running_pid(&path), None);
        assert!(!path.exists(), "garbage PID file should be removed");
    }

    #[test]
    fn test_running_pid_stale() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("usb2fac.pid");
        // PIDs are capped well below this on Linux.
        fs::write(&path, "4194304999\n").unwrap();

        assert_eq!(running_pid(&path), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_running_pid_missing() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(running_pid(&temp_dir.path().join("absent.pid")), None);
    }

    #[test]
    fn test_remove_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("usb2fac.pid");
        write_pid_file(&path).unwrap();

        remove_pid_file(&path).unwrap();
        assert!(!path.exists());
        // Removing again is not an error.
        remove_pid_file(&path).unwrap();
    }

    #[test]
    fn test_remove_pid_file_of_other_process() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("usb2fac.pid");
        fs::write(&path, "1\n").unwrap();

        remove_pid_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_is_process_running_current() {
        assert!(is_process_running(std::process::id()));
    }
}
