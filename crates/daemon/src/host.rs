//! Host-side actions: desktop notifications, session lock and shutdown.

use std::process::Command;

use crate::config::ActionsConfig;

/// Side effects the agent can trigger on the host.
pub trait HostActions {
    /// Shows a desktop notification.
    fn notify(&self, title: &str, message: &str);

    /// Locks the interactive session.
    fn lock_session(&self);

    /// Shuts the host down.
    fn shutdown_host(&self);

    /// Picks up changed action settings after a configuration reload.
    fn apply_config(&mut self, _actions: &ActionsConfig) {}
}

/// Runs the configured system commands.
#[derive(Debug, Clone)]
pub struct SystemHost {
    actions: ActionsConfig,
}

impl SystemHost {
    pub fn new(actions: ActionsConfig) -> Self {
        Self { actions }
    }

    fn notification_command(title: &str, message: &str) -> Vec<String> {
        if cfg!(target_os = "macos") {
            let script = format!(
                "display notification \"{}\" with title \"{}\"",
                escape_applescript(message),
                escape_applescript(title)
            );
            vec!["osascript".to_string(), "-e".to_string(), script]
        } else {
            vec![
                "notify-send".to_string(),
                "--app-name=usb2fa".to_string(),
                title.to_string(),
                message.to_string(),
            ]
        }
    }
}

impl HostActions for SystemHost {
    fn notify(&self, title: &str, message: &str) {
        if !self.actions.notify {
            return;
        }
        run(&Self::notification_command(title, message));
    }

    fn lock_session(&self) {
        run(&self.actions.lock_command);
    }

    fn shutdown_host(&self) {
        run(&self.actions.shutdown_command);
    }

    fn apply_config(&mut self, actions: &ActionsConfig) {
        self.actions = actions.clone();
    }
}

fn escape_applescript(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Runs a command line, logging instead of failing.
fn run(argv: &[String]) -> bool {
    let Some((program, args)) = argv.split_first() else {
        tracing::error!("Empty host command, nothing to run");
        return false;
    };

    match Command::new(program).args(args).status() {
        Ok(status) if status.success() => {
            tracing::debug!("Host command {:?} succeeded", argv);
            true
        }
        Ok(status) => {
            tracing::warn!("Host command {:?} exited with {}", argv, status);
            false
        }
        Err(e) => {
            tracing::error!("Failed to run host command {:?}: {}", argv, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_empty_command() {
        assert!(!run(&[]));
    }

    #[test]
    fn test_run_missing_program() {
        assert!(!run(&["/nonexistent/usb2fa-lock".to_string()]));
    }

    #[test]
    fn test_run_success_and_failure() {
        assert!(run(&["true".to_string()]));
        assert!(!run(&["false".to_string()]));
    }

    #[test]
    fn test_escape_applescript() {
        assert_eq!(escape_applescript(r#"say "hi""#), r#"say \"hi\""#);
    }

    #[test]
    fn test_apply_config_replaces_actions() {
        let mut host = SystemHost::new(ActionsConfig::default());
        let actions = ActionsConfig {
            lock_command: vec!["true".to_string()],
            shutdown_command: vec!["true".to_string()],
            notify: false,
        };
        host.apply_config(&actions);
        assert_eq!(host.actions, actions);
        // Disabled notifications never spawn anything.
        host.notify("title", "message");
    }

    #[test]
    fn test_notification_command_carries_text() {
        let argv = SystemHost::notification_command("USB2FA", "Test Drive");
        assert!(argv.iter().any(|a| a.contains("Test Drive")));
    }
}
