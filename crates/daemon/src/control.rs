//! Control surface: reload, force discovery and reset of rejected devices.
//!
//! Commands reach the agent through a channel owned by the orchestrator,
//! which applies them between poll cycles. Unix signals map onto the same
//! commands, so `kill -HUP` and the CLI subcommands behave identically.

use nix::sys::signal::Signal;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::devices::UsbEnumerator;
use crate::host::HostActions;
use crate::poll::{Agent, CycleError};
use crate::pushauth::PushAuthenticator;

/// Default capacity of the control channel.
pub const CONTROL_CHANNEL_CAPACITY: usize = 16;

/// An externally triggered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Re-read configuration and ledgers.
    Reload,
    /// Trust exactly the currently attached devices.
    Discover,
    /// Empty the rejected ledger.
    ResetRejected,
}

impl ControlCommand {
    /// The signal that triggers this command in a running agent.
    pub fn signal(self) -> Signal {
        match self {
            ControlCommand::Reload => Signal::SIGHUP,
            ControlCommand::Discover => Signal::SIGUSR1,
            ControlCommand::ResetRejected => Signal::SIGUSR2,
        }
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControlCommand::Reload => "reload",
            ControlCommand::Discover => "discover",
            ControlCommand::ResetRejected => "reset-rejected",
        };
        f.write_str(name)
    }
}

/// Errors returned to the sender of a command.
#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("agent is not running")]
    Closed,

    #[error("{command} failed: {reason}")]
    Failed {
        command: ControlCommand,
        reason: String,
    },
}

/// A command plus an optional acknowledgement channel.
#[derive(Debug)]
pub struct ControlRequest {
    pub command: ControlCommand,
    pub ack: Option<oneshot::Sender<Result<(), ControlError>>>,
}

/// Sending side of the control channel.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlRequest>,
}

/// Creates a control channel.
pub fn channel(capacity: usize) -> (ControlHandle, mpsc::Receiver<ControlRequest>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ControlHandle { tx }, rx)
}

impl ControlHandle {
    /// Sends `command` and waits until the agent has applied it.
    pub async fn request(&self, command: ControlCommand) -> Result<(), ControlError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(ControlRequest {
                command,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| ControlError::Closed)?;
        ack_rx.await.map_err(|_| ControlError::Closed)?
    }

    /// Queues `command` without waiting for it to run.
    pub async fn trigger(&self, command: ControlCommand) -> Result<(), ControlError> {
        self.tx
            .send(ControlRequest { command, ack: None })
            .await
            .map_err(|_| ControlError::Closed)
    }
}

/// Applies one command to the agent.
pub fn apply<E, P, H>(agent: &mut Agent<E, P, H>, command: ControlCommand) -> Result<(), CycleError>
where
    E: UsbEnumerator,
    P: PushAuthenticator,
    H: HostActions,
{
    tracing::info!("Control command: {}", command);
    match command {
        ControlCommand::Reload => {
            agent.reload_config();
            Ok(())
        }
        ControlCommand::Discover => agent.force_discovery().map(|_| ()),
        ControlCommand::ResetRejected => agent.reset_rejected(),
    }
}

/// Translates Unix signals into control commands until `cancel` fires.
///
/// SIGINT and SIGTERM cancel the token.
pub async fn forward_signals(
    handle: ControlHandle,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigusr2 = signal(SignalKind::user_defined2())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = sighup.recv() => ControlCommand::Reload,
            _ = sigusr1.recv() => ControlCommand::Discover,
            _ = sigusr2.recv() => ControlCommand::ResetRejected,
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                cancel.cancel();
                return Ok(());
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
                cancel.cancel();
                return Ok(());
            }
        };

        tracing::info!("Received {}: {}", command.signal(), command);
        if handle.trigger(command).await.is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_mapping() {
        assert_eq!(ControlCommand::Reload.signal(), Signal::SIGHUP);
        assert_eq!(ControlCommand::Discover.signal(), Signal::SIGUSR1);
        assert_eq!(ControlCommand::ResetRejected.signal(), Signal::SIGUSR2);
    }

    #[tokio::test]
    async fn test_request_receives_ack() {
        let (handle, mut rx) = channel(CONTROL_CHANNEL_CAPACITY);

        let responder = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.command, ControlCommand::ResetRejected);
            request.ack.unwrap().send(Ok(())).unwrap();
        });

        handle.request(ControlCommand::ResetRejected).await.unwrap();
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_reports_failure() {
        let (handle, mut rx) = channel(1);

        tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            let _ = request.ack.unwrap().send(Err(ControlError::Failed {
                command: request.command,
                reason: "disk full".to_string(),
            }));
        });

        let err = handle.request(ControlCommand::Discover).await.unwrap_err();
        assert_eq!(err.to_string(), "discover failed: disk full");
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (handle, rx) = channel(1);
        drop(rx);
        assert_eq!(
            handle.trigger(ControlCommand::Reload).await,
            Err(ControlError::Closed)
        );
        assert_eq!(
            handle.request(ControlCommand::Reload).await,
            Err(ControlError::Closed)
        );
    }
}
