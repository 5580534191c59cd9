//! Agent orchestrator.
//!
//! This module provides the `Orchestrator` that drives the poll loop and
//! applies control commands. Everything runs on one task: a command waits
//! for the current cycle to finish, and a cycle never starts while a command
//! is being applied.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::control::{self, ControlError, ControlHandle, ControlRequest, CONTROL_CHANNEL_CAPACITY};
use crate::devices::UsbEnumerator;
use crate::host::HostActions;
use crate::poll::Agent;
use crate::pushauth::PushAuthenticator;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Polling.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Owns the agent and runs it until cancelled.
pub struct Orchestrator<E, P, H> {
    agent: Agent<E, P, H>,
    control: ControlHandle,
    control_rx: mpsc::Receiver<ControlRequest>,
    shutdown_token: CancellationToken,
    state: OrchestratorState,
}

impl<E, P, H> Orchestrator<E, P, H>
where
    E: UsbEnumerator,
    P: PushAuthenticator,
    H: HostActions,
{
    pub fn new(agent: Agent<E, P, H>) -> Self {
        let (control, control_rx) = control::channel(CONTROL_CHANNEL_CAPACITY);
        Self {
            agent,
            control,
            control_rx,
            shutdown_token: CancellationToken::new(),
            state: OrchestratorState::Stopped,
        }
    }

    /// Handle for sending control commands.
    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Token that stops [`Orchestrator::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn agent(&self) -> &Agent<E, P, H> {
        &self.agent
    }

    /// Polls until the shutdown token is cancelled.
    pub async fn run(&mut self) {
        let Self {
            agent,
            control_rx,
            shutdown_token,
            state,
            ..
        } = self;

        *state = OrchestratorState::Running;
        let mut delay_ms = agent.config().daemon.loop_delay_ms;
        let mut interval = poll_interval(delay_ms);
        info!("Polling USB devices every {} ms", delay_ms);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_token.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                Some(request) = control_rx.recv() => {
                    let command = request.command;
                    let result = control::apply(agent, command).map_err(|e| {
                        error!("Control command {} failed: {}", command, e);
                        ControlError::Failed { command, reason: e.to_string() }
                    });
                    if let Some(ack) = request.ack {
                        let _ = ack.send(result);
                    }

                    let configured = agent.config().daemon.loop_delay_ms;
                    if configured != delay_ms {
                        info!("Poll interval changed from {} to {} ms", delay_ms, configured);
                        delay_ms = configured;
                        interval = poll_interval(delay_ms);
                    }
                }

                _ = interval.tick() => {
                    match agent.run_cycle().await {
                        Ok(report) if report.escalated > 0 => {
                            info!(
                                "Cycle: {} seen, {} escalated, {} approved, {} rejected",
                                report.seen, report.escalated, report.approved, report.rejected
                            );
                        }
                        Ok(report) => debug!("Cycle: {} seen", report.seen),
                        Err(e) => error!("Poll cycle aborted: {}", e),
                    }
                }
            }
        }

        *state = OrchestratorState::ShuttingDown;
        control_rx.close();
        while let Ok(request) = control_rx.try_recv() {
            if let Some(ack) = request.ack {
                let _ = ack.send(Err(ControlError::Closed));
            }
        }
        *state = OrchestratorState::Stopped;
        info!("Orchestrator stopped");
    }
}

fn poll_interval(delay_ms: u64) -> Interval {
    let mut interval = time::interval(Duration::from_millis(delay_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
