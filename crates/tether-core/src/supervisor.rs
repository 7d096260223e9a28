//! Launch, monitor, escalate

use tether_host_api::{ExitStatus, HostError, LaunchRequest, LivenessEvent, SpawnError, SupervisorHost};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{EscalationError, EscalationReport, Escalator, Monitor, SupervisorConfig};

/// Process exit codes callers branch on
pub mod exit_code {
    /// Normal completion: the child is gone
    pub const SUCCESS: u8 = 0;
    /// Malformed invocation
    pub const USAGE: u8 = 1;
    /// The child could not be started, or could not be terminated
    pub const SPAWN: u8 = 2;
    /// No handle to the designated parent could be obtained
    pub const PARENT: u8 = 3;
}

/// How a supervision run ended, all of which are successful
#[derive(Debug)]
pub enum SupervisorOutcome {
    /// The child exited before the parent did
    ChildExited(ExitStatus),

    /// The parent went away and the child was terminated
    Terminated(EscalationReport),

    /// The child could no longer be observed; supervision stopped
    Abandoned(HostError),
}

/// Fatal supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Escalation(#[from] EscalationError),
}

impl SupervisorError {
    pub fn exit_code(&self) -> u8 {
        exit_code::SPAWN
    }

    /// Platform error code for diagnostics, when one is known
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Spawn(e) => e.os_code(),
            Self::Escalation(e) => e.source.os_code(),
        }
    }
}

/// A single-child watchdog bound to one host
pub struct Supervisor<H: SupervisorHost> {
    host: H,
    config: SupervisorConfig,
}

impl<H: SupervisorHost> Supervisor<H> {
    pub fn new(host: H, config: SupervisorConfig) -> Self {
        Self { host, config }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Launch the child and make sure it does not outlive the parent
    pub async fn run(&self, request: &LaunchRequest) -> Result<SupervisorOutcome, SupervisorError> {
        let mut child = self.host.spawn(request)?;
        let pid = self.host.child_id(&child);
        debug!(pid = pid, mode = ?self.host.liveness_mode(), "Supervising child");

        let monitor = Monitor::new(&self.host, self.config.poll_interval);
        let event = match monitor.wait(&mut child).await {
            Ok(event) => event,
            Err(e) => {
                warn!(pid = pid, error = %e, "Lost track of child, no longer supervising");
                return Ok(SupervisorOutcome::Abandoned(e));
            }
        };

        match event {
            LivenessEvent::ChildExited(status) => Ok(SupervisorOutcome::ChildExited(status)),
            LivenessEvent::ParentGone => {
                let report = Escalator::new(&self.host, self.config.grace_period, self.config.grace_poll)
                    .run(&mut child)
                    .await?;
                debug!(pid = pid, ended_by = ?report.ended_by, status = ?report.status, "Child terminated");
                Ok(SupervisorOutcome::Terminated(report))
            }
        }
    }
}
