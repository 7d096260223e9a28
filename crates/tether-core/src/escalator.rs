//! Termination escalator
//!
//! Entered once the parent is gone while the child still runs. The child is
//! driven through a fixed sequence of states that never goes backwards:
//!
//! ```text
//! Running -> GraceSignalSent -> ForceKillSent -> Reaped
//! ```
//!
//! A failed graceful request skips straight to the forceful kill, since the
//! usual cause is a child that has already exited.

use std::time::Duration;
use tether_host_api::{ExitStatus, HostError, SupervisorHost};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Escalation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EscalationState {
    Running,
    GraceSignalSent,
    ForceKillSent,
    Reaped,
}

/// How the child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndedBy {
    /// Exited during the grace period
    Graceful,
    /// Forcibly terminated
    ForceKill,
    /// The kill failed but the child turned out to be gone already
    AlreadyGone,
}

/// Outcome of a completed escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationReport {
    pub ended_by: EndedBy,

    /// Exit status, if it could be collected
    pub status: Option<ExitStatus>,
}

/// The child could not be confirmed gone
#[derive(Debug, Error)]
#[error("Failed to terminate child process {pid}: {source}")]
pub struct EscalationError {
    pub pid: u32,
    #[source]
    pub source: HostError,
}

/// Drives one child from running to reaped
pub struct Escalator<'a, H: SupervisorHost> {
    host: &'a H,
    grace_period: Duration,
    grace_poll: Duration,
    state: EscalationState,
}

impl<'a, H: SupervisorHost> Escalator<'a, H> {
    pub fn new(host: &'a H, grace_period: Duration, grace_poll: Duration) -> Self {
        Self {
            host,
            grace_period,
            grace_poll,
            state: EscalationState::Running,
        }
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    fn advance(&mut self, next: EscalationState, pid: u32) {
        debug_assert!(next > self.state, "escalation went from {:?} to {:?}", self.state, next);
        info!(pid = pid, from = ?self.state, to = ?next, "Escalation state changed");
        self.state = next;
    }

    /// Run the escalation to completion
    pub async fn run(&mut self, child: &mut H::Child) -> Result<EscalationReport, EscalationError> {
        let pid = self.host.child_id(child);

        match self.host.send_graceful(child) {
            Ok(()) => {
                self.advance(EscalationState::GraceSignalSent, pid);
                if let Some(status) = self.grace_wait(child, pid).await {
                    self.advance(EscalationState::Reaped, pid);
                    return Ok(EscalationReport {
                        ended_by: EndedBy::Graceful,
                        status: Some(status),
                    });
                }
            }
            Err(e) => {
                warn!(pid = pid, error = %e, "Graceful request failed, killing immediately");
            }
        }

        self.force(child, pid)
    }

    /// Wait up to the grace period for the child to exit on its own
    async fn grace_wait(&self, child: &mut H::Child, pid: u32) -> Option<ExitStatus> {
        let deadline = Instant::now() + self.grace_period;

        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!(pid = pid, "Grace period elapsed");
                return None;
            }
            tokio::time::sleep(self.grace_poll.min(deadline - now)).await;

            match self.host.try_reap(child) {
                Ok(Some(status)) => {
                    debug!(pid = pid, status = ?status, "Child exited during grace period");
                    return Some(status);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(pid = pid, error = %e, "Wait failed during grace period");
                    return None;
                }
            }
        }
    }

    fn force(&mut self, child: &mut H::Child, pid: u32) -> Result<EscalationReport, EscalationError> {
        self.advance(EscalationState::ForceKillSent, pid);

        if let Err(source) = self.host.force_kill(child) {
            // Killing fails on some platforms once the child has exited
            return match self.host.try_reap(child) {
                Ok(Some(status)) => {
                    self.advance(EscalationState::Reaped, pid);
                    Ok(EscalationReport {
                        ended_by: EndedBy::AlreadyGone,
                        status: Some(status),
                    })
                }
                _ => Err(EscalationError { pid, source }),
            };
        }

        let status = match self.host.reap(child) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(pid = pid, error = %e, "Failed to reap killed child");
                None
            }
        };
        self.advance(EscalationState::Reaped, pid);

        Ok(EscalationReport {
            ended_by: EndedBy::ForceKill,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_host_api::{
        HostCall, LaunchRequest, LivenessMode, MockChild, MockHost, MOCK_KILL_SIGNAL,
    };

    const GRACE: Duration = Duration::from_secs(5);
    const POLL: Duration = Duration::from_millis(250);

    fn spawn(host: &MockHost) -> MockChild {
        host.spawn(&LaunchRequest::new("/bin/child")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn cooperative_child_is_never_killed() {
        let mut host = MockHost::new(LivenessMode::Polling);
        host.graceful_exit_after = Some(Duration::from_millis(600));
        let mut child = spawn(&host);

        let start = Instant::now();
        let mut escalator = Escalator::new(&host, GRACE, POLL);
        let report = escalator.run(&mut child).await.unwrap();

        assert_eq!(report.ended_by, EndedBy::Graceful);
        assert_eq!(report.status, Some(ExitStatus::with_code(0)));
        assert_eq!(escalator.state(), EscalationState::Reaped);
        assert_eq!(host.count(HostCall::ForceKill), 0);
        // Noticed on the next short poll, not after the full grace period
        assert_eq!(start.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_child_is_killed_at_grace_period() {
        let mut host = MockHost::new(LivenessMode::Polling);
        host.graceful_exit_after = None;
        let mut child = spawn(&host);

        let start = Instant::now();
        let mut escalator = Escalator::new(&host, GRACE, POLL);
        let report = escalator.run(&mut child).await.unwrap();

        assert_eq!(report.ended_by, EndedBy::ForceKill);
        assert_eq!(report.status, Some(ExitStatus::signaled(MOCK_KILL_SIGNAL)));
        assert_eq!(start.elapsed(), GRACE);
        assert_eq!(host.count(HostCall::Graceful), 1);
        assert_eq!(host.count(HostCall::ForceKill), 1);
        assert_eq!(host.count(HostCall::Reap), 1);
        assert!(child.is_reaped());
    }

    #[tokio::test(start_paused = true)]
    async fn grace_wait_respects_deadline_with_uneven_poll() {
        let mut host = MockHost::new(LivenessMode::Polling);
        host.graceful_exit_after = None;
        let mut child = spawn(&host);

        let start = Instant::now();
        let mut escalator = Escalator::new(&host, Duration::from_millis(1000), Duration::from_millis(300));
        escalator.run(&mut child).await.unwrap();

        // Polls at 300, 600, 900, then a short 100ms sleep up to the deadline
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        assert_eq!(host.count(HostCall::TryReap), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_graceful_skips_grace_period() {
        let mut host = MockHost::new(LivenessMode::Blocking);
        host.fail_graceful = true;
        let mut child = spawn(&host);

        let start = Instant::now();
        let report = Escalator::new(&host, GRACE, POLL)
            .run(&mut child)
            .await
            .unwrap();

        assert_eq!(report.ended_by, EndedBy::ForceKill);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(host.count(HostCall::TryReap), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_kill_of_exited_child_is_success() {
        let mut host = MockHost::new(LivenessMode::Blocking);
        host.fail_graceful = true;
        host.fail_kill = true;
        host.child_exits_after = Some(Duration::ZERO);
        let mut child = spawn(&host);

        let report = Escalator::new(&host, GRACE, POLL)
            .run(&mut child)
            .await
            .unwrap();

        assert_eq!(report.ended_by, EndedBy::AlreadyGone);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_kill_of_live_child_is_error() {
        let mut host = MockHost::new(LivenessMode::Blocking);
        host.fail_graceful = true;
        host.fail_kill = true;
        let mut child = spawn(&host);

        let mut escalator = Escalator::new(&host, GRACE, POLL);
        let err = escalator.run(&mut child).await.unwrap_err();

        assert_eq!(err.pid, child.id);
        assert!(matches!(err.source, HostError::KillFailed(_)));
        assert_eq!(escalator.state(), EscalationState::ForceKillSent);
    }

    #[test]
    fn states_are_ordered() {
        assert!(EscalationState::Running < EscalationState::GraceSignalSent);
        assert!(EscalationState::GraceSignalSent < EscalationState::ForceKillSent);
        assert!(EscalationState::ForceKillSent < EscalationState::Reaped);
    }
}
