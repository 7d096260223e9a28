//! Liveness monitor

use std::time::Duration;
use tether_host_api::{HostResult, LivenessEvent, LivenessMode, SupervisorHost};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Waits until the child or the supervisor's parent has gone away
pub struct Monitor<'a, H: SupervisorHost> {
    host: &'a H,
    poll_interval: Duration,
}

impl<'a, H: SupervisorHost> Monitor<'a, H> {
    pub fn new(host: &'a H, poll_interval: Duration) -> Self {
        Self {
            host,
            poll_interval,
        }
    }

    /// Block until one of the two events happens and report which
    ///
    /// When both are true at once the child's exit wins. An error means the
    /// child can no longer be observed.
    pub async fn wait(&self, child: &mut H::Child) -> HostResult<LivenessEvent> {
        let event = match self.host.liveness_mode() {
            LivenessMode::Blocking => self.host.wait_any(child).await?,
            LivenessMode::Polling => self.poll(child).await?,
        };

        match event {
            LivenessEvent::ChildExited(status) => {
                debug!(pid = self.host.child_id(child), status = ?status, "Child exited on its own");
            }
            LivenessEvent::ParentGone => {
                info!(pid = self.host.child_id(child), "Parent is gone, child still running");
            }
        }
        Ok(event)
    }

    async fn poll(&self, child: &mut H::Child) -> HostResult<LivenessEvent> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Some(status) = self.host.try_reap(child)? {
                return Ok(LivenessEvent::ChildExited(status));
            }
            if self.host.parent_gone() {
                return Ok(LivenessEvent::ParentGone);
            }
        }
    }
}
