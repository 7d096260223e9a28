//! Supervisor host trait

use async_trait::async_trait;
use std::time::Duration;

use crate::{ExitStatus, HostError, HostResult, LaunchRequest, LivenessEvent, SpawnError};

/// How a host can learn that the child or the parent went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessMode {
    /// Block on both processes at once (`wait_any`)
    Blocking,
    /// Check the child and the parent repeatedly (`try_reap` + `parent_gone`)
    Polling,
}

/// Options fixed when attaching a host to its parent
#[derive(Debug, Clone, Copy)]
pub struct HostOptions {
    /// How long an in-child shutdown routine waits before exiting the child
    /// on its own. Only used by hosts that simulate the graceful signal.
    pub injected_exit_delay: Duration,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            injected_exit_delay: Duration::from_secs(4),
        }
    }
}

/// Platform primitives the supervisor is written against
///
/// A host owns the reference to the supervisor's parent. The child is owned
/// by the caller and lent to the host for every operation.
#[async_trait]
pub trait SupervisorHost: Send + Sync {
    /// Owned handle to a spawned child
    type Child: Send;

    /// Which liveness strategy this host supports
    fn liveness_mode(&self) -> LivenessMode;

    /// Start the child executable
    fn spawn(&self, request: &LaunchRequest) -> Result<Self::Child, SpawnError>;

    /// OS process identifier of the child
    fn child_id(&self, child: &Self::Child) -> u32;

    /// Block until either the child or the parent has exited
    ///
    /// Only meaningful for [`LivenessMode::Blocking`] hosts.
    async fn wait_any(&self, _child: &mut Self::Child) -> HostResult<LivenessEvent> {
        Err(HostError::Unsupported("blocking wait on parent".into()))
    }

    /// Non-blocking check whether the child has exited, reaping it if so
    fn try_reap(&self, child: &mut Self::Child) -> HostResult<Option<ExitStatus>>;

    /// Whether the supervisor's original parent has gone away
    ///
    /// Only consulted for [`LivenessMode::Polling`] hosts. Blocking hosts
    /// learn about the parent from `wait_any` and can keep this default.
    fn parent_gone(&self) -> bool {
        false
    }

    /// Ask the child to shut down cleanly
    fn send_graceful(&self, child: &mut Self::Child) -> HostResult<()>;

    /// Unconditionally terminate the child
    fn force_kill(&self, child: &mut Self::Child) -> HostResult<()>;

    /// Block until the child has exited and release it
    fn reap(&self, child: &mut Self::Child) -> HostResult<ExitStatus>;
}
