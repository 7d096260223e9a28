//! POSIX host: parent-id polling and signal-based termination
//!
//! POSIX has no primitive to wait on a process that is not our child, so the
//! parent is observed by re-reading `getppid()`. When the original parent
//! exits, the kernel reassigns us to `init` or to the nearest sub-reaper and
//! the id changes.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::{getppid, Pid};
use tracing::{debug, warn};

use tether_host_api::{
    ExitStatus, HostError, HostOptions, HostResult, LaunchRequest, LivenessMode, SpawnError,
    SupervisorHost,
};

use crate::process::ManagedProcess;

/// Parent id that orphans are reassigned to when there is no sub-reaper
const INIT_PID: Pid = Pid::from_raw(1);

/// Whether the parent was already gone before we could capture it
///
/// Being a child of `init` only means that when another parent was declared.
/// A supervisor started directly by pid 1 (a container entrypoint) is not
/// orphaned.
fn orphaned_at_start(declared: u32, actual: Pid) -> bool {
    actual == INIT_PID && i64::from(declared) != i64::from(INIT_PID.as_raw())
}

/// Host for Linux, macOS and the BSDs
pub struct UnixHost {
    original_parent: Pid,
    orphaned_at_start: bool,
}

impl UnixHost {
    /// Capture the current parent as the one to watch
    ///
    /// `parent_id` is accepted for interface uniformity with the Windows host;
    /// the parent is always identified by `getppid()` here.
    pub fn attach(parent_id: u32, _options: HostOptions) -> HostResult<Self> {
        Ok(Self::with_parent(parent_id, getppid()))
    }

    fn with_parent(parent_id: u32, original_parent: Pid) -> Self {
        let orphaned_at_start = orphaned_at_start(parent_id, original_parent);
        if orphaned_at_start {
            warn!(declared = parent_id, "Already reparented to init, parent is gone");
        } else if i64::from(original_parent.as_raw()) != i64::from(parent_id) {
            debug!(
                declared = parent_id,
                actual = original_parent.as_raw(),
                "Declared parent id differs from getppid(), watching the actual parent"
            );
        }
        Self {
            original_parent,
            orphaned_at_start,
        }
    }

    pub fn original_parent(&self) -> Pid {
        self.original_parent
    }

    fn signal(&self, child: &ManagedProcess, sig: Signal) -> nix::Result<()> {
        let pid = Pid::from_raw(child.pid as i32);
        match signal::kill(pid, sig) {
            Ok(()) => {
                debug!(pid = child.pid, signal = %sig, "Sent signal to child");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                // Process already gone
                debug!(pid = child.pid, signal = %sig, "Child already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SupervisorHost for UnixHost {
    type Child = ManagedProcess;

    fn liveness_mode(&self) -> LivenessMode {
        LivenessMode::Polling
    }

    fn spawn(&self, request: &LaunchRequest) -> Result<ManagedProcess, SpawnError> {
        ManagedProcess::spawn(request)
    }

    fn child_id(&self, child: &ManagedProcess) -> u32 {
        child.pid
    }

    fn try_reap(&self, child: &mut ManagedProcess) -> HostResult<Option<ExitStatus>> {
        child.try_wait()
    }

    fn parent_gone(&self) -> bool {
        self.orphaned_at_start || getppid() != self.original_parent
    }

    fn send_graceful(&self, child: &mut ManagedProcess) -> HostResult<()> {
        self.signal(child, Signal::SIGTERM).map_err(|e| {
            warn!(pid = child.pid, error = %e, "Failed to send SIGTERM");
            HostError::SignalFailed(format!("SIGTERM to pid {}: {}", child.pid, e))
        })
    }

    fn force_kill(&self, child: &mut ManagedProcess) -> HostResult<()> {
        self.signal(child, Signal::SIGKILL).map_err(|e| {
            warn!(pid = child.pid, error = %e, "Failed to send SIGKILL");
            HostError::KillFailed(format!("SIGKILL to pid {}: {}", child.pid, e))
        })
    }

    fn reap(&self, child: &mut ManagedProcess) -> HostResult<ExitStatus> {
        child.wait()
    }
}
