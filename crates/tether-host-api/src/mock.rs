//! Mock host for testing the supervisor control logic
//!
//! All timing is expressed against `tokio::time::Instant`, so tests can run
//! with a paused clock and advance it deterministically.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::{
    ExitStatus, HostError, HostResult, LaunchRequest, LivenessEvent, LivenessMode, SpawnError,
    SupervisorHost,
};

/// Signal number reported for a child ended by [`MockHost::force_kill`]
pub const MOCK_KILL_SIGNAL: i32 = 9;

/// Host operations recorded by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCall {
    Spawn,
    WaitAny,
    TryReap,
    Graceful,
    ForceKill,
    Reap,
}

/// Mock child process
#[derive(Debug)]
pub struct MockChild {
    pub id: u32,
    pub args: Vec<String>,
    spawned_at: Instant,
    graceful_at: Option<Instant>,
    killed_at: Option<Instant>,
    reaped: bool,
}

impl MockChild {
    pub fn is_reaped(&self) -> bool {
        self.reaped
    }
}

/// Scriptable host: decides when the child and parent exit and how the
/// child reacts to shutdown requests
pub struct MockHost {
    pub mode: LivenessMode,

    /// Child exits on its own after this long
    pub child_exits_after: Option<Duration>,

    /// Exit code used when the child exits on its own
    pub child_exit_code: i32,

    /// Parent disappears after this long
    pub parent_exits_after: Option<Duration>,

    /// Child honors the graceful request after this long; `None` ignores it
    pub graceful_exit_after: Option<Duration>,

    /// Spawn reports the executable as missing
    pub fail_spawn: bool,

    /// Graceful delivery fails
    pub fail_graceful: bool,

    /// Forceful termination fails
    pub fail_kill: bool,

    /// Liveness checks on the child fail
    pub fail_wait: bool,

    created_at: Instant,
    calls: Mutex<Vec<HostCall>>,
}

impl MockHost {
    pub fn new(mode: LivenessMode) -> Self {
        Self {
            mode,
            child_exits_after: None,
            child_exit_code: 0,
            parent_exits_after: None,
            graceful_exit_after: Some(Duration::ZERO),
            fail_spawn: false,
            fail_graceful: false,
            fail_kill: false,
            fail_wait: false,
            created_at: Instant::now(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Recorded calls, in order
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: HostCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn parent_gone_at(&self) -> Option<Instant> {
        self.parent_exits_after.map(|d| self.created_at + d)
    }

    /// When the child stops running and with which status, given what has
    /// been done to it so far
    fn child_exit(&self, child: &MockChild) -> Option<(Instant, ExitStatus)> {
        let natural = self
            .child_exits_after
            .map(|d| (child.spawned_at + d, ExitStatus::with_code(self.child_exit_code)));
        let graceful = child
            .graceful_at
            .zip(self.graceful_exit_after)
            .map(|(at, d)| (at + d, ExitStatus::with_code(0)));
        let killed = child
            .killed_at
            .map(|at| (at, ExitStatus::signaled(MOCK_KILL_SIGNAL)));

        [natural, graceful, killed]
            .into_iter()
            .flatten()
            .min_by_key(|(at, _)| *at)
    }

    fn exited_by_now(&self, child: &MockChild) -> Option<ExitStatus> {
        self.child_exit(child)
            .filter(|(at, _)| *at <= Instant::now())
            .map(|(_, status)| status)
    }
}

#[async_trait]
impl SupervisorHost for MockHost {
    type Child = MockChild;

    fn liveness_mode(&self) -> LivenessMode {
        self.mode
    }

    fn spawn(&self, request: &LaunchRequest) -> Result<MockChild, SpawnError> {
        if self.fail_spawn {
            return Err(SpawnError::from_io(
                request.program.clone(),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        self.record(HostCall::Spawn);

        let mut args = vec![display(&request.program)];
        args.extend(request.args.iter().map(|a| a.to_string_lossy().into_owned()));

        Ok(MockChild {
            id: 4242,
            args,
            spawned_at: Instant::now(),
            graceful_at: None,
            killed_at: None,
            reaped: false,
        })
    }

    fn child_id(&self, child: &MockChild) -> u32 {
        child.id
    }

    async fn wait_any(&self, child: &mut MockChild) -> HostResult<LivenessEvent> {
        self.record(HostCall::WaitAny);
        if self.mode != LivenessMode::Blocking {
            return Err(HostError::Unsupported("blocking wait on parent".into()));
        }
        if self.fail_wait {
            return Err(HostError::WaitFailed("mock wait failure".into()));
        }

        let child_exit = self.child_exit(child);
        let parent_gone = self.parent_gone_at();

        match (child_exit, parent_gone) {
            (Some((child_at, status)), Some(parent_at)) if child_at <= parent_at => {
                tokio::time::sleep_until(child_at).await;
                child.reaped = true;
                Ok(LivenessEvent::ChildExited(status))
            }
            (_, Some(parent_at)) => {
                tokio::time::sleep_until(parent_at).await;
                Ok(LivenessEvent::ParentGone)
            }
            (Some((child_at, status)), None) => {
                tokio::time::sleep_until(child_at).await;
                child.reaped = true;
                Ok(LivenessEvent::ChildExited(status))
            }
            (None, None) => std::future::pending().await,
        }
    }

    fn try_reap(&self, child: &mut MockChild) -> HostResult<Option<ExitStatus>> {
        self.record(HostCall::TryReap);
        if self.fail_wait {
            return Err(HostError::WaitFailed("mock wait failure".into()));
        }
        let status = self.exited_by_now(child);
        if status.is_some() {
            child.reaped = true;
        }
        Ok(status)
    }

    fn parent_gone(&self) -> bool {
        self.parent_gone_at().is_some_and(|at| at <= Instant::now())
    }

    fn send_graceful(&self, child: &mut MockChild) -> HostResult<()> {
        self.record(HostCall::Graceful);
        if self.fail_graceful {
            return Err(HostError::SignalFailed("mock signal failure".into()));
        }
        child.graceful_at.get_or_insert_with(Instant::now);
        Ok(())
    }

    fn force_kill(&self, child: &mut MockChild) -> HostResult<()> {
        self.record(HostCall::ForceKill);
        if self.fail_kill {
            return Err(HostError::KillFailed("mock kill failure".into()));
        }
        if self.exited_by_now(child).is_none() {
            child.killed_at = Some(Instant::now());
        }
        Ok(())
    }

    fn reap(&self, child: &mut MockChild) -> HostResult<ExitStatus> {
        self.record(HostCall::Reap);
        match self.exited_by_now(child) {
            Some(status) => {
                child.reaped = true;
                Ok(status)
            }
            None => Err(HostError::WaitFailed("child would never exit".into())),
        }
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
