//! Child process launching

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use tracing::debug;

use tether_host_api::{ExitStatus, HostError, HostResult, LaunchRequest, SpawnError};

/// The single supervised child
pub struct ManagedProcess {
    pub child: Child,
    pub pid: u32,
}

impl ManagedProcess {
    /// Spawn the requested executable
    ///
    /// The program is never searched for in `PATH`: a bare name refers to a
    /// file in the working directory. The child's argument 0 is the program
    /// path exactly as given. Standard streams are inherited.
    pub fn spawn(request: &LaunchRequest) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(resolve_program(&request.program));
        cmd.args(&request.args);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.arg0(&request.program);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(request.program.clone(), e))?;
        let pid = child.id();

        debug!(pid = pid, program = %request.program.display(), args = request.args.len(), "Process spawned");

        Ok(Self { child, pid })
    }

    /// Check if the process has exited (non-blocking)
    pub fn try_wait(&mut self) -> HostResult<Option<ExitStatus>> {
        match self.child.try_wait() {
            Ok(status) => Ok(status.map(convert_status)),
            Err(e) => Err(HostError::WaitFailed(format!("pid {}: {}", self.pid, e))),
        }
    }

    /// Wait for the process to exit (blocking)
    pub fn wait(&mut self) -> HostResult<ExitStatus> {
        match self.child.wait() {
            Ok(status) => Ok(convert_status(status)),
            Err(e) => Err(HostError::WaitFailed(format!("pid {}: {}", self.pid, e))),
        }
    }
}

/// Turn a bare program name into a working-directory path, as `execv` would
fn resolve_program(program: &Path) -> PathBuf {
    let is_bare = program
        .parent()
        .is_some_and(|parent| parent.as_os_str().is_empty());
    if is_bare {
        Path::new(".").join(program)
    } else {
        program.to_path_buf()
    }
}

fn convert_status(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::with_code(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitStatus::signaled(sig);
        }
    }

    ExitStatus::with_code(-1)
}
