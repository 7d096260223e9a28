//! Error types for host operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors from launching the child executable
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The executable does not exist or cannot be executed
    #[error("Program doesn't exist or is not executable: {}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other OS-level spawn failure
    #[error("Failed to start child process {}", path.display())]
    Failed {
        path: PathBuf,
        code: Option<i32>,
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    /// Classify an I/O error returned by the OS spawn call
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Self::NotFound { path, source }
            }
            _ => Self::Failed {
                path,
                code: source.raw_os_error(),
                source,
            },
        }
    }

    /// Platform error code, if the OS reported one
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::NotFound { source, .. } => source.raw_os_error(),
            Self::Failed { code, .. } => *code,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors from liveness observation and termination
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Failed to get handle to process id {pid}")]
    ParentUnavailable { pid: u32, code: Option<i32> },

    #[error("Failed to deliver shutdown notification: {0}")]
    SignalFailed(String),

    #[error("Failed to force-kill child: {0}")]
    KillFailed(String),

    #[error("Wait failed: {0}")]
    WaitFailed(String),

    #[error("Unsupported on this host: {0}")]
    Unsupported(String),
}

impl HostError {
    /// Platform error code, if one was captured
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::ParentUnavailable { code, .. } => *code,
            _ => None,
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;
