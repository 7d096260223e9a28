//! Platform hosts for tether
//!
//! Provides:
//! - Child launching shared by every platform
//! - POSIX: parent-id polling, SIGTERM/SIGKILL termination
//! - Windows: blocking wait on child and parent handles, simulated CTRL+C
//!   through an injected shutdown routine, TerminateProcess
//!
//! [`NativeHost`] names the host for the build target.

mod process;
mod routine;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod win32;

pub use process::*;
pub use routine::*;

#[cfg(unix)]
pub use unix::*;
#[cfg(windows)]
pub use win32::*;

#[cfg(unix)]
pub type NativeHost = UnixHost;
#[cfg(windows)]
pub type NativeHost = WindowsHost;
