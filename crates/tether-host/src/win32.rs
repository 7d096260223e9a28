//! Windows host: blocking wait on child and parent handles
//!
//! Windows can wait on any process handle, so both the child and the parent
//! are waited on together with no timeout. There is no way to send a console
//! control event to one foreign process, so the graceful request is made from
//! inside the child by [`ShutdownRoutine`].

use async_trait::async_trait;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::ptr;
use tracing::{debug, warn};

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, BOOL, HANDLE};
use windows_sys::Win32::System::Console::SetConsoleCtrlHandler;
use windows_sys::Win32::System::Diagnostics::Debug::{FlushInstructionCache, WriteProcessMemory};
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows_sys::Win32::System::Memory::{
    VirtualAllocEx, VirtualFreeEx, VirtualProtectEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
    PAGE_EXECUTE_READ, PAGE_READWRITE,
};
use windows_sys::Win32::System::Threading::{
    CreateRemoteThread, IsWow64Process, OpenProcess, WaitForMultipleObjects,
    PROCESS_QUERY_INFORMATION, PROCESS_SYNCHRONIZE,
};

use tether_host_api::{
    ExitStatus, HostError, HostOptions, HostResult, LaunchRequest, LivenessEvent, LivenessMode,
    SpawnError, SupervisorHost,
};

use crate::process::ManagedProcess;
use crate::routine::{RoutineImports, ShutdownRoutine};

const WAIT_OBJECT_0: u32 = 0;
const WAIT_FAILED: u32 = 0xFFFF_FFFF;
const INFINITE: u32 = 0xFFFF_FFFF;

/// Host for Windows
pub struct WindowsHost {
    parent: OwnedHandle,
    parent_id: u32,
    options: HostOptions,
}

impl WindowsHost {
    /// Open a handle to the process that must outlive the child
    pub fn attach(parent_id: u32, options: HostOptions) -> HostResult<Self> {
        // SAFETY: plain FFI call, the returned handle is checked before use
        let raw = unsafe {
            OpenProcess(PROCESS_SYNCHRONIZE | PROCESS_QUERY_INFORMATION, 0, parent_id)
        };
        if raw == 0 {
            return Err(HostError::ParentUnavailable {
                pid: parent_id,
                code: Some(last_error()),
            });
        }

        // SAFETY: `raw` is a freshly opened handle that nothing else owns
        let parent = unsafe { OwnedHandle::from_raw_handle(raw as _) };
        debug!(parent_id = parent_id, "Opened parent process handle");

        Ok(Self {
            parent,
            parent_id,
            options,
        })
    }

    fn parent_raw(&self) -> HANDLE {
        self.parent.as_raw_handle() as HANDLE
    }

    fn inject_shutdown(&self, child: &ManagedProcess) -> HostResult<()> {
        let process = child.child.as_raw_handle() as HANDLE;

        if !cfg!(target_arch = "x86_64") {
            return Err(HostError::Unsupported(
                "shutdown routine is only built for x86-64".into(),
            ));
        }

        let mut wow64: BOOL = 0;
        // SAFETY: `process` is the live child handle, `wow64` is a valid out-pointer
        if unsafe { IsWow64Process(process, &mut wow64) } == 0 {
            return Err(HostError::SignalFailed(format!(
                "IsWow64Process failed, GetLastError = {}",
                last_error()
            )));
        }
        if wow64 != 0 {
            return Err(HostError::Unsupported(
                "cannot inject into a 32-bit child".into(),
            ));
        }

        let delay_ms = u32::try_from(self.options.injected_exit_delay.as_millis()).unwrap_or(u32::MAX);
        let routine = ShutdownRoutine::new(resolve_imports()?, delay_ms);
        let code = routine.bytes();

        // The CTRL+C raised inside the child reaches every process on the
        // console, this one included. Our default handler would exit.
        // SAFETY: a null handler with TRUE only toggles CTRL+C handling
        unsafe { SetConsoleCtrlHandler(None, 1) };

        // SAFETY: every pointer below is either null, a local buffer that
        // outlives the call, or memory returned by VirtualAllocEx in `process`.
        unsafe {
            let remote = VirtualAllocEx(
                process,
                ptr::null(),
                code.len(),
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            );
            if remote.is_null() {
                return Err(signal_failed("VirtualAllocEx"));
            }

            let mut written = 0usize;
            let mut old_protect = 0u32;
            let ok = WriteProcessMemory(process, remote, code.as_ptr().cast(), code.len(), &mut written) != 0
                && written == code.len()
                && VirtualProtectEx(process, remote, code.len(), PAGE_EXECUTE_READ, &mut old_protect) != 0
                && FlushInstructionCache(process, remote, code.len()) != 0;
            if !ok {
                let err = signal_failed("writing shutdown routine");
                VirtualFreeEx(process, remote, 0, MEM_RELEASE);
                return Err(err);
            }

            let start: unsafe extern "system" fn(*mut core::ffi::c_void) -> u32 =
                std::mem::transmute(remote);
            let thread = CreateRemoteThread(
                process,
                ptr::null(),
                0,
                Some(start),
                ptr::null(),
                0,
                ptr::null_mut(),
            );
            if thread == 0 {
                let err = signal_failed("CreateRemoteThread");
                VirtualFreeEx(process, remote, 0, MEM_RELEASE);
                return Err(err);
            }

            // Let the child's thread run and finish without us
            CloseHandle(thread);
        }

        debug!(pid = child.pid, delay_ms = delay_ms, "Injected shutdown routine");
        Ok(())
    }
}

#[async_trait]
impl SupervisorHost for WindowsHost {
    type Child = ManagedProcess;

    fn liveness_mode(&self) -> LivenessMode {
        LivenessMode::Blocking
    }

    fn spawn(&self, request: &LaunchRequest) -> Result<ManagedProcess, SpawnError> {
        ManagedProcess::spawn(request)
    }

    fn child_id(&self, child: &ManagedProcess) -> u32 {
        child.pid
    }

    async fn wait_any(&self, child: &mut ManagedProcess) -> HostResult<LivenessEvent> {
        // Child first: on a simultaneous signal the lowest index wins
        let handles = [child.child.as_raw_handle() as HANDLE, self.parent_raw()];

        // Both handles stay owned (and open) by `child` and `self` while we
        // are suspended here.
        let result = tokio::task::spawn_blocking(move || {
            // SAFETY: `handles` holds two valid process handles
            unsafe { WaitForMultipleObjects(2, handles.as_ptr(), 0, INFINITE) }
        })
        .await
        .map_err(|e| HostError::WaitFailed(e.to_string()))?;

        match result {
            r if r == WAIT_OBJECT_0 => {
                let status = child.wait()?;
                Ok(LivenessEvent::ChildExited(status))
            }
            r if r == WAIT_OBJECT_0 + 1 => {
                debug!(parent_id = self.parent_id, "Parent process handle signaled");
                Ok(LivenessEvent::ParentGone)
            }
            WAIT_FAILED => Err(HostError::WaitFailed(format!(
                "WaitForMultipleObjects failed, GetLastError = {}",
                last_error()
            ))),
            other => Err(HostError::WaitFailed(format!(
                "WaitForMultipleObjects returned {other:#x}"
            ))),
        }
    }

    fn try_reap(&self, child: &mut ManagedProcess) -> HostResult<Option<ExitStatus>> {
        child.try_wait()
    }

    fn send_graceful(&self, child: &mut ManagedProcess) -> HostResult<()> {
        self.inject_shutdown(child).inspect_err(|e| {
            warn!(pid = child.pid, error = %e, "Failed to create remote thread");
        })
    }

    fn force_kill(&self, child: &mut ManagedProcess) -> HostResult<()> {
        // TerminateProcess with exit code 1
        child.child.kill().map_err(|e| {
            warn!(pid = child.pid, error = %e, "TerminateProcess failed");
            HostError::KillFailed(format!("pid {}: {}", child.pid, e))
        })
    }

    fn reap(&self, child: &mut ManagedProcess) -> HostResult<ExitStatus> {
        child.wait()
    }
}

fn resolve_imports() -> HostResult<RoutineImports> {
    // SAFETY: kernel32 is always loaded; names are NUL-terminated literals
    unsafe {
        let kernel32 = GetModuleHandleA(b"kernel32.dll\0".as_ptr());
        if kernel32 == 0 {
            return Err(signal_failed("GetModuleHandleA(kernel32)"));
        }
        let lookup = |name: &[u8]| {
            GetProcAddress(kernel32, name.as_ptr())
                .map(|f| f as usize as u64)
                .ok_or_else(|| signal_failed("GetProcAddress"))
        };
        Ok(RoutineImports {
            generate_console_ctrl_event: lookup(b"GenerateConsoleCtrlEvent\0")?,
            sleep: lookup(b"Sleep\0")?,
            exit_process: lookup(b"ExitProcess\0")?,
        })
    }
}

fn last_error() -> i32 {
    // SAFETY: reads thread-local error state only
    unsafe { GetLastError() as i32 }
}

fn signal_failed(step: &str) -> HostError {
    HostError::SignalFailed(format!("{step} failed, GetLastError = {}", last_error()))
}
