//! Integration tests for the tether binary
//!
//! These run the real binary against small shell-script children.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TETHER: &str = env!("CARGO_BIN_EXE_tether");

/// Fast timings so tests do not wait on the production defaults
const FAST: &[&str] = &[
    "--poll-interval-ms",
    "50",
    "--grace-period-ms",
    "600",
    "--grace-poll-ms",
    "50",
];

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn tether(args: &[&str]) -> Output {
    Command::new(TETHER).args(args).output().unwrap()
}

fn wait_for_file(path: &Path, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

fn read_pid(path: &Path) -> i32 {
    std::fs::read_to_string(path).unwrap().trim().parse().unwrap()
}

fn pid_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), Option::<nix::sys::signal::Signal>::None).is_ok()
}

#[test]
fn test_no_arguments_is_usage_error() {
    let out = tether(&[]);
    assert_eq!(out.status.code(), Some(1));
    assert!(!out.stderr.is_empty());
}

#[test]
fn test_missing_child_path_is_usage_error() {
    let out = tether(&["1234"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn test_invalid_timing_is_usage_error() {
    let out = tether(&["--grace-period-ms", "0", "1", "/bin/true"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn test_nonexistent_program_exits_2() {
    let out = tether(&["1", "/definitely/not/a/program"]);
    assert_eq!(out.status.code(), Some(2));

    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.starts_with("tether: "), "stderr: {stderr}");
    assert_eq!(stderr.lines().count(), 1, "stderr: {stderr}");
}

#[test]
fn test_non_executable_program_exits_2() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.txt");
    std::fs::write(&path, "not a program").unwrap();

    let out = tether(&["1", path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_child_receives_exact_arguments() {
    let dir = TempDir::new().unwrap();
    let record = dir.path().join("args.txt");
    let script = write_script(
        dir.path(),
        "echo-args",
        &format!(
            "for a in \"$0\" \"$@\"; do printf '%s\\n' \"$a\"; done > '{}'",
            record.display()
        ),
    );
    let script_arg = script.to_str().unwrap();
    let parent = std::process::id().to_string();

    let mut args = FAST.to_vec();
    args.extend([parent.as_str(), script_arg, "one", "two words", "--log-level", "-x"]);
    let out = tether(&args);

    assert_eq!(out.status.code(), Some(0));
    let text = std::fs::read_to_string(&record).unwrap();
    assert_eq!(
        text,
        format!("{script_arg}\none\ntwo words\n--log-level\n-x\n")
    );
}

#[test]
fn test_child_exit_ends_supervisor_without_signal() {
    let dir = TempDir::new().unwrap();
    let term = dir.path().join("term");
    let script = write_script(
        dir.path(),
        "short-lived",
        &format!("trap 'touch \"{}\"; exit 0' TERM\nsleep 0.2\nexit 5", term.display()),
    );
    let parent = std::process::id().to_string();

    let mut args = FAST.to_vec();
    args.extend([parent.as_str(), script.to_str().unwrap()]);
    let out = tether(&args);

    // The child's own exit code is not relayed
    assert_eq!(out.status.code(), Some(0));
    assert!(!term.exists());
}

#[cfg(target_os = "linux")]
mod parent_death {
    use super::*;
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;

    struct Run {
        tether_code: Option<i32>,
        since_parent_exit: Duration,
        child_pid: i32,
    }

    /// Start tether from an intermediate shell that exits as soon as the
    /// child is up. This process becomes a sub-reaper so the orphaned
    /// supervisor is reparented here and its exit code can be collected.
    fn run_orphaned(dir: &Path, script: &Path) -> Run {
        nix::sys::prctl::set_child_subreaper(true).unwrap();

        let started = dir.join("started");
        let tether_pid = dir.join("tether.pid");

        let mut launcher = Command::new("/bin/sh");
        launcher
            .arg("-c")
            .arg(format!(
                "\"$0\" {} $$ \"$1\" & echo $! > \"$2\"\n\
                 i=0; while [ ! -f \"$3\" ] && [ $i -lt 250 ]; do sleep 0.02; i=$((i+1)); done",
                FAST.join(" ")
            ))
            .arg(TETHER)
            .arg(script)
            .arg(&tether_pid)
            .arg(&started);

        let status = launcher.status().unwrap();
        let parent_exited = Instant::now();
        assert!(status.success());
        assert!(started.exists(), "child never started");

        let pid = Pid::from_raw(read_pid(&tether_pid));
        let deadline = Instant::now() + Duration::from_secs(15);
        let tether_code = loop {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)).unwrap() {
                WaitStatus::Exited(_, code) => break Some(code),
                WaitStatus::Signaled(..) => break None,
                _ if Instant::now() > deadline => panic!("tether did not exit"),
                _ => std::thread::sleep(Duration::from_millis(20)),
            }
        };

        Run {
            tether_code,
            since_parent_exit: parent_exited.elapsed(),
            child_pid: read_pid(&dir.join("child.pid")),
        }
    }

    #[test]
    fn test_cooperative_child_is_stopped_gracefully() {
        let dir = TempDir::new().unwrap();
        let d = dir.path().display();
        let script = write_script(
            dir.path(),
            "cooperative",
            &format!(
                "trap 'touch \"{d}/term\"; exit 0' TERM\n\
                 echo $$ > \"{d}/child.pid\"\n\
                 touch \"{d}/started\"\n\
                 while :; do sleep 0.05; done"
            ),
        );

        let run = run_orphaned(dir.path(), &script);

        assert_eq!(run.tether_code, Some(0));
        assert!(wait_for_file(&dir.path().join("term"), Duration::from_secs(1)));
        assert!(!pid_alive(run.child_pid));
        // Bounded by detection plus the grace period, with room for slow hosts
        assert!(run.since_parent_exit < Duration::from_secs(5));
    }

    #[test]
    fn test_stubborn_child_is_killed_after_grace_period() {
        let dir = TempDir::new().unwrap();
        let d = dir.path().display();
        let script = write_script(
            dir.path(),
            "stubborn",
            &format!(
                "trap '' TERM\n\
                 echo $$ > \"{d}/child.pid\"\n\
                 touch \"{d}/started\"\n\
                 while :; do sleep 0.05; done"
            ),
        );

        let run = run_orphaned(dir.path(), &script);

        assert_eq!(run.tether_code, Some(0));
        assert!(!pid_alive(run.child_pid));
        // SIGTERM was ignored, so SIGKILL only came after the grace period
        assert!(run.since_parent_exit >= Duration::from_millis(550));
    }
}
