//! tether - launch a program and make sure it does not outlive the caller
//!
//! ```text
//! tether [OPTIONS] <PARENT_ID> <CHILD> [CHILD_ARGS]...
//! ```
//!
//! Exit codes: 0 when the child is gone, 1 for usage errors, 2 when the child
//! cannot be started (or cannot be terminated), 3 when the parent process
//! cannot be opened.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::ffi::OsString;
use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tether_core::{exit_code, Supervisor, SupervisorConfig};
use tether_host::NativeHost;
use tether_host_api::LaunchRequest;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Options that take the following token as their value
const VALUE_OPTIONS: &[&str] = &[
    "--log-level",
    "--poll-interval-ms",
    "--grace-period-ms",
    "--grace-poll-ms",
];

/// tether - keep a child process from outliving its parent
#[derive(Parser, Debug)]
#[command(name = "tether", version)]
#[command(about = "Run a program and terminate it when the parent process goes away", long_about = None)]
struct Args {
    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Liveness poll interval on platforms without a parent wait
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Time the child gets to exit after the graceful request
    #[arg(long, value_name = "MS")]
    grace_period_ms: Option<u64>,

    /// Early-exit check interval inside the grace period
    #[arg(long, value_name = "MS")]
    grace_poll_ms: Option<u64>,

    /// Process id of the parent to watch (ignored on POSIX, but required)
    parent_id: u32,

    /// Program to launch
    child: PathBuf,

    /// Arguments passed to the program unchanged
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    child_args: Vec<OsString>,
}

impl Args {
    fn config(&self) -> Result<SupervisorConfig> {
        let mut config = SupervisorConfig::default();
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.grace_period_ms {
            config.grace_period = Duration::from_millis(ms);
            // Keep the in-child routine's own exit ahead of the forceful kill
            config.injected_exit_delay = config.injected_exit_delay.min(config.grace_period * 4 / 5);
        }
        if let Some(ms) = self.grace_poll_ms {
            config.grace_poll = Duration::from_millis(ms);
        }
        config.validate().context("invalid timing options")?;
        Ok(config)
    }
}

/// Insert `--` right after the child path, so that everything following it
/// reaches the child verbatim even when it looks like one of our options
fn mark_child_args(argv: Vec<OsString>) -> Vec<OsString> {
    let mut out = Vec::with_capacity(argv.len() + 1);
    let mut iter = argv.into_iter();
    out.extend(iter.next());

    let mut positionals = 0;
    while let Some(arg) = iter.next() {
        match arg.to_str() {
            Some("--") => {
                out.push(arg);
                break;
            }
            Some(flag) if VALUE_OPTIONS.contains(&flag) => {
                out.push(arg);
                out.extend(iter.next());
            }
            Some(flag) if flag.starts_with('-') && flag.len() > 1 => out.push(arg),
            _ => {
                out.push(arg);
                positionals += 1;
                if positionals == 2 {
                    out.push("--".into());
                    break;
                }
            }
        }
    }

    out.extend(iter);
    out
}

fn report(err: impl Display, os_code: Option<i32>) {
    match os_code {
        Some(code) => eprintln!("tether: {err} (os error {code})"),
        None => eprintln!("tether: {err}"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse_from(mark_child_args(std::env::args_os().collect())) {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(exit_code::USAGE),
            };
        }
    };

    let config = match args.config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tether: {e:#}");
            return ExitCode::from(exit_code::USAGE);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        parent_id = args.parent_id,
        child = %args.child.display(),
        config = ?config,
        "tether starting"
    );

    let host = match NativeHost::attach(args.parent_id, config.host_options()) {
        Ok(host) => host,
        Err(e) => {
            report(&e, e.os_code());
            return ExitCode::from(exit_code::PARENT);
        }
    };

    let request = LaunchRequest::new(args.child).args(args.child_args);

    match Supervisor::new(host, config).run(&request).await {
        Ok(outcome) => {
            debug!(outcome = ?outcome, "tether finished");
            ExitCode::from(exit_code::SUCCESS)
        }
        Err(e) => {
            report(&e, e.os_code());
            ExitCode::from(e.exit_code())
        }
    }
}
