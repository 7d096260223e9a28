//! Supervisor timing configuration

use std::time::Duration;
use tether_host_api::HostOptions;
use thiserror::Error;

/// Timing configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("grace poll interval ({poll:?}) exceeds grace period ({grace:?})")]
    GracePollTooLong { poll: Duration, grace: Duration },
}

/// Timings for the monitor and the escalator
///
/// None of these carry correctness: only the final forceful termination is
/// guaranteed to end the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Interval between liveness checks on polling hosts
    pub poll_interval: Duration,

    /// How long the child gets to exit after the graceful request
    pub grace_period: Duration,

    /// Early-exit check interval inside the grace period
    pub grace_poll: Duration,

    /// Delay before an in-child shutdown routine exits the child itself
    pub injected_exit_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(5),
            grace_poll: Duration::from_millis(250),
            injected_exit_delay: HostOptions::default().injected_exit_delay,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("poll interval", self.poll_interval),
            ("grace period", self.grace_period),
            ("grace poll interval", self.grace_poll),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        if self.grace_poll > self.grace_period {
            return Err(ConfigError::GracePollTooLong {
                poll: self.grace_poll,
                grace: self.grace_period,
            });
        }

        Ok(())
    }

    /// Options to attach the platform host with
    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            injected_exit_delay: self.injected_exit_delay,
        }
    }
}
