//! Supervisor control logic for tether
//!
//! This crate contains the launch → monitor → escalate pipeline, written once
//! against [`tether_host_api::SupervisorHost`]:
//! - Timing configuration
//! - Liveness monitor (blocking or polling, depending on the host)
//! - Termination escalator (graceful request, bounded grace wait, force kill)
//! - Exit code mapping

mod config;
mod escalator;
mod monitor;
mod supervisor;

pub use config::*;
pub use escalator::*;
pub use monitor::*;
pub use supervisor::*;
