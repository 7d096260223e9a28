//! Platform interface for tether
//!
//! This crate defines the contract between the supervisor control logic and
//! the platform-specific process primitives. It contains no platform code
//! itself; see `tether-host` for the POSIX and Windows implementations.

mod error;
mod handle;
mod mock;
mod traits;

pub use error::*;
pub use handle::*;
pub use mock::*;
pub use traits::*;
