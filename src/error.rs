//! Library error taxonomy.
//!
//! Type-rule violations at expression construction are programmer errors and
//! panic at the construction site; everything that can fail at runtime flows
//! through [`Error`]. The only internally recorded condition is a failed
//! compile inside a device layer, surfaced as [`Error::Build`] when the
//! caller asks for that kernel — the carried [`Program`] still answers
//! `build_log` queries.

use thiserror::Error;

use crate::driver::{DriverError, Program};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A kernel's program failed to compile; the program carries the log.
    #[error("kernel \"{name}\" failed to build")]
    Build { name: String, program: Program },

    /// Registry or kernel-map lookup by an unknown name.
    #[error("\"{0}\" not found")]
    NotFound(String),

    /// A buffer or image argument slot was never given a value.
    #[error("argument slot {0} has no bound value")]
    UnboundArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
