//! Structured error types for the external tool tier.
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! The fast tier has no error type at all: it answers `Option`, and the
//! pipeline turns every failure below into a degraded result rather than
//! surfacing it to the caller.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to launch an external symbolizer tool.
///
/// Fatal only to the symbolization attempt that triggered the spawn; the
/// pipeline falls back to the loader tier or an unresolved frame.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The executable could not be started at all (missing binary, bad
    /// permissions, fork/exec failure).
    #[error("Failed to launch symbolizer tool {}: {source}", path.display())]
    ExecFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process started but its request/response pipes could not be
    /// wired up.
    #[error("Failed to set up symbolizer tool pipes: {0}")]
    PipeFailed(String),
}

/// Failure of a single request/response round trip with a live tool process.
#[derive(Error, Debug)]
pub enum QueryError {
    /// No matching reply arrived within the configured deadline. The process
    /// may still be alive and is kept for later queries; the reply it still
    /// owes is discarded when it eventually arrives.
    #[error("No reply from symbolizer tool within {0:?}")]
    Timeout(Duration),

    /// The child process exited, observed either as end-of-file on its
    /// output pipe or by a non-blocking wait. The owning cache entry must
    /// be evicted.
    #[error("Symbolizer tool process exited unexpectedly")]
    ProcessDied,
}
