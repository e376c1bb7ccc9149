//! Error types shared across the boot sequence.
//!
//! Errors never cross a process boundary: each forked branch collapses its
//! `BootError` into [`FATAL_EXIT_CODE`] before exiting, and the only signal
//! observed from another branch is that integer status.

use thiserror::Error;

/// Fixed exit status for every fatal path of the boot sequence.
pub const FATAL_EXIT_CODE: i32 = 2;

/// Sentinel status reported when a launched program terminated without
/// yielding an exit code (killed by a signal, or the wait did not observe
/// a clean exit).
pub const ABNORMAL_EXIT_CODE: i32 = 0xff;

/// Result alias used throughout the crate.
pub type BootResult<T> = Result<T, BootError>;

/// Failure categories of the boot sequence.
#[derive(Debug, Error)]
pub enum BootError {
    /// Running as something other than PID 1. The handoff exec is only safe
    /// for the first user-space process, so this aborts before any fork.
    #[error("must run as PID 1 (running as pid {0})")]
    NotPid1(i32),

    /// Process creation failed (fork or exec of a helper).
    #[error("spawn: {0}")]
    Spawn(String),

    /// Essential filesystem staging failed (mount-point directory creation).
    #[error("stage: {0}")]
    Stage(String),

    /// The trace session could not be started or configured.
    #[error("session: {0}")]
    Session(String),

    /// The worker failed or the init handoff itself could not be performed.
    #[error("handoff: {0}")]
    Handoff(String),
}
