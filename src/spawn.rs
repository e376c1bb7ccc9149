//! Process launcher.
//!
//! Starts external helpers (modprobe, the tracer binaries) in a minimal,
//! fixed environment. A PID-1 context has no reliable environment to inherit,
//! so children never see the caller's; they get exactly one HOME variable.

use std::ffi::CString;

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execve, fork, ForkResult, Pid};
use tracing::{debug, warn};

use crate::errors::{BootError, BootResult, ABNORMAL_EXIT_CODE, FATAL_EXIT_CODE};

/// The whole environment every launched child receives.
const CHILD_ENV: &str = "HOME=/home/root";

/// How a launched process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Clean exit with the given status.
    Exited(i32),
    /// Killed by a signal, or the wait did not observe a clean exit.
    Abnormal,
}

/// A child process this branch is responsible for.
///
/// The creator is the sole waiter. A handle must be consumed exactly once:
/// either by [`ProcessHandle::wait`], which reaps the child, or by
/// [`ProcessHandle::detach`], which releases it to be reparented and reaped
/// by the (next) init.
#[must_use = "a child must be waited on or explicitly detached"]
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
}

impl ProcessHandle {
    pub(crate) fn new(pid: Pid) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the child terminates and classify the outcome.
    ///
    /// Waits on this specific PID only, never on "any child", so an unrelated
    /// detached process can not be reaped by accident.
    pub fn wait(self) -> ExitOutcome {
        match waitpid(self.pid, None) {
            Ok(WaitStatus::Exited(_, code)) => ExitOutcome::Exited(code),
            Ok(status) => {
                warn!("child {} did not exit cleanly: {:?}", self.pid, status);
                ExitOutcome::Abnormal
            }
            Err(e) => {
                warn!("cannot wait for child {}: {}", self.pid, e);
                ExitOutcome::Abnormal
            }
        }
    }

    /// Release ownership of the child without reaping it.
    ///
    /// The process keeps running and will be reparented to init once this
    /// branch exits. Used for the session daemon and the teardown timer,
    /// which must outlive the boot sequence.
    pub fn detach(self) {
        debug!("released child {}", self.pid);
    }
}

/// Start `argv[0]` with the given arguments and the fixed child environment.
///
/// Returns a handle owned by the caller. An exec failure surfaces in the
/// child, which exits with [`FATAL_EXIT_CODE`]; only a failed fork is
/// reported here.
pub fn launch(argv: &[&str]) -> BootResult<ProcessHandle> {
    let program = *argv
        .first()
        .ok_or_else(|| BootError::Spawn("empty argument vector".to_string()))?;

    let c_argv = to_cstrings(argv)?;
    let c_env = to_cstrings(&[CHILD_ENV])?;

    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!("launched {} (pid {})", program, child);
            Ok(ProcessHandle::new(child))
        }
        Ok(ForkResult::Child) => {
            // Only returns on failure. Exit straight through libc so no
            // duplicated state of the parent is torn down twice.
            let _ = execve(&c_argv[0], &c_argv, &c_env);
            eprintln!("WARNING: cannot exec {program}");
            unsafe { libc::_exit(FATAL_EXIT_CODE) }
        }
        Err(e) => Err(BootError::Spawn(format!("cannot fork for {program}: {e}"))),
    }
}

/// Run a program to completion and hand back an integer status.
///
/// Callers here always want some code to branch on, so an abnormal
/// termination maps to [`ABNORMAL_EXIT_CODE`] instead of an error. Only a
/// failure to create the process at all is propagated.
pub fn run_to_completion(argv: &[&str]) -> BootResult<i32> {
    let handle = launch(argv)?;
    match handle.wait() {
        ExitOutcome::Exited(code) => Ok(code),
        ExitOutcome::Abnormal => {
            warn!("{} did not return an exit code", argv[0]);
            Ok(ABNORMAL_EXIT_CODE)
        }
    }
}

fn to_cstrings(strs: &[&str]) -> BootResult<Vec<CString>> {
    strs.iter()
        .map(|s| {
            CString::new(*s).map_err(|_| BootError::Spawn(format!("NUL byte in argument {s:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_clean_exit_codes() {
        assert_eq!(run_to_completion(&["/bin/sh", "-c", "exit 0"]).unwrap(), 0);
        assert_eq!(run_to_completion(&["/bin/sh", "-c", "exit 7"]).unwrap(), 7);
    }

    #[test]
    fn launch_and_wait_classify_exit() {
        let handle = launch(&["/bin/sh", "-c", "exit 3"]).unwrap();
        assert_eq!(handle.wait(), ExitOutcome::Exited(3));
    }

    #[test]
    fn signal_death_maps_to_sentinel() {
        let code = run_to_completion(&["/bin/sh", "-c", "kill -KILL $$"]).unwrap();
        assert_eq!(code, ABNORMAL_EXIT_CODE);
    }

    #[test]
    fn exec_failure_surfaces_as_child_failure_code() {
        let code = run_to_completion(&["/nonexistent/traceboot-helper"]).unwrap();
        assert_eq!(code, FATAL_EXIT_CODE);
    }

    #[test]
    fn children_get_the_fixed_environment() {
        // HOME carries the pinned value, proving the child env is the fixed
        // one and not inherited from the caller.
        let code = run_to_completion(&["/bin/sh", "-c", "test \"$HOME\" = /home/root"]).unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(matches!(launch(&[]), Err(BootError::Spawn(_))));
    }
}
