//! Boot orchestration and init handoff.
//!
//! The orchestrator owns the PID-1 identity. It forks a worker to do all the
//! fallible setup (mounts, modules, trace session), waits for the worker's
//! verdict, and on success replaces its own process image with the real
//! init. The teardown timer is forked out of the worker and deliberately
//! orphaned so it can stop the session long after the handoff.
//!
//! Coordination between branches is exit statuses only; every failure is
//! terminal for the branch that observed it, with no retry. This is a
//! controlled test image, not a production init.

use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::process;
use std::time::Duration;

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execve, fork, getpid, ForkResult, Pid};
use tracing::{debug, error, info};

use crate::errors::{BootError, BootResult, FATAL_EXIT_CODE};
use crate::plan::{BootPlan, MODPROBE_PATH};
use crate::session::{SessionController, SessionLease};
use crate::spawn::{self, ProcessHandle};
use crate::stage;

/// Where the boot sequence currently stands. Transitions are strictly
/// forward; there is no retry from `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Staging,
    TraceStarting,
    AwaitingWorker,
    HandedOff,
    Failed,
}

/// What one wait observation on the worker means for the supervisor.
#[derive(Debug, PartialEq, Eq)]
enum WorkerVerdict {
    /// Clean zero exit: the environment is ready, hand off.
    Ready,
    /// Non-zero exit, signal death, or a failed wait: never hand off.
    Failed(String),
    /// A stop/continue notification carries no verdict; wait again.
    KeepWaiting,
}

/// Stop/continue notifications the supervisor tolerates before giving up.
/// The worker is expected to deliver exactly one exit; an endless stream of
/// non-exit notifications would otherwise wedge PID 1 forever.
const WAIT_NOTIFICATION_BOUND: u32 = 4096;

/// Drives the whole boot: PID-1 guard, worker fork, wait loop, handoff.
pub struct Orchestrator {
    plan: BootPlan,
}

impl Orchestrator {
    pub fn new(plan: BootPlan) -> Self {
        Self { plan }
    }

    /// Run the boot sequence. Never returns on success: the supervisor
    /// branch execs into the real init and the worker branches exit.
    pub fn run(self) -> BootResult<Infallible> {
        ensure_pid1()?;
        info!("preparing for init handoff to {}", self.plan.init_path.display());

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => self.supervise(child),
            Ok(ForkResult::Child) => self.work(),
            Err(e) => Err(BootError::Spawn(format!("cannot fork boot worker: {e}"))),
        }
    }

    /// Supervisor branch: block on the worker, then exec init.
    ///
    /// The wait targets the worker PID specifically so a detached process
    /// can never be reaped here by mistake.
    fn supervise(&self, worker: Pid) -> BootResult<Infallible> {
        debug!(state = ?BootState::AwaitingWorker, "waiting for boot worker {worker}");

        let mut notifications = 0u32;
        loop {
            match classify_wait(waitpid(worker, None)) {
                WorkerVerdict::Ready => break,
                WorkerVerdict::KeepWaiting => {
                    notifications += 1;
                    if notifications >= WAIT_NOTIFICATION_BOUND {
                        return Err(BootError::Handoff(format!(
                            "worker {worker} produced {notifications} notifications without exiting"
                        )));
                    }
                }
                WorkerVerdict::Failed(reason) => {
                    return Err(BootError::Handoff(format!(
                        "{reason}; refusing to hand off an unverified system"
                    )));
                }
            }
        }

        self.exec_init()
    }

    /// Replace this process image with the real init.
    ///
    /// There is no fallback init: the call only returns on failure, and the
    /// returned error is fatal.
    fn exec_init(&self) -> BootResult<Infallible> {
        if let Some(settle) = self.plan.profile.handoff_settle() {
            std::thread::sleep(settle);
        }

        info!(state = ?BootState::HandedOff, "launching {}", self.plan.init_path.display());

        let path = CString::new(self.plan.init_path.as_os_str().as_bytes()).map_err(|_| {
            BootError::Handoff(format!(
                "init path {} contains a NUL byte",
                self.plan.init_path.display()
            ))
        })?;
        // No arguments and an empty environment: the new init starts from a
        // clean slate, same as the kernel would give it.
        let argv = [path.as_c_str()];
        let env: [&CStr; 0] = [];

        execve(path.as_c_str(), &argv, &env).map_err(|e| {
            BootError::Handoff(format!(
                "cannot launch {}: {e}",
                self.plan.init_path.display()
            ))
        })
    }

    /// Worker branch: run the setup sequence and exit with its verdict.
    fn work(self) -> ! {
        if let Err(e) = self.prepare() {
            error!("boot setup failed: {e}");
            process::exit(FATAL_EXIT_CODE);
        }
        // Readiness signal for the supervisor. The teardown timer, if any,
        // keeps running as an orphan.
        info!("ready to launch {}", self.plan.init_path.display());
        process::exit(0);
    }

    fn prepare(&self) -> BootResult<()> {
        debug!(state = ?BootState::Staging, "staging boot environment");
        info!("mounting file systems");
        stage::stage_all(&self.plan.mounts)?;

        info!("loading kernel modules");
        self.load_modules()?;

        debug!(state = ?BootState::TraceStarting, "bringing up trace session");
        let controller = SessionController::new(self.plan.profile);
        let lease = controller.start()?;
        controller.configure()?;

        if let Some(deadline) = self.plan.profile.stop_deadline() {
            self.fork_teardown_timer(controller, lease, deadline)?;
        }
        // Without a deadline the capture bounds itself and the lease retires
        // with it; nothing to schedule.

        Ok(())
    }

    /// Load every module of the table, in order. A module that fails to
    /// load is a warning, never the end of the boot; only failing to run
    /// the loader at all is fatal.
    fn load_modules(&self) -> BootResult<()> {
        for module in &self.plan.modules {
            let code = spawn::run_to_completion(&[MODPROBE_PATH, module])?;
            if code != 0 {
                tracing::warn!("cannot load kernel module {module} (status {code})");
            }
        }
        Ok(())
    }

    /// Fork the detached teardown timer.
    ///
    /// The timer branch sleeps out the capture window, stops the session and
    /// exits with the stop command's status. Its parent releases it without
    /// waiting (the PID comes back for diagnostics only): by the time the
    /// timer fires, this whole process tree is gone and the new init has
    /// inherited it.
    fn fork_teardown_timer(
        &self,
        controller: SessionController,
        lease: SessionLease,
        deadline: Duration,
    ) -> BootResult<Pid> {
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                ProcessHandle::new(child).detach();
                Ok(child)
            }
            Ok(ForkResult::Child) => {
                std::thread::sleep(deadline);
                process::exit(controller.stop(lease));
            }
            Err(e) => Err(BootError::Spawn(format!(
                "cannot fork teardown timer: {e}"
            ))),
        }
    }
}

/// PID-1 guard. The handoff exec is reserved for the first user-space
/// process; running anywhere else must fail before any fork happens.
fn ensure_pid1() -> BootResult<()> {
    let pid = getpid();
    if pid.as_raw() == 1 {
        Ok(())
    } else {
        Err(BootError::NotPid1(pid.as_raw()))
    }
}

fn classify_wait(observed: nix::Result<WaitStatus>) -> WorkerVerdict {
    match observed {
        Ok(WaitStatus::Exited(_, 0)) => WorkerVerdict::Ready,
        Ok(WaitStatus::Exited(_, code)) => {
            WorkerVerdict::Failed(format!("boot worker exited with status {code}"))
        }
        Ok(WaitStatus::Signaled(_, signal, _)) => {
            WorkerVerdict::Failed(format!("boot worker killed by {signal}"))
        }
        Ok(_) => WorkerVerdict::KeepWaiting,
        Err(e) => WorkerVerdict::Failed(format!("cannot wait for boot worker: {e}")),
    }
}
