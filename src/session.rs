//! Trace session control.
//!
//! Drives one of two capture backends behind the same interface: an LTTng
//! session (daemon plus control commands, stopped later by the teardown
//! timer) or a one-shot perf record that bounds itself and needs no stop.

use std::time::Duration;

use clap::ValueEnum;
use tracing::{debug, info, warn};

use crate::errors::{BootError, BootResult, FATAL_EXIT_CODE};
use crate::spawn;

/// Name under which the LTTng session is created and later stopped.
pub const SESSION_NAME: &str = "init-session";

/// Delay between starting the session daemon and configuring it.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// How long the teardown timer lets the capture run past the handoff.
pub const TEARDOWN_DELAY: Duration = Duration::from_secs(60);

const LTTNG_BIN: &str = "/usr/bin/lttng";
const SESSIOND_BIN: &str = "/usr/bin/lttng-sessiond";
const PERF_BIN: &str = "/usr/bin/perf";
const CAT_BIN: &str = "/bin/cat";
const DEFERRED_INITCALLS: &str = "/proc/deferred_initcalls";
const PERF_OUTPUT: &str = "/home/root/perf.data.raw";

/// Pause before the handoff exec, so perf finishes setting up.
const PERF_HANDOFF_SETTLE: Duration = Duration::from_millis(600);

/// Which trace backend a boot drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SessionProfile {
    /// lttng-sessiond plus a named session, stopped by the teardown timer.
    Lttng,
    /// One-shot `perf record` with a fixed capture window; stops itself.
    Perf,
}

impl SessionProfile {
    /// How long after the worker forks it the teardown timer should wait
    /// before stopping the session. `None` means the capture bounds itself
    /// and no timer is forked.
    pub fn stop_deadline(&self) -> Option<Duration> {
        match self {
            SessionProfile::Lttng => Some(TEARDOWN_DELAY),
            SessionProfile::Perf => None,
        }
    }

    /// Extra pause the supervisor takes right before exec'ing init.
    pub fn handoff_settle(&self) -> Option<Duration> {
        match self {
            SessionProfile::Lttng => None,
            SessionProfile::Perf => Some(PERF_HANDOFF_SETTLE),
        }
    }
}

/// The active capture, created by [`SessionController::start`] and
/// terminated exactly once.
///
/// Not cloneable: whichever branch ends up holding the lease is the one
/// that stops the session.
#[derive(Debug)]
pub struct SessionLease {
    name: &'static str,
}

impl SessionLease {
    pub(crate) fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &str {
        self.name
    }
}

/// Starts, configures and stops the capture backend of the chosen profile.
pub struct SessionController {
    profile: SessionProfile,
}

impl SessionController {
    pub fn new(profile: SessionProfile) -> Self {
        Self { profile }
    }

    /// Launch the capture backend and hand back the session lease.
    ///
    /// The backend process is detached in both profiles: it has to outlive
    /// the worker branch and will be reparented to the new init.
    pub fn start(&self) -> BootResult<SessionLease> {
        match self.profile {
            SessionProfile::Lttng => {
                info!("starting LTTng session daemon");
                let daemon = spawn::launch(&sessiond_cmd())
                    .map_err(|e| BootError::Session(format!("cannot start lttng-sessiond: {e}")))?;
                daemon.detach();
            }
            SessionProfile::Perf => {
                // Force deferred initcalls first so tracepoint events exist.
                // Kernels without the patch report failure here; the capture
                // is still worth attempting.
                info!("running kernel deferred initcalls");
                let code = spawn::run_to_completion(&deferred_initcalls_cmd())?;
                if code != 0 {
                    warn!("cannot run kernel deferred initcalls (status {code})");
                }

                info!("starting perf capture");
                let recorder = spawn::launch(&perf_record_cmd())
                    .map_err(|e| BootError::Session(format!("cannot start perf: {e}")))?;
                recorder.detach();
            }
        }
        Ok(SessionLease::new(SESSION_NAME))
    }

    /// Issue the control commands that arm the capture.
    ///
    /// Partial configuration is worse than none at all (the session would
    /// claim success while capturing nothing), so every command must
    /// succeed. The perf profile is armed entirely by its command line and
    /// has no configure phase.
    pub fn configure(&self) -> BootResult<()> {
        if self.profile != SessionProfile::Lttng {
            return Ok(());
        }

        // Give the daemon a moment to bring up its control socket.
        std::thread::sleep(SETTLE_DELAY);

        let steps: [(&str, Vec<&str>); 3] = [
            ("create session", create_cmd()),
            ("enable events", enable_events_cmd()),
            ("start capture", start_capture_cmd()),
        ];
        for (what, argv) in steps {
            info!("lttng: {what}");
            let code = spawn::run_to_completion(&argv)?;
            if code != 0 {
                return Err(BootError::Session(format!(
                    "cannot {what} (status {code})"
                )));
            }
        }
        Ok(())
    }

    /// Stop the capture, consuming the lease, and report the stop command's
    /// exit status.
    pub fn stop(&self, lease: SessionLease) -> i32 {
        match self.profile {
            SessionProfile::Lttng => {
                info!("stopping capture for session {}", lease.name());
                match spawn::run_to_completion(&stop_cmd()) {
                    Ok(code) => code,
                    Err(e) => {
                        warn!("cannot stop session {}: {}", lease.name(), e);
                        FATAL_EXIT_CODE
                    }
                }
            }
            SessionProfile::Perf => {
                debug!("capture for {} is self-bounded", lease.name());
                0
            }
        }
    }
}

fn sessiond_cmd() -> Vec<&'static str> {
    vec![SESSIOND_BIN, "--quiet"]
}

fn create_cmd() -> Vec<&'static str> {
    vec![LTTNG_BIN, "-n", "create", SESSION_NAME]
}

fn enable_events_cmd() -> Vec<&'static str> {
    vec![LTTNG_BIN, "-n", "enable-event", "-u", "-a", "-s", SESSION_NAME]
}

fn start_capture_cmd() -> Vec<&'static str> {
    vec![LTTNG_BIN, "-n", "start", SESSION_NAME]
}

fn stop_cmd() -> Vec<&'static str> {
    vec![LTTNG_BIN, "-n", "stop", SESSION_NAME]
}

fn deferred_initcalls_cmd() -> Vec<&'static str> {
    vec![CAT_BIN, DEFERRED_INITCALLS]
}

fn perf_record_cmd() -> Vec<&'static str> {
    vec![
        PERF_BIN,
        "record",
        "-e",
        "sched:sched*",
        "-e",
        "module:module*",
        "-g", // call backtraces
        "-a", // all processes
        "-c",
        "1", // sample every event
        "-o",
        PERF_OUTPUT,
        "sleep",
        "3",
    ]
}
