//! traceboot - transient PID 1 for early-boot trace capture.
//!
//! traceboot is meant to be passed to the kernel as `init=` on a test image.
//! It mounts the essential pseudo-filesystems, loads the tracer modules,
//! starts an LTTng or perf capture session, and then replaces itself with the
//! real init. A detached timer process survives the handoff and stops the
//! session once the capture window has passed.

#[cfg(not(target_os = "linux"))]
compile_error!("traceboot is Linux-only; build with a Linux target");

pub mod boot;
pub mod errors;
pub mod plan;
pub mod session;
pub mod spawn;
pub mod stage;

pub use boot::Orchestrator;
pub use errors::{BootError, BootResult, ABNORMAL_EXIT_CODE, FATAL_EXIT_CODE};
pub use plan::BootPlan;
pub use session::SessionProfile;
