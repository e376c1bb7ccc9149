//! Entry point for the traceboot PID-1 shim.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::error;

use traceboot::{BootPlan, Orchestrator, SessionProfile, FATAL_EXIT_CODE};

/// Transient PID 1: stage the early-boot environment, start a trace session,
/// then exec the real init. Pass via the kernel command line, e.g.
/// `init=/home/root/traceboot`.
#[derive(Parser, Debug)]
#[command(version, about)]
struct BootArgs {
    /// Init binary to exec once setup succeeds
    #[arg(long, default_value = traceboot::plan::DEFAULT_INIT_PATH)]
    init: PathBuf,

    /// Trace backend to drive
    #[arg(long, value_enum, default_value_t = SessionProfile::Lttng)]
    profile: SessionProfile,
}

fn main() {
    // PID 1 has no reliable environment, so the env filter is best-effort
    // with a fixed fallback.
    if let Err(e) = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
    {
        eprintln!("WARNING: cannot initialize logging: {e}");
    }

    let args = BootArgs::parse();
    let plan = BootPlan::new(args.init, args.profile);

    match Orchestrator::new(plan).run() {
        Ok(never) => match never {},
        Err(e) => {
            error!("boot failed: {e}");
            process::exit(FATAL_EXIT_CODE);
        }
    }
}
