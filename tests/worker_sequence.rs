//! Worker-side setup sequence, exercised against synthetic tables.
//!
//! Actually becoming PID 1 is out of reach of a test runner, so these tests
//! drive the worker's building blocks (staging, module loading, session
//! command shape) the way the worker composes them.

use std::fs;
use std::path::Path;

use nix::mount::MsFlags;
use traceboot::plan::{BootPlan, MountEntry};
use traceboot::{spawn, stage, SessionProfile, ABNORMAL_EXIT_CODE};

fn synthetic_entry(root: &Path, name: &str) -> MountEntry {
    MountEntry::new(
        "tmpfs",
        root.join(name).to_str().unwrap(),
        "traceboot-nofs",
        None,
        MsFlags::empty(),
    )
}

#[test]
fn staging_a_synthetic_table_twice_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let table = vec![
        synthetic_entry(dir.path(), "proc"),
        synthetic_entry(dir.path(), "sys"),
        synthetic_entry(dir.path(), "run"),
    ];

    stage::stage_all(&table).unwrap();
    stage::stage_all(&table).unwrap();

    for name in ["proc", "sys", "run"] {
        assert!(dir.path().join(name).is_dir());
    }
}

#[test]
fn broken_hierarchy_aborts_staging_before_later_entries() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("dev");
    fs::write(&blocker, b"in the way").unwrap();

    let table = vec![
        MountEntry::new(
            "devtmpfs",
            blocker.join("shm").to_str().unwrap(),
            "traceboot-nofs",
            None,
            MsFlags::empty(),
        ),
        synthetic_entry(dir.path(), "untouched"),
    ];

    assert!(stage::stage_all(&table).is_err());
    assert!(!dir.path().join("untouched").exists());
}

#[test]
fn module_loading_outcome_is_just_an_exit_code() {
    // The worker treats any non-zero loader status as a warning and moves
    // on; all it ever consults is the integer that comes back.
    let ok = spawn::run_to_completion(&["/bin/sh", "-c", "exit 0"]).unwrap();
    let missing = spawn::run_to_completion(&["/bin/sh", "-c", "exit 1"]).unwrap();
    let killed = spawn::run_to_completion(&["/bin/sh", "-c", "kill -KILL $$"]).unwrap();

    assert_eq!(ok, 0);
    assert_eq!(missing, 1);
    assert_eq!(killed, ABNORMAL_EXIT_CODE);
}

#[test]
fn plan_tables_reach_the_orchestrator_unmodified() {
    let dir = tempfile::tempdir().unwrap();
    let mut plan = BootPlan::new("/sbin/init".into(), SessionProfile::Perf);
    plan.mounts = vec![synthetic_entry(dir.path(), "only")];
    plan.modules.clear();

    assert_eq!(plan.mounts.len(), 1);
    assert!(plan.modules.is_empty());
    stage::stage_all(&plan.mounts).unwrap();
    assert!(dir.path().join("only").is_dir());
}
