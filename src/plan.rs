//! Immutable boot configuration.
//!
//! Everything the orchestrator consumes is assembled here once, at startup:
//! the filesystem table, the kernel-module table, the init handoff target and
//! the session profile. The tables are plain data so tests can substitute
//! synthetic ones.

use std::path::PathBuf;

use nix::mount::MsFlags;

use crate::session::SessionProfile;

/// Init binary exec'd on successful boot, unless overridden on the command line.
pub const DEFAULT_INIT_PATH: &str = "/lib/systemd/systemd";

/// Module loader used for every entry of the module table.
pub const MODPROBE_PATH: &str = "/sbin/modprobe";

/// Mode for mount-point directories created during staging.
pub const MOUNT_POINT_MODE: u32 = 0o755;

/// One filesystem entry of the staging table.
///
/// Entries are consumed in table order; ordering matters (later mounts may
/// live below earlier ones) but a failed mount does not stop the table.
#[derive(Debug, Clone)]
pub struct MountEntry {
    /// Mount source (device, or the filesystem name for pseudo-filesystems).
    pub source: String,
    /// Absolute mount-point path.
    pub target: String,
    /// Filesystem type.
    pub fstype: String,
    /// Filesystem-specific option string, if any.
    pub options: Option<String>,
    /// Mount flags.
    pub flags: MsFlags,
}

impl MountEntry {
    pub fn new(
        source: &str,
        target: &str,
        fstype: &str,
        options: Option<&str>,
        flags: MsFlags,
    ) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            fstype: fstype.to_string(),
            options: options.map(str::to_string),
            flags,
        }
    }
}

/// The pseudo-filesystems an early-boot environment needs before anything
/// else can run.
pub fn default_mount_table() -> Vec<MountEntry> {
    let no_exec_dev = MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV;
    let strict = MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_STRICTATIME;
    vec![
        MountEntry::new("proc", "/proc", "proc", None, no_exec_dev),
        MountEntry::new("sysfs", "/sys", "sysfs", None, no_exec_dev),
        MountEntry::new(
            "devtmpfs",
            "/dev",
            "devtmpfs",
            Some("mode=755"),
            MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        ),
        MountEntry::new("tmpfs", "/dev/shm", "tmpfs", Some("mode=1777"), strict),
        MountEntry::new("tmpfs", "/run", "tmpfs", Some("mode=755"), strict),
    ]
}

/// Kernel modules required by the chosen trace backend.
///
/// The LTTng kernel tracer lives in a module; perf needs nothing loaded.
pub fn default_module_table(profile: SessionProfile) -> Vec<String> {
    match profile {
        SessionProfile::Lttng => vec!["lttng-tracer".to_string()],
        SessionProfile::Perf => Vec::new(),
    }
}

/// The full boot plan handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct BootPlan {
    /// Filesystem staging table, consumed top to bottom.
    pub mounts: Vec<MountEntry>,
    /// Kernel modules to load, in order.
    pub modules: Vec<String>,
    /// Absolute path of the real init to exec on success.
    pub init_path: PathBuf,
    /// Trace backend driven by this boot.
    pub profile: SessionProfile,
}

impl BootPlan {
    /// Build the default plan for a given init target and profile.
    pub fn new(init_path: PathBuf, profile: SessionProfile) -> Self {
        Self {
            mounts: default_mount_table(),
            modules: default_module_table(profile),
            init_path,
            profile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_table_order_is_stable() {
        let targets: Vec<String> = default_mount_table()
            .into_iter()
            .map(|e| e.target)
            .collect();
        assert_eq!(targets, ["/proc", "/sys", "/dev", "/dev/shm", "/run"]);
    }

    #[test]
    fn proc_entry_is_locked_down() {
        let table = default_mount_table();
        let proc = &table[0];
        assert_eq!(proc.source, "proc");
        assert_eq!(proc.fstype, "proc");
        assert_eq!(proc.options, None);
        assert!(proc.flags.contains(MsFlags::MS_NOSUID));
        assert!(proc.flags.contains(MsFlags::MS_NOEXEC));
        assert!(proc.flags.contains(MsFlags::MS_NODEV));
    }

    #[test]
    fn shm_is_world_writable_tmpfs() {
        let table = default_mount_table();
        let shm = &table[3];
        assert_eq!(shm.fstype, "tmpfs");
        assert_eq!(shm.options.as_deref(), Some("mode=1777"));
    }

    #[test]
    fn module_table_depends_on_profile() {
        assert_eq!(
            default_module_table(SessionProfile::Lttng),
            ["lttng-tracer"]
        );
        assert!(default_module_table(SessionProfile::Perf).is_empty());
    }

    #[test]
    fn default_plan_carries_the_tables() {
        let plan = BootPlan::new(DEFAULT_INIT_PATH.into(), SessionProfile::Lttng);
        assert_eq!(plan.mounts.len(), 5);
        assert_eq!(plan.modules.len(), 1);
        assert_eq!(plan.init_path, PathBuf::from(DEFAULT_INIT_PATH));
    }
}
