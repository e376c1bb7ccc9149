//! Filesystem staging.
//!
//! Ensures every mount point of the staging table exists and mounts it.
//! A missing mount is survivable (the boot continues with a warning); a
//! mount-point path that can not be created indicates a broken hierarchy
//! and stops the staging run.

use std::path::{Component, Path, PathBuf};

use nix::errno::Errno;
use nix::mount::mount;
use nix::sys::stat::{stat, Mode};
use nix::unistd::mkdir;
use tracing::{debug, warn};

use crate::errors::{BootError, BootResult};
use crate::plan::{MountEntry, MOUNT_POINT_MODE};

/// Recursively create `path` with the given mode.
///
/// Every missing component is created in turn. A component that already
/// exists as a directory is fine (the operation is idempotent); one that
/// exists as anything else is a hard error and stops further creation.
/// Only absolute paths are accepted.
pub fn mkdir_p(path: &Path, mode: u32) -> BootResult<()> {
    if !path.is_absolute() {
        return Err(BootError::Stage(format!(
            "mount point {} is not an absolute path",
            path.display()
        )));
    }

    let mode = Mode::from_bits_truncate(mode);
    let mut current = PathBuf::from("/");
    for component in path.components() {
        let part = match component {
            Component::RootDir => continue,
            Component::Normal(part) => part,
            other => {
                return Err(BootError::Stage(format!(
                    "unsupported path component {:?} in {}",
                    other,
                    path.display()
                )))
            }
        };
        current.push(part);

        match stat(&current) {
            Ok(st) => {
                if st.st_mode & libc::S_IFMT != libc::S_IFDIR {
                    return Err(BootError::Stage(format!(
                        "{} exists and is not a directory",
                        current.display()
                    )));
                }
            }
            Err(Errno::ENOENT) => {
                // Tolerate EEXIST: another branch may have raced us here.
                if let Err(e) = mkdir(&current, mode) {
                    if e != Errno::EEXIST {
                        return Err(BootError::Stage(format!(
                            "cannot create directory {}: {}",
                            current.display(),
                            e
                        )));
                    }
                }
            }
            Err(e) => {
                return Err(BootError::Stage(format!(
                    "cannot stat {}: {}",
                    current.display(),
                    e
                )))
            }
        }
    }

    Ok(())
}

/// Create the mount point for `entry` and mount it.
///
/// Directory creation failure is fatal; the mount call failing is logged
/// and swallowed, since losing one non-essential filesystem should not
/// block the boot.
pub fn ensure_mounted(entry: &MountEntry) -> BootResult<()> {
    mkdir_p(Path::new(&entry.target), MOUNT_POINT_MODE)?;

    match mount(
        Some(entry.source.as_str()),
        entry.target.as_str(),
        Some(entry.fstype.as_str()),
        entry.flags,
        entry.options.as_deref(),
    ) {
        Ok(()) => debug!("mounted {} on {}", entry.source, entry.target),
        Err(e) => warn!("cannot mount {} on {}: {}", entry.source, entry.target, e),
    }

    Ok(())
}

/// Stage the whole filesystem table in order.
pub fn stage_all(entries: &[MountEntry]) -> BootResult<()> {
    for entry in entries {
        ensure_mounted(entry)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::mount::MsFlags;
    use std::fs;

    fn entry_under(root: &Path, name: &str) -> MountEntry {
        MountEntry::new(
            "tmpfs",
            root.join(name).to_str().unwrap(),
            // A type the kernel does not know, so the mount attempt fails
            // even when the tests run as root.
            "traceboot-nofs",
            None,
            MsFlags::empty(),
        )
    }

    #[test]
    fn creates_every_missing_component() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c");
        mkdir_p(&target, 0o755).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x/y");
        mkdir_p(&target, 0o755).unwrap();
        mkdir_p(&target, 0o755).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn rejects_relative_paths() {
        assert!(matches!(
            mkdir_p(Path::new("relative/path"), 0o755),
            Err(BootError::Stage(_))
        ));
    }

    #[test]
    fn existing_file_in_the_way_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        assert!(mkdir_p(&blocker, 0o755).is_err());
        assert!(mkdir_p(&blocker.join("below"), 0o755).is_err());
    }

    #[test]
    fn failed_mount_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let entry = entry_under(dir.path(), "mnt");
        ensure_mounted(&entry).unwrap();
        assert!(dir.path().join("mnt").is_dir());
    }

    #[test]
    fn staging_continues_past_failed_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let table = vec![entry_under(dir.path(), "first"), entry_under(dir.path(), "second")];
        stage_all(&table).unwrap();
        assert!(dir.path().join("first").is_dir());
        assert!(dir.path().join("second").is_dir());
    }

    #[test]
    fn staging_stops_on_broken_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("broken");
        fs::write(&blocker, b"file").unwrap();

        let table = vec![
            MountEntry::new(
                "tmpfs",
                blocker.join("mnt").to_str().unwrap(),
                "traceboot-nofs",
                None,
                MsFlags::empty(),
            ),
            entry_under(dir.path(), "later"),
        ];
        assert!(stage_all(&table).is_err());
        assert!(!dir.path().join("later").exists());
    }
}
