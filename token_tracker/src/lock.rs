/// lock.rs — Single-instance guard
///
/// Two trackers sharing a state file would overwrite each other's snapshot,
/// so the tracker takes `<state_file>.lock` (holding its PID) before loading
/// state.  A lock left behind by a dead process is replaced.  The file is
/// removed when the guard is dropped.
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Lock file guarding `state_file`.
    pub fn path_for(state_file: &Path) -> PathBuf {
        state_file.with_extension("lock")
    }

    pub fn acquire(state_file: &Path) -> Result<Self> {
        let path = Self::path_for(state_file);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        // One retry: the first attempt may find a stale lock and clear it.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Acquired instance lock {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = fs::read_to_string(&path)
                        .ok()
                        .and_then(|s| s.trim().parse::<u32>().ok());
                    match holder {
                        Some(pid) if process_alive(pid) => bail!(
                            "Another tracker is already running (PID {pid}). \
                             If it is not, delete {}",
                            path.display()
                        ),
                        Some(pid) => warn!("Removing stale lock from PID {pid}"),
                        None => warn!("Removing unreadable lock file {}", path.display()),
                    }
                    if let Err(e) = fs::remove_file(&path) {
                        if e.kind() != ErrorKind::NotFound {
                            return Err(e).with_context(|| format!("Failed to remove {}", path.display()));
                        }
                    }
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()));
                }
            }
        }
        bail!("Could not acquire {}: another process keeps taking it", path.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Released instance lock {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", self.path.display()),
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a cheap liveness check, assume the holder is alive.
#[cfg(not(target_os = "linux"))]
fn process_alive(pid: u32) -> bool {
    pid != 0
}
