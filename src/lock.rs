//! File-based locking to prevent concurrent monitors.
//!
//! Uses flock-style advisory locking so only one `floodguard start` owns the
//! firewall rules at a time. The lock file holds the owner's PID.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub const LOCK_FILE: &str = "/run/floodguard.lock";

/// A guard that holds an exclusive lock on the FloodGuard lock file.
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct LockGuard {
    _file: File,
}

impl LockGuard {
    /// Acquire the default lock file.
    pub fn acquire() -> Result<Self> {
        Self::acquire_at(LOCK_FILE)
    }

    /// Attempt to acquire an exclusive lock on `path`.
    /// Returns an error if another instance already holds it.
    pub fn acquire_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let lock_path = path.as_ref();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).ok();
        }

        // Open without truncating: the current holder's PID must survive a failed attempt
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        fs::set_permissions(lock_path, fs::Permissions::from_mode(0o600))
            .context("Failed to set lock file permissions")?;

        file.try_lock_exclusive().map_err(|_| {
            let holder = holder_pid(lock_path)
                .map(|pid| format!(" (PID {})", pid))
                .unwrap_or_default();
            anyhow::anyhow!(
                "Another instance of FloodGuard is already running{}.\n\
                 If you believe this is an error, remove the lock file: {}",
                holder,
                lock_path.display()
            )
        })?;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        Ok(Self { _file: file })
    }
}

/// PID recorded in the lock file, if it is held by a live instance.
pub fn holder_pid<P: AsRef<Path>>(path: P) -> Option<u32> {
    let path = path.as_ref();
    let file = File::open(path).ok()?;

    // Lock obtainable means nobody holds it
    if file.try_lock_shared().is_ok() {
        let _ = file.unlock();
        return None;
    }

    fs::read_to_string(path).ok()?.trim().parse().ok()
}
