//! The backup-run lock: a single advisory-locked file under `backup_dir`
//! that prevents two backup runs from racing on the same directory.
//! Mirrors the locking style of `proxsave_core::tempreg` (fs2 exclusive
//! lock over a small file), but this lock is held for the run's whole
//! lifetime rather than only a critical section.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs2::FileExt as _;

pub struct BackupLock {
    path: PathBuf,
    file: Option<File>,
}

impl BackupLock {
    /// Acquire the lock at `<backup_dir>/.backup.lock`. A lock file older
    /// than `stale_after` is treated as abandoned (e.g. left by a crashed
    /// run) and is removed before the new acquisition attempt.
    pub fn acquire(backup_dir: &Path, stale_after: Duration) -> anyhow::Result<Self> {
        fs::create_dir_all(backup_dir)?;
        let path = backup_dir.join(".backup.lock");

        if let Ok(meta) = fs::metadata(&path) {
            if let Ok(modified) = meta.modified() {
                if SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or_default()
                > stale_after
                {
                    let _ = fs::remove_file(&path);
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| anyhow::anyhow!("backup lock held by another run: {}", path.display()))?;
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;

        Ok(Self { path, file: Some(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BackupLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs2::FileExt::unlock(&file);
        }
        let _ = fs::remove_file(&self.path);
    }
}
