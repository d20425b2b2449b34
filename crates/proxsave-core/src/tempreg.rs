//! Crash-safe temp-directory registry.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt as _;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TempDirRecord {
    pub path: PathBuf,
    pub pid: u32,
    pub created_at: DateTime<Utc>,
}

pub struct TempDirRegistry {
    registry_path: PathBuf,
}

const ENV_OVERRIDE: &str = "TEMP_DIR_REGISTRY_PATH";

impl TempDirRegistry {
    /// Resolve the registry path: `TEMP_DIR_REGISTRY_PATH` env override,
    /// else `/var/run/<app>/temp-dirs.json`, falling back to
    /// `<tmp>/<app>/temp-dirs.json`.
    pub fn resolve_path(app: &str) -> PathBuf {
        if let Ok(path) = std::env::var(ENV_OVERRIDE) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        let preferred = PathBuf::from("/var/run").join(app).join("temp-dirs.json");
        if let Some(parent) = preferred.parent() {
            if std::fs::create_dir_all(parent).is_ok() {
                return preferred;
            }
        }

        std::env::temp_dir().join(app).join("temp-dirs.json")
    }

    pub fn new(registry_path: PathBuf) -> Self {
        Self { registry_path }
    }

    fn with_locked_file<R>(
        &self,
        f: impl FnOnce(&mut Vec<TempDirRecord>) -> R,
    ) -> Result<R, std::io::Error> {
        if let Some(parent) = self.registry_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.registry_path)?;
        file.lock_exclusive()?;

        let result = (|| {
            let mut buf = String::new();
            file.read_to_string(&mut buf)?;
            let mut records: Vec<TempDirRecord> = if buf.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&buf).unwrap_or_default()
            };

            let out = f(&mut records);

            let serialized = serde_json::to_string_pretty(&records)?;
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(serialized.as_bytes())?;
            file.sync_all()?;
            Ok::<_, std::io::Error>(out)
        })();

        let _ = fs2::FileExt::unlock(&file);
        result
    }

    pub fn register(&self, dir: &Path, clock: &dyn Clock) -> Result<(), std::io::Error> {
        let record = TempDirRecord {
            path: dir.to_path_buf(),
            pid: std::process::id(),
            created_at: clock.now(),
        };
        self.with_locked_file(|records| {
            records.retain(|r| r.path != record.path);
            records.push(record);
        })
    }

    pub fn deregister(&self, dir: &Path) -> Result<(), std::io::Error> {
        self.with_locked_file(|records| {
            records.retain(|r| r.path != dir);
        })
    }

    pub fn list(&self) -> Result<Vec<TempDirRecord>, std::io::Error> {
        self.with_locked_file(|records| records.clone())
    }

    /// `cleanup_orphaned`: an entry is orphaned iff `now - created_at >
    /// max_age` or the PID is not alive. Orphaned directories are removed
    /// recursively; a removal failure leaves the record in place so a later
    /// pass can retry.
    pub fn cleanup_orphaned(
        &self,
        max_age: Duration,
        clock: &dyn Clock,
    ) -> Result<(usize, usize), std::io::Error> {
        let now = clock.now();
        self.with_locked_file(|records| {
            let mut removed = 0usize;
            let mut failed = 0usize;
            let mut kept = Vec::with_capacity(records.len());

            for record in records.drain(..) {
                let age = now.signed_duration_since(record.created_at);
                let too_old =
                age > chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
                let dead = !process_alive(record.pid);

                if too_old || dead {
                    match std::fs::remove_dir_all(&record.path) {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => removed += 1,
                        Err(_) => {
                            failed += 1;
                            kept.push(record);
                        }
                    }
                } else {
                    kept.push(record);
                }
            }

            *records = kept;
            (removed, failed)
        })
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // EPERM means the process exists but we can't signal it: alive.
        Err(_) => true,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn registry(dir: &Path) -> TempDirRegistry {
        TempDirRegistry::new(dir.join("temp-dirs.json"))
    }

    #[test]
    fn register_and_list_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        let clock = FakeClock::new(Utc::now());

        let target = tmp.path().join("stage-1");
        std::fs::create_dir_all(&target).unwrap();
        reg.register(&target, &clock).unwrap();

        let listed = reg.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, target);
        assert_eq!(listed[0].pid, std::process::id());
    }

    #[test]
    fn deregister_removes_matching_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        let clock = FakeClock::new(Utc::now());

        let target = tmp.path().join("stage-1");
        std::fs::create_dir_all(&target).unwrap();
        reg.register(&target, &clock).unwrap();
        reg.deregister(&target).unwrap();

        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn cleanup_removes_dead_pid_regardless_of_age() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        let clock = FakeClock::new(Utc::now());

        let target = tmp.path().join("stage-dead");
        std::fs::create_dir_all(&target).unwrap();

        // Hand-craft a record with a PID that is (almost certainly) dead.
        reg.with_locked_file(|records| {
            records.push(TempDirRecord {
                path: target.clone(),
                pid: u32::MAX - 1,
                created_at: clock.now(),
            });
        })
        .unwrap();

        let (removed, failed) = reg.cleanup_orphaned(Duration::from_secs(3600), &clock).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(failed, 0);
        assert!(!target.exists());
        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn cleanup_keeps_live_recent_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        let clock = FakeClock::new(Utc::now());

        let target = tmp.path().join("stage-live");
        std::fs::create_dir_all(&target).unwrap();
        reg.register(&target, &clock).unwrap();

        let (removed, failed) = reg.cleanup_orphaned(Duration::from_secs(3600), &clock).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(failed, 0);
        assert!(target.exists());
        assert_eq!(reg.list().unwrap().len(), 1);
    }

    #[test]
    fn cleanup_removes_old_entry_even_if_pid_is_self() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        let clock = FakeClock::new(Utc::now() - chrono::Duration::hours(10));

        let target = tmp.path().join("stage-old");
        std::fs::create_dir_all(&target).unwrap();
        reg.register(&target, &clock).unwrap();

        let now_clock = FakeClock::new(Utc::now());
        let (removed, _failed) = reg
            .cleanup_orphaned(Duration::from_secs(3600), &now_clock)
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!target.exists());
    }
}
