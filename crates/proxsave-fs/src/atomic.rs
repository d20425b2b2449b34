//! Atomic write-then-rename primitive.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn tmp_path_for(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{file_name}.proxsave.tmp.{nanos}"))
}

/// Ensure `dir` exists, inheriting owner/perm from the nearest existing
/// ancestor for any directory this call creates. Already-present
/// directories are left untouched.
fn ensure_parent_inherited(dir: &Path) -> anyhow::Result<()> {
    if dir.exists() {
        return Ok(());
    }

    let mut to_create = Vec::new();
    let mut cursor = dir;
    loop {
        to_create.push(cursor.to_path_buf());
        match cursor.parent() {
            Some(parent) if !parent.exists() => cursor = parent,
            Some(parent) => {
                to_create.push(parent.to_path_buf());
                break;
            }
            None => break,
        }
    }
    to_create.dedup();
    // to_create is deepest-first with the existing ancestor last; reverse
    // to create top-down so `inherited` always describes an existing dir.
    to_create.reverse();

    let ancestor = to_create.first().cloned().unwrap_or_else(|| dir.to_path_buf());
    let inherited = fs::metadata(&ancestor).ok();

    for candidate in to_create.into_iter().skip(1) {
        if candidate.exists() {
            continue;
        }
        fs::create_dir(&candidate)?;
        if let Some(meta) = &inherited {
            apply_owner_and_perm(&candidate, meta)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn apply_owner_and_perm(path: &Path, inherited: &fs::Metadata) -> anyhow::Result<()> {
    use std::os::unix::fs::{MetadataExt as _, PermissionsExt as _};

    fs::set_permissions(path, fs::Permissions::from_mode(inherited.mode()))?;
    if unsafe { libc_geteuid() } == 0 {
        let uid = inherited.uid();
        let gid = inherited.gid();
        let _ = nix::unistd::chown(
            path,
            Some(nix::unistd::Uid::from_raw(uid)),
            Some(nix::unistd::Gid::from_raw(gid)),
        );
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_owner_and_perm(_path: &Path, _inherited: &fs::Metadata) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(unix)]
unsafe fn libc_geteuid() -> u32 {
    nix::unistd::geteuid().as_raw()
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> anyhow::Result<()> {
    let dir_file = File::open(dir)?;
    dir_file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> anyhow::Result<()> {
    Ok(())
}

/// write_file_atomic contract, steps 1-5.
pub fn write_file_atomic(path: &Path, data: &[u8], perm: u32) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    ensure_parent_inherited(parent)?;

    let tmp = tmp_path_for(path);
    let result = (|| -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        set_mode_0600(&tmp)?;

        file.write_all(data)?;

        #[cfg(unix)]
        {
            if unsafe { libc_geteuid() } == 0 {
                if let Ok(meta) = fs::metadata(parent) {
                    use std::os::unix::fs::MetadataExt as _;
                    let _ = nix::unistd::fchown(
                        &file,
                        Some(nix::unistd::Uid::from_raw(meta.uid())),
                        Some(nix::unistd::Gid::from_raw(meta.gid())),
                    );
                }
            }
        }

        set_mode(&tmp, perm)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, path)?;
        fsync_dir(parent)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(unix)]
fn set_mode_0600(path: &Path) -> anyhow::Result<()> {
    set_mode(path, 0o600)
}

#[cfg(not(unix))]
fn set_mode_0600(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, perm: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    fs::set_permissions(path, fs::Permissions::from_mode(perm))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _perm: u32) -> anyhow::Result<()> {
    Ok(())
}

/// Rename with a copy+unlink fallback for cross-device moves. Never used
/// inside `write_file_atomic` itself: only explicit callers
/// that need to move a file across filesystems (e.g. moving a downloaded
/// candidate from a staging tmpfs onto the backup volume) opt into it.
pub fn move_file_safe(from: &Path, to: &Path) -> anyhow::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}
