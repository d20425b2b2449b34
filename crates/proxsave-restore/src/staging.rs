//! Staging directory lifecycle and archive-entry hardening for phase 5-6
//! of the restore workflow: a fresh stage root is registered in the
//! crash-safe temp-dir registry before a single archive byte is written,
//! so a crash mid-extract still leaves something `cleanup_orphaned` can
//! reclaim.

use std::path::{Path, PathBuf};

use proxsave_core::clock::Clock;
use proxsave_core::tempreg::TempDirRegistry;
use tar::Archive;
use tracing::warn;

pub const APP_NAME: &str = "proxsave";

/// Paths that must never be overwritten by an extract targeting `/`, even
/// if a category's path list would otherwise match them. Static and
/// deliberately narrow: broader protection is the job of the category
/// registry's path lists, not this list.
pub const SENSITIVE_EXCLUDES: &[&str] = &[
    "./etc/shadow",
    "./etc/gshadow",
    "./etc/passwd",
    "./etc/group",
];

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("archive entry has an absolute path: {0}")]
    AbsolutePath(String),
    #[error("archive entry escapes the stage root via `..`: {0}")]
    PathTraversal(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// `/tmp/<app>/restore-stage-<ts>_pid<pid>_<seq>`, mode `0700`. Creating
/// and registering happen together: a stage root that exists but was
/// never registered would be invisible to `cleanup_orphaned`.
pub fn create_stage_root(clock: &dyn Clock, registry: &TempDirRegistry) -> anyhow::Result<PathBuf> {
    let now = clock.now();
    let seq = clock.next_seq();
    let pid = std::process::id();
    let dir = std::env::temp_dir().join(APP_NAME).join(format!(
        "restore-stage-{}_pid{pid}_{seq}",
        now.format("%Y%m%d-%H%M%S")
    ));
    std::fs::create_dir_all(&dir)?;
    set_mode_0700(&dir)?;
    registry.register(&dir, clock)?;
    Ok(dir)
}

#[cfg(unix)]
fn set_mode_0700(dir: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode_0700(_dir: &Path) -> anyhow::Result<()> {
    Ok(())
}

fn entry_path_is_safe(path: &str) -> Result<(), StagingError> {
    if path.starts_with('/') {
        return Err(StagingError::AbsolutePath(path.to_string()));
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err(StagingError::PathTraversal(path.to_string()));
    }
    Ok(())
}

/// Extracts `archive` into `stage_dir`, preserving paths and symlinks
/// unchanged but rejecting absolute paths and `..` traversal per entry.
/// When `restoring_onto_root` is set, entries matching
/// [`SENSITIVE_EXCLUDES`] are skipped with a warning rather than
/// extracted, since this path is reached both for a plain staging extract
/// and (via [`crate::executor`]) for files about to be copied onto `/`.
pub fn extract_archive<R: std::io::Read>(
    archive: R,
    stage_dir: &Path,
    restoring_onto_root: bool,
    is_cancelled: &dyn Fn() -> bool,
) -> Result<Vec<String>, StagingError> {
    let mut tar = Archive::new(archive);
    tar.set_preserve_permissions(true);
    tar.set_unpack_xattrs(false);

    let mut extracted = Vec::new();
    for entry in tar.entries()? {
        if is_cancelled() {
            break;
        }
        let mut entry = entry?;
        let raw_path = entry.path()?.to_string_lossy().to_string();
        entry_path_is_safe(&raw_path)?;

        let normalized = proxsave_core::category::normalize_archive_path(&raw_path)
            .unwrap_or_else(|| format!("./{raw_path}"));
        if restoring_onto_root && SENSITIVE_EXCLUDES.contains(&normalized.as_str()) {
            warn!(path = %normalized, "skipping sensitive path while restoring onto /");
            continue;
        }

        entry.unpack_in(stage_dir)?;
        extracted.push(normalized);
    }
    Ok(extracted)
}
