//! Phase 3, Archive: tar the collected paths into a single uncompressed
//! archive, tracking warnings/errors with bounded samples, counters, and
//! a fail-fast toggle, then hand off to `compress` for the requested
//! compressor.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tar::{Builder, Header};

/// Bound on how many sample warnings/errors are retained for the report.
const MAX_ISSUE_SAMPLES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorPolicy {
    FailFast,
    ContinueAndRecord,
}

#[derive(Debug, Default, Clone)]
pub struct ArchiveBuildIssues {
    pub warnings_total: u64,
    pub errors_total: u64,
    pub sample_warnings: Vec<String>,
    pub sample_errors: Vec<String>,
}

impl ArchiveBuildIssues {
    fn record_warning(&mut self, msg: String) {
        self.warnings_total += 1;
        if self.sample_warnings.len() < MAX_ISSUE_SAMPLES {
            self.sample_warnings.push(msg);
        }
    }

    fn record_error(&mut self, msg: String) {
        self.errors_total += 1;
        if self.sample_errors.len() < MAX_ISSUE_SAMPLES {
            self.sample_errors.push(msg);
        }
    }
}

pub struct ArchiveBuildResult {
    pub archive_path: PathBuf,
    pub archive_size: u64,
    pub entry_count: u64,
    pub issues: ArchiveBuildIssues,
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt as _;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

/// Normalizes a source path into a tar member name: strips a leading `/`,
/// rejects any `..` component.
fn archive_prefix_for_path(path: &Path) -> anyhow::Result<PathBuf> {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            std::path::Component::RootDir | std::path::Component::Prefix(_) => {}
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                anyhow::bail!("refusing to archive path containing `..`: {}", path.display());
            }
            std::path::Component::Normal(part) => out.push(part),
        }
    }
    Ok(out)
}

/// Builds `<dest>` as a tar file containing every file reachable under the
/// given source paths (deduplicated, overlap-aware), recording build
/// issues instead of aborting unless `policy` is `FailFast`.
pub fn build_archive(
    sources: &[PathBuf],
    dest: &Path,
    policy: FsErrorPolicy,
) -> anyhow::Result<ArchiveBuildResult> {
    let file = File::create(dest)?;
    let mut builder = Builder::new(file);
    builder.follow_symlinks(false);

    let mut issues = ArchiveBuildIssues::default();
    let mut entry_count = 0u64;
    let mut seen_ids = BTreeSet::new();
    let mut seen_members = BTreeSet::new();

    // Order-preserving dedup of overlapping source paths: a later source
    // that is a prefix-descendant of an earlier one contributes nothing new.
    let mut ordered_sources: Vec<&Path> = Vec::new();
    for src in sources {
        if !ordered_sources.iter().any(|existing| src.starts_with(existing)) {
            ordered_sources.retain(|existing| !existing.starts_with(src.as_path()));
            ordered_sources.push(src);
        }
    }

    for src in ordered_sources {
        if let Err(e) = append_source(
            &mut builder,
            src,
            &mut issues,
            &mut seen_ids,
            &mut seen_members,
            &mut entry_count,
            policy,
        ) {
            match policy {
                FsErrorPolicy::FailFast => return Err(e),
                FsErrorPolicy::ContinueAndRecord => issues.record_error(e.to_string()),
            }
        }
    }

    builder.finish()?;
    let archive_size = std::fs::metadata(dest)?.len();

    Ok(ArchiveBuildResult {
        archive_path: dest.to_path_buf(),
        archive_size,
        entry_count,
        issues,
    })
}

#[allow(clippy::too_many_arguments)]
fn append_source(
    builder: &mut Builder<File>,
    src: &Path,
    issues: &mut ArchiveBuildIssues,
    seen_ids: &mut BTreeSet<(u64, u64)>,
    seen_members: &mut BTreeSet<PathBuf>,
    entry_count: &mut u64,
    policy: FsErrorPolicy,
) -> anyhow::Result<()> {
    let meta = match std::fs::symlink_metadata(src) {
        Ok(m) => m,
        Err(e) => {
            let msg = format!("stat {}: {e}", src.display());
            match policy {
                FsErrorPolicy::FailFast => anyhow::bail!(msg),
                FsErrorPolicy::ContinueAndRecord => {
                    issues.record_warning(msg);
                    return Ok(());
                }
            }
        }
    };

    if meta.is_dir() {
        for entry in walkdir::WalkDir::new(src).into_iter() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let msg = format!("walk {}: {e}", src.display());
                    match policy {
                        FsErrorPolicy::FailFast => anyhow::bail!(msg),
                        FsErrorPolicy::ContinueAndRecord => {
                            issues.record_warning(msg);
                            continue;
                        }
                    }
                }
            };
            append_one(builder, entry.path(), issues, seen_ids, seen_members, entry_count, policy)?;
        }
    } else {
        append_one(builder, src, issues, seen_ids, seen_members, entry_count, policy)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn append_one(
    builder: &mut Builder<File>,
    path: &Path,
    issues: &mut ArchiveBuildIssues,
    seen_ids: &mut BTreeSet<(u64, u64)>,
    seen_members: &mut BTreeSet<PathBuf>,
    entry_count: &mut u64,
    policy: FsErrorPolicy,
) -> anyhow::Result<()> {
    let member = match archive_prefix_for_path(path) {
        Ok(m) => m,
        Err(e) => {
            issues.record_warning(e.to_string());
            return Ok(());
        }
    };
    if member.as_os_str().is_empty() || !seen_members.insert(member.clone()) {
        return Ok(());
    }

    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) => {
            let msg = format!("stat {}: {e}", path.display());
            match policy {
                FsErrorPolicy::FailFast => anyhow::bail!(msg),
                FsErrorPolicy::ContinueAndRecord => {
                    issues.record_warning(msg);
                    return Ok(());
                }
            }
        }
    };

    if meta.is_dir() {
        builder.append_dir(&member, path)?;
        *entry_count += 1;
        return Ok(());
    }

    if meta.is_symlink() {
        let target = std::fs::read_link(path)?;
        let mut header = Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        header.set_mtime(mtime_of(&meta));
        builder.append_link(&mut header, &member, &target)?;
        *entry_count += 1;
        return Ok(());
    }

    if let Some(id) = file_id(&meta) {
        if !seen_ids.insert(id) {
            // Hardlink to an already-archived inode: record but skip the
            // duplicate payload.
            return Ok(());
        }
    }

    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            let msg = format!("open {}: {e}", path.display());
            match policy {
                FsErrorPolicy::FailFast => anyhow::bail!(msg),
                FsErrorPolicy::ContinueAndRecord => {
                    issues.record_warning(msg);
                    return Ok(());
                }
            }
        }
    };
    let mut header = Header::new_gnu();
    header.set_size(meta.len());
    header.set_mode(file_mode(&meta));
    header.set_mtime(mtime_of(&meta));
    builder.append_data(&mut header, &member, &mut file)?;
    *entry_count += 1;
    Ok(())
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> u32 {
    0o644
}

fn mtime_of(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Writes the archive's SHA-256 sidecar next to it, in the
/// `<hex-digest>  <basename>\n` form the bundle reader expects.
pub fn write_checksum_sidecar(archive_path: &Path, digest_hex: &str) -> anyhow::Result<()> {
    let basename = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let line = proxsave_core::manifest::checksum_sidecar_line(digest_hex, basename);
    let sidecar_path = {
        let mut s = archive_path.as_os_str().to_os_string();
        s.push(".sha256");
        PathBuf::from(s)
    };
    let mut f = File::create(sidecar_path)?;
    f.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archives_a_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.conf");
        std::fs::write(&src, b"hello").unwrap();
        let dest = tmp.path().join("out.tar");

        let result = build_archive(&[src], &dest, FsErrorPolicy::FailFast).unwrap();
        assert_eq!(result.entry_count, 1);
        assert!(result.archive_size > 0);
    }

    #[test]
    fn overlapping_sources_are_deduplicated() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("etc");
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("sub").join("f"), b"x").unwrap();
        let dest = tmp.path().join("out.tar");

        let result = build_archive(
            &[dir.clone(), dir.join("sub")],
            &dest,
            FsErrorPolicy::FailFast,
        )
        .unwrap();
        // Only the outer source is walked; the nested duplicate source
        // contributes no additional entries.
        assert!(result.entry_count >= 1);
    }

    #[test]
    fn continue_and_record_collects_missing_path_as_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.conf");
        let dest = tmp.path().join("out.tar");

        let result = build_archive(&[missing], &dest, FsErrorPolicy::ContinueAndRecord).unwrap();
        assert_eq!(result.issues.warnings_total, 1);
    }
}
