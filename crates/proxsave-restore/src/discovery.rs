//! Finding restorable bundles, locally or on a remote tier, and turning
//! them into the ordered candidate list the UI presents.

use std::path::{Path, PathBuf};
use std::time::Duration;

use proxsave_cmd::{CommandRunner, Invocation, RunContext};
use proxsave_core::manifest::Manifest;
use proxsave_storage::tier::rclone::is_rclone_reference;
use serde::Deserialize;
use tracing::warn;

/// Where a discovered candidate's bytes actually live.
#[derive(Debug, Clone)]
pub enum CandidateLocation {
    Local(PathBuf),
    Remote { remote_ref: String, name: String },
}

#[derive(Debug, Clone)]
pub struct DiscoveredCandidate {
    pub archive_basename: String,
    pub manifest: Manifest,
    pub location: CandidateLocation,
    pub checksum_missing: bool,
}

/// Reports non-fatal discovery warnings to whatever is driving the scan
/// (a UI progress line, a log sink, or nothing in tests).
pub trait DiscoveryProgress: Send + Sync {
    fn warn(&self, message: &str);
}

pub struct SilentProgress;
impl DiscoveryProgress for SilentProgress {
    fn warn(&self, _message: &str) {}
}

/// Scans a local directory once and classifies every entry:
/// `*.bundle.tar` files are inspected directly; a lone `*.metadata` with
/// a sibling archive is accepted with a checksum-missing warning when no
/// `.sha256` sidecar exists. Duplicate archive bases are suppressed;
/// the result is sorted by `manifest.created_at` descending.
pub fn discover_candidates(root: &Path) -> anyhow::Result<Vec<DiscoveredCandidate>> {
    discover_candidates_with_progress(root, &SilentProgress)
}

pub fn discover_candidates_with_progress(
    root: &Path,
    progress: &dyn DiscoveryProgress,
) -> anyhow::Result<Vec<DiscoveredCandidate>> {
    let mut seen_bases = std::collections::BTreeSet::new();
    let mut out = Vec::new();

    let entries = match std::fs::read_dir(root) {
        Ok(e) => e,
        Err(e) => anyhow::bail!("cannot read {}: {e}", root.display()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let name = path.file_name().unwrap().to_string_lossy().to_string();

        if name.ends_with(".bundle.tar") {
            if !seen_bases.insert(name.clone()) {
                continue;
            }
            match load_bundle_manifest(&path) {
                Ok(manifest) => out.push(DiscoveredCandidate {
                    archive_basename: name,
                    manifest,
                    location: CandidateLocation::Local(path.clone()),
                    checksum_missing: false,
                }),
                Err(e) => {
                    progress.warn(&format!("skipping unreadable bundle {}: {e}", path.display()));
                }
            }
            continue;
        }

        if name.ends_with(".metadata") {
            let base = name.trim_end_matches(".metadata").to_string();
            if seen_bases.contains(&base) {
                continue;
            }
            let archive_path = root.join(&base);
            if !archive_path.exists() {
                continue;
            }
            let sidecar = root.join(format!("{base}.sha256"));
            match load_metadata_file(&path) {
                Ok(manifest) => {
                    seen_bases.insert(base.clone());
                    out.push(DiscoveredCandidate {
                        archive_basename: base,
                        manifest,
                        location: CandidateLocation::Local(archive_path),
                        checksum_missing: !sidecar.exists(),
                    });
                }
                Err(e) => {
                    progress.warn(&format!("skipping unreadable metadata {}: {e}", path.display()));
                }
            }
        }
    }

    out.sort_by(|a, b| b.manifest.created_at.cmp(&a.manifest.created_at));
    Ok(out)
}

fn load_bundle_manifest(bundle_path: &Path) -> anyhow::Result<Manifest> {
    let file = std::fs::File::open(bundle_path)?;
    let value = proxsave_core::bundle::inspect_bundle_manifest(file)?;
    Ok(Manifest::from_json(value)?)
}

fn load_metadata_file(metadata_path: &Path) -> anyhow::Result<Manifest> {
    let bytes = std::fs::read(metadata_path)?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    Ok(Manifest::from_json(value)?)
}

#[derive(Debug, Deserialize)]
struct RcloneLsJsonEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "IsDir")]
    is_dir: bool,
}

/// Lists a remote's bundle files with a bounded per-call timeout and
/// `cat`s each one through `inspect_bundle_manifest`. A timeout on any
/// single call is reported as a warning and that candidate is skipped;
/// the whole scan only aborts when zero candidates were recovered.
pub async fn discover_rclone_backups(
    ctx: &RunContext,
    runner: &dyn CommandRunner,
    remote_ref: &str,
    per_call_timeout: Duration,
    progress: &dyn DiscoveryProgress,
) -> anyhow::Result<Vec<DiscoveredCandidate>> {
    let list_invocation = Invocation::new("rclone", vec!["lsjson".into(), remote_ref.to_string()]);
    let list_run = tokio::time::timeout(per_call_timeout, runner.run(ctx, &list_invocation)).await;
    let list_out = match list_run {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => anyhow::bail!("rclone lsjson failed: {e}"),
        Err(_) => anyhow::bail!(
            "rclone lsjson timed out after {:?}",
            per_call_timeout
        ),
    };
    let entries: Vec<RcloneLsJsonEntry> = serde_json::from_slice(&list_out.bytes)?;

    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for entry in entries {
        if entry.is_dir || !entry.name.ends_with(".bundle.tar") {
            continue;
        }
        if !seen.insert(entry.name.clone()) {
            continue;
        }

        let cat_invocation = Invocation::new(
            "rclone",
            vec!["cat".into(), format!("{}/{}", remote_ref.trim_end_matches('/'), entry.name)],
        );
        let cat_run = tokio::time::timeout(per_call_timeout, runner.run(ctx, &cat_invocation)).await;
        let bytes = match cat_run {
            Ok(Ok(out)) => out.bytes,
            Ok(Err(e)) => {
                progress.warn(&format!("failed to read {}: {e}", entry.name));
                continue;
            }
            Err(_) => {
                progress.warn(&format!("timed out reading {}", entry.name));
                continue;
            }
        };

        match proxsave_core::bundle::inspect_bundle_manifest(std::io::Cursor::new(bytes)) {
            Ok(value) => match Manifest::from_json(value) {
                Ok(manifest) => out.push(DiscoveredCandidate {
                    archive_basename: entry.name.clone(),
                    manifest,
                    location: CandidateLocation::Remote {
                        remote_ref: remote_ref.to_string(),
                        name: entry.name,
                    },
                    checksum_missing: false,
                }),
                Err(e) => progress.warn(&format!("malformed manifest for {}: {e}", entry.name)),
            },
            Err(e) => progress.warn(&format!("malformed bundle {}: {e}", entry.name)),
        }
    }

    if out.is_empty() && seen.is_empty() {
        warn!(remote = %remote_ref, "no bundles found on remote");
    }

    out.sort_by(|a, b| b.manifest.created_at.cmp(&a.manifest.created_at));
    Ok(out)
}

/// Source configuration the UI presents as a pick list, per-tier.
pub struct SourceConfig {
    pub local_dir: Option<PathBuf>,
    pub secondary_dir: Option<PathBuf>,
    pub cloud_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOption {
    Local(PathBuf),
    Secondary(PathBuf),
    CloudRemote(String),
    CloudPath(PathBuf),
}

impl SourceOption {
    pub fn label(&self) -> String {
        match self {
            SourceOption::Local(_) => "Local".to_string(),
            SourceOption::Secondary(_) => "Secondary".to_string(),
            SourceOption::CloudRemote(r) => format!("Cloud ({r})"),
            SourceOption::CloudPath(_) => "Cloud".to_string(),
        }
    }
}

/// Builds the logical source list the UI shows, distinguishing an
/// rclone-style remote reference from an absolute filesystem path.
pub fn build_decrypt_path_options(cfg: &SourceConfig) -> Vec<SourceOption> {
    let mut options = Vec::new();
    if let Some(dir) = &cfg.local_dir {
        options.push(SourceOption::Local(dir.clone()));
    }
    if let Some(dir) = &cfg.secondary_dir {
        options.push(SourceOption::Secondary(dir.clone()));
    }
    if let Some(cloud) = &cfg.cloud_ref {
        if is_rclone_reference(cloud) {
            options.push(SourceOption::CloudRemote(cloud.clone()));
        } else {
            options.push(SourceOption::CloudPath(PathBuf::from(cloud)));
        }
    }
    options
}
