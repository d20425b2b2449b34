//! Fstab merge repair: reconciles the archive's `/etc/fstab` against the
//! live one, remapping unstable device nodes and adding only mounts
//! judged safe to auto-add.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use proxsave_cmd::{CommandRunner, Invocation, RunContext};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub options: String,
    pub dump: u32,
    pub pass: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FstabLine {
    Entry(FstabEntry),
    Verbatim(String),
}

/// Line-preserving parse: comments and blank lines round-trip unchanged,
/// malformed entries (fewer than 4 fields) fall back to verbatim too.
pub fn parse_fstab(text: &str) -> Vec<FstabLine> {
    text.lines()
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return FstabLine::Verbatim(line.to_string());
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() < 4 {
                return FstabLine::Verbatim(line.to_string());
            }
            FstabLine::Entry(FstabEntry {
                device: fields[0].to_string(),
                mountpoint: fields[1].to_string(),
                fstype: fields[2].to_string(),
                options: fields[3].to_string(),
                dump: fields.get(4).and_then(|s| s.parse().ok()).unwrap_or(0),
                pass: fields.get(5).and_then(|s| s.parse().ok()).unwrap_or(0),
            })
        })
        .collect()
}

pub fn serialize_fstab(lines: &[FstabLine]) -> String {
    let mut out = String::new();
    for line in lines {
        match line {
            FstabLine::Verbatim(raw) => {
                out.push_str(raw);
                out.push('\n');
            }
            FstabLine::Entry(e) => {
                out.push_str(&format!(
                    "{}\t{}\t{}\t{}\t{}\t{}\n",
                    e.device, e.mountpoint, e.fstype, e.options, e.dump, e.pass
                ));
            }
        }
    }
    out
}

const CRITICAL_MOUNTPOINTS: &[&str] = &["/", "/boot", "/boot/efi", "/usr"];

pub fn is_critical_mountpoint(mountpoint: &str) -> bool {
    CRITICAL_MOUNTPOINTS.contains(&mountpoint)
}

pub fn is_network_mount(entry: &FstabEntry) -> bool {
    matches!(entry.fstype.as_str(), "nfs" | "nfs4" | "cifs")
        || entry.device.starts_with("//")
        || (!entry.device.starts_with('/') && entry.device.contains(":/"))
}

fn device_is_stable(live_root: &Path, device: &str) -> bool {
    for (prefix, dirname) in [("UUID=", "by-uuid"), ("PARTUUID=", "by-partuuid"), ("LABEL=", "by-label")] {
        if let Some(value) = device.strip_prefix(prefix) {
            return live_root.join("dev/disk").join(dirname).join(value).exists();
        }
    }
    false
}

#[derive(Debug, Deserialize)]
struct BlockDeviceRecord {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    partuuid: Option<String>,
}

/// Sidecar inventory shape: `{"/dev/sda1": {"uuid": "...", ...}}`, carried
/// by the archive as `host_inventory`'s `blk-inventory.json`.
fn load_block_inventory(stage_root: &Path) -> BTreeMap<String, BlockDeviceRecord> {
    let path = stage_root.join("var/lib/proxsave/blk-inventory.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return BTreeMap::new();
    };
    serde_json::from_slice(&bytes).unwrap_or_default()
}

/// Rewrites `/dev/sdX`-style device nodes in the backup's entries to a
/// stable reference when the sidecar inventory has one, preferring
/// `UUID=`, then `PARTUUID=`, then `LABEL=`.
fn remap_unstable_devices(lines: &mut [FstabLine], inventory: &BTreeMap<String, BlockDeviceRecord>) {
    for line in lines.iter_mut() {
        let FstabLine::Entry(entry) = line else { continue };
        if !entry.device.starts_with("/dev/") {
            continue;
        }
        let Some(record) = inventory.get(&entry.device) else {
            continue;
        };
        if let Some(uuid) = &record.uuid {
            entry.device = format!("UUID={uuid}");
        } else if let Some(partuuid) = &record.partuuid {
            entry.device = format!("PARTUUID={partuuid}");
        } else if let Some(label) = &record.label {
            entry.device = format!("LABEL={label}");
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FstabMergeAnalysis {
    pub safe_to_add: Vec<FstabEntry>,
    pub skipped_critical: Vec<String>,
    pub root_matches: bool,
    pub swap_matches: bool,
}

fn find_entry<'a>(lines: &'a [FstabLine], mountpoint: &str) -> Option<&'a FstabEntry> {
    lines.iter().find_map(|l| match l {
        FstabLine::Entry(e) if e.mountpoint == mountpoint => Some(e),
        _ => None,
    })
}

fn find_swap(lines: &[FstabLine]) -> Option<&FstabEntry> {
    lines.iter().find_map(|l| match l {
        FstabLine::Entry(e) if e.fstype == "swap" => Some(e),
        _ => None,
    })
}

fn normalize_options(entry: &mut FstabEntry) {
    let mut opts: Vec<String> = entry.options.split(',').filter(|o| !o.is_empty()).map(str::to_string).collect();
    if !opts.iter().any(|o| o == "nofail") {
        opts.push("nofail".to_string());
    }
    if is_network_mount(entry) && !opts.iter().any(|o| o == "_netdev") {
        opts.push("_netdev".to_string());
    }
    entry.options = opts.join(",");
}

/// Pure analysis step: parses both fstabs, remaps unstable backup devices,
/// and classifies every backup-only mountpoint as safe-to-add or skipped.
pub fn analyze_fstab_merge(
    current_text: &str,
    backup_text: &str,
    stage_root: &Path,
    live_root: &Path,
) -> FstabMergeAnalysis {
    let current_lines = parse_fstab(current_text);
    let mut backup_lines = parse_fstab(backup_text);
    let inventory = load_block_inventory(stage_root);
    remap_unstable_devices(&mut backup_lines, &inventory);

    let mut analysis = FstabMergeAnalysis::default();

    let current_swap = find_swap(&current_lines);
    let backup_swap = find_swap(&backup_lines);
    analysis.swap_matches = match (current_swap, backup_swap) {
        (Some(a), Some(b)) => a.device == b.device,
        (None, None) => true,
        _ => false,
    };

    let current_root = find_entry(&current_lines, "/");
    let backup_root = find_entry(&backup_lines, "/");
    analysis.root_matches = matches!((current_root, backup_root), (Some(a), Some(b)) if a.device == b.device);

    let existing_mountpoints: BTreeSet<&str> = current_lines
        .iter()
        .filter_map(|l| match l {
            FstabLine::Entry(e) => Some(e.mountpoint.as_str()),
            _ => None,
        })
        .collect();

    for line in &backup_lines {
        let FstabLine::Entry(entry) = line else { continue };
        if existing_mountpoints.contains(entry.mountpoint.as_str()) {
            continue;
        }
        if is_critical_mountpoint(&entry.mountpoint) || entry.fstype == "swap" {
            analysis.skipped_critical.push(entry.mountpoint.clone());
            continue;
        }
        if is_network_mount(entry) || device_is_stable(live_root, &entry.device) {
            let mut candidate = entry.clone();
            normalize_options(&mut candidate);
            analysis.safe_to_add.push(candidate);
        }
    }

    analysis
}

/// Analyzes, writes a timestamped backup of the live fstab, merges in
/// every safe-to-add entry, writes the result atomically, and reloads
/// systemd's unit cache best-effort. A missing staged fstab (the category
/// wasn't part of this restore) is not an error: analysis is simply empty.
pub async fn smart_merge_fstab(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    stage_root: &Path,
    live_root: &Path,
) -> anyhow::Result<FstabMergeAnalysis> {
    let backup_path = stage_root.join("etc/fstab");
    let Ok(backup_text) = std::fs::read_to_string(&backup_path) else {
        return Ok(FstabMergeAnalysis::default());
    };

    let live_path = live_root.join("etc/fstab");
    let current_text = std::fs::read_to_string(&live_path).unwrap_or_default();

    let analysis = analyze_fstab_merge(&current_text, &backup_text, stage_root, live_root);
    if analysis.safe_to_add.is_empty() {
        return Ok(analysis);
    }

    let ts = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let backup_of_live = live_root.join(format!("etc/fstab.proxsave-{ts}.bak"));
    if let Ok(bytes) = std::fs::read(&live_path) {
        let _ = std::fs::write(&backup_of_live, bytes);
    }

    let mut merged_lines = parse_fstab(&current_text);
    for entry in &analysis.safe_to_add {
        merged_lines.push(FstabLine::Entry(entry.clone()));
    }
    proxsave_fs::atomic::write_file_atomic(&live_path, serialize_fstab(&merged_lines).as_bytes(), 0o644)?;

    let invocation = Invocation::new("systemctl", vec!["daemon-reload".to_string()]);
    if let Err(e) = runner.run(ctx, &invocation).await {
        warn!(error = %e, "systemctl daemon-reload failed after fstab merge");
    }

    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxsave_cmd::fake::FakeRunner;

    #[test]
    fn parse_and_serialize_round_trips_comments_and_entries() {
        let text = "# a comment\n\nUUID=abc / ext4 defaults 0 1\n";
        let lines = parse_fstab(text);
        assert_eq!(serialize_fstab(&lines), "# a comment\n\nUUID=abc\t/\text4\tdefaults\t0\t1\n");
    }

    #[test]
    fn network_mount_is_detected_by_fstype_or_syntax() {
        let nfs = FstabEntry {
            device: "nfs-host:/export".to_string(),
            mountpoint: "/mnt/nfs".to_string(),
            fstype: "nfs".to_string(),
            options: "defaults".to_string(),
            dump: 0,
            pass: 0,
        };
        assert!(is_network_mount(&nfs));

        let cifs = FstabEntry {
            device: "//host/share".to_string(),
            mountpoint: "/mnt/cifs".to_string(),
            fstype: "cifs".to_string(),
            options: "defaults".to_string(),
            dump: 0,
            pass: 0,
        };
        assert!(is_network_mount(&cifs));
    }

    #[test]
    fn critical_and_swap_mountpoints_are_never_auto_added() {
        let current = "UUID=root / ext4 defaults 0 1\n";
        let backup = "UUID=root / ext4 defaults 0 1\nUUID=boot /boot ext4 defaults 0 2\n/dev/sda2 none swap sw 0 0\n";
        let tmp = tempfile::tempdir().unwrap();

        let analysis = analyze_fstab_merge(current, backup, tmp.path(), tmp.path());
        assert!(analysis.safe_to_add.is_empty());
        assert!(analysis.skipped_critical.contains(&"/boot".to_string()));
    }

    #[test]
    fn network_mount_absent_locally_is_safe_to_add_with_normalized_options() {
        let current = "UUID=root / ext4 defaults 0 1\n";
        let backup = "UUID=root / ext4 defaults 0 1\nnfs-host:/export /mnt/data nfs defaults 0 0\n";
        let tmp = tempfile::tempdir().unwrap();

        let analysis = analyze_fstab_merge(current, backup, tmp.path(), tmp.path());
        assert_eq!(analysis.safe_to_add.len(), 1);
        assert!(analysis.safe_to_add[0].options.contains("_netdev"));
        assert!(analysis.safe_to_add[0].options.contains("nofail"));
    }

    #[test]
    fn unstable_device_without_matching_by_uuid_link_is_not_safe() {
        let current = "UUID=root / ext4 defaults 0 1\n";
        let backup = "UUID=root / ext4 defaults 0 1\nUUID=data-uuid /mnt/data ext4 defaults 0 2\n";
        let tmp = tempfile::tempdir().unwrap();

        let analysis = analyze_fstab_merge(current, backup, tmp.path(), tmp.path());
        assert!(analysis.safe_to_add.is_empty());
    }

    #[test]
    fn stable_device_with_matching_by_uuid_link_is_safe() {
        let current = "UUID=root / ext4 defaults 0 1\n";
        let backup = "UUID=root / ext4 defaults 0 1\nUUID=data-uuid /mnt/data ext4 defaults 0 2\n";
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("dev/disk/by-uuid")).unwrap();
        std::fs::write(tmp.path().join("dev/disk/by-uuid/data-uuid"), b"").unwrap();

        let analysis = analyze_fstab_merge(current, backup, tmp.path(), tmp.path());
        assert_eq!(analysis.safe_to_add.len(), 1);
        assert_eq!(analysis.safe_to_add[0].mountpoint, "/mnt/data");
    }

    #[test]
    fn remap_prefers_uuid_then_partuuid_then_label() {
        let current = "UUID=root / ext4 defaults 0 1\n";
        let backup = "UUID=root / ext4 defaults 0 1\n/dev/sdb1 /mnt/extra ext4 defaults 0 2\n";
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("var/lib/proxsave")).unwrap();
        std::fs::write(
            tmp.path().join("var/lib/proxsave/blk-inventory.json"),
            br#"{"/dev/sdb1": {"uuid": "abcd-1234"}}"#,
        )
        .unwrap();
        std::fs::create_dir_all(tmp.path().join("dev/disk/by-uuid")).unwrap();
        std::fs::write(tmp.path().join("dev/disk/by-uuid/abcd-1234"), b"").unwrap();

        let analysis = analyze_fstab_merge(current, backup, tmp.path(), tmp.path());
        assert_eq!(analysis.safe_to_add.len(), 1);
        assert_eq!(analysis.safe_to_add[0].device, "UUID=abcd-1234");
    }

    #[tokio::test]
    async fn smart_merge_writes_backup_and_merged_fstab_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("etc")).unwrap();
        std::fs::write(tmp.path().join("etc/fstab"), "UUID=root / ext4 defaults 0 1\n").unwrap();

        let stage = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(stage.path().join("etc")).unwrap();
        std::fs::write(
            stage.path().join("etc/fstab"),
            "UUID=root / ext4 defaults 0 1\nnfs-host:/export /mnt/data nfs defaults 0 0\n",
        )
        .unwrap();

        let runner = FakeRunner::new();
        runner.script_success("systemctl", vec![]);
        let ctx = RunContext::new();

        let analysis = smart_merge_fstab(&runner, &ctx, stage.path(), tmp.path()).await.unwrap();
        assert_eq!(analysis.safe_to_add.len(), 1);

        let merged = std::fs::read_to_string(tmp.path().join("etc/fstab")).unwrap();
        assert!(merged.contains("/mnt/data"));

        let backups: Vec<_> = std::fs::read_dir(tmp.path().join("etc"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("proxsave-"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn missing_staged_fstab_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let stage = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let ctx = RunContext::new();

        let analysis = smart_merge_fstab(&runner, &ctx, stage.path(), tmp.path()).await.unwrap();
        assert!(analysis.safe_to_add.is_empty());
    }
}
