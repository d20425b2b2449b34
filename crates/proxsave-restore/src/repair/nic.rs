//! NIC rename repair: after a restore onto different hardware (or after a
//! driver/PCI-slot change), interface names baked into
//! `/etc/network/interfaces` can no longer match what Linux assigns on
//! boot. This reconciles the archive's NIC inventory against the live
//! host's and rewrites only the names it can match with confidence.
//!
//! No `regex` dependency is available in this workspace, so token
//! substitution is hand-rolled with boundary checks instead.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use proxsave_cmd::{CommandRunner, Invocation, RunContext};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NicInfo {
    pub name: String,
    pub mac: String,
    #[serde(default)]
    pub permanent_mac: Option<String>,
    #[serde(default)]
    pub pci_path: Option<String>,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub udev_props: BTreeMap<String, String>,
    #[serde(default)]
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    PermanentMac,
    Mac,
    PciPath,
    Udev,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicMapping {
    /// The name the archive's config expects (`/etc/network/interfaces`
    /// still refers to it).
    pub target_name: String,
    /// The name the interface currently has on this host.
    pub current_name: String,
    pub method: MatchMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NicRepairPlan {
    pub safe_mappings: Vec<NicMapping>,
    pub conflicts: Vec<NicConflict>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicConflict {
    pub target_name: String,
    pub current_name: String,
    /// The current interface name(s) that already occupy `target_name`.
    pub existing: Vec<String>,
}

const STABLE_UDEV_KEYS: &[&str] = &["ID_NET_NAME_ONBOARD", "ID_NET_NAME_SLOT", "ID_NET_NAME_PATH"];

fn udev_match(a: &NicInfo, b: &NicInfo) -> bool {
    STABLE_UDEV_KEYS.iter().any(|key| match (a.udev_props.get(*key), b.udev_props.get(*key)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    })
}

fn count_macs<'a>(entries: impl Iterator<Item = &'a str>) -> HashMap<&'a str, usize> {
    let mut counts = HashMap::new();
    for mac in entries {
        *counts.entry(mac).or_insert(0) += 1;
    }
    counts
}

/// Computes the rename plan: for each backup interface, finds the best
/// current-host match by (permanent MAC, MAC, PCI path, stable udev
/// identifier), skipping MAC-based matches when that MAC is duplicated on
/// either side, and never reusing a current interface name twice.
pub fn compute_nic_mappings(backup: &[NicInfo], current: &[NicInfo]) -> NicRepairPlan {
    let backup_mac_counts = count_macs(backup.iter().map(|n| n.mac.as_str()));
    let current_mac_counts = count_macs(current.iter().map(|n| n.mac.as_str()));
    let mac_is_unique = |mac: &str| backup_mac_counts.get(mac).copied().unwrap_or(0) == 1
        && current_mac_counts.get(mac).copied().unwrap_or(0) == 1;

    let current_names: std::collections::BTreeSet<&str> = current.iter().map(|c| c.name.as_str()).collect();
    let mut used_current = std::collections::BTreeSet::new();
    let mut mappings = Vec::new();

    for b in backup {
        if b.is_virtual {
            continue;
        }
        let found = current
            .iter()
            .filter(|c| !used_current.contains(c.name.as_str()))
            .find_map(|c| {
                if let (Some(bp), Some(cp)) = (&b.permanent_mac, &c.permanent_mac) {
                    if bp == cp {
                        return Some((c, MatchMethod::PermanentMac));
                    }
                }
                None
            })
            .or_else(|| {
                current
                    .iter()
                    .filter(|c| !used_current.contains(c.name.as_str()))
                    .find(|c| c.mac == b.mac && mac_is_unique(&b.mac))
                    .map(|c| (c, MatchMethod::Mac))
            })
            .or_else(|| {
                current
                    .iter()
                    .filter(|c| !used_current.contains(c.name.as_str()))
                    .find(|c| match (&b.pci_path, &c.pci_path) {
                        (Some(bp), Some(cp)) => bp == cp,
                        _ => false,
                    })
                    .map(|c| (c, MatchMethod::PciPath))
            })
            .or_else(|| {
                current
                    .iter()
                    .filter(|c| !used_current.contains(c.name.as_str()))
                    .find(|c| udev_match(b, c))
                    .map(|c| (c, MatchMethod::Udev))
            });

        let Some((current_nic, method)) = found else {
            continue;
        };
        if current_nic.name == b.name {
            used_current.insert(current_nic.name.as_str());
            continue;
        }
        used_current.insert(current_nic.name.as_str());
        mappings.push((b.name.clone(), current_nic.name.clone(), method));
    }

    let mut plan = NicRepairPlan::default();
    for (target_name, current_name, method) in mappings {
        let existing: Vec<String> = current_names
            .iter()
            .filter(|name| **name == target_name.as_str() && **name != current_name.as_str())
            .map(|s| s.to_string())
            .collect();
        if existing.is_empty() {
            plan.safe_mappings.push(NicMapping { target_name, current_name, method });
        } else {
            plan.conflicts.push(NicConflict { target_name, current_name, existing });
        }
    }
    plan
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replaces whole-token occurrences of `old` with `new`: a match only
/// counts if neither the preceding nor following character is a word
/// character, so `eno1` is rewritten but `eno10`, `xeno1`, and `eno1_`
/// are left alone.
pub fn replace_token_boundary_aware(text: &str, old: &str, new: &str) -> String {
    if old.is_empty() {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let old_chars: Vec<char> = old.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let matches = chars[i..].starts_with(old_chars.as_slice());
        let before_ok = i == 0 || !is_word_char(chars[i - 1]);
        let after_idx = i + old_chars.len();
        let after_ok = after_idx >= chars.len() || !is_word_char(chars[after_idx]);
        if matches && before_ok && after_ok {
            out.push_str(new);
            i += old_chars.len();
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Applies every `(target_name, current_name)` substitution in a single
/// left-to-right pass, so a mapping chain (one mapping's `current_name`
/// equal to another's `target_name`, e.g. a 3-NIC renumbering) can't have
/// a later substitution re-match text a prior one just produced.
fn replace_tokens_boundary_aware(text: &str, pairs: &[(&str, &str)]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    'outer: while i < chars.len() {
        for (old, new) in pairs {
            if old.is_empty() {
                continue;
            }
            let old_chars: Vec<char> = old.chars().collect();
            let matches = chars[i..].starts_with(old_chars.as_slice());
            let before_ok = i == 0 || !is_word_char(chars[i - 1]);
            let after_idx = i + old_chars.len();
            let after_ok = after_idx >= chars.len() || !is_word_char(chars[after_idx]);
            if matches && before_ok && after_ok {
                out.push_str(new);
                i += old_chars.len();
                continue 'outer;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn rewrite_file(path: &Path, mappings: &[&NicMapping]) -> std::io::Result<bool> {
    let Ok(original) = std::fs::read_to_string(path) else {
        return Ok(false);
    };
    let pairs: Vec<(&str, &str)> = mappings.iter().map(|m| (m.target_name.as_str(), m.current_name.as_str())).collect();
    let rewritten = replace_tokens_boundary_aware(&original, &pairs);
    if rewritten != original {
        let ts = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let backup_path = path.with_extension(format!("proxsave-{ts}.bak"));
        std::fs::write(&backup_path, &original)?;
        proxsave_fs::atomic::write_file_atomic(path, rewritten.as_bytes(), 0o644)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Rewrites `/etc/network/interfaces` and every file under
/// `/etc/network/interfaces.d/` in place, substituting each mapping's
/// `target_name` (the name the staged config was written under) for its
/// `current_name` (what the live kernel actually calls that NIC now).
/// Conflicts are only applied when
/// `include_conflicts` is set (the operator explicitly accepted the risk
/// of colliding with an existing interface name).
pub fn apply_nic_name_repair(live_root: &Path, plan: &NicRepairPlan, include_conflicts: bool) -> std::io::Result<usize> {
    let mut mappings: Vec<&NicMapping> = plan.safe_mappings.iter().collect();
    let conflict_mappings: Vec<NicMapping> = plan
        .conflicts
        .iter()
        .map(|c| NicMapping { target_name: c.target_name.clone(), current_name: c.current_name.clone(), method: MatchMethod::Mac })
        .collect();
    if include_conflicts {
        mappings.extend(conflict_mappings.iter());
    }
    if mappings.is_empty() {
        return Ok(0);
    }

    let mut changed = 0;
    let interfaces_path = live_root.join("etc/network/interfaces");
    if rewrite_file(&interfaces_path, &mappings)? {
        changed += 1;
    }

    let drop_in_dir = live_root.join("etc/network/interfaces.d");
    if let Ok(entries) = std::fs::read_dir(&drop_in_dir) {
        for entry in entries.flatten() {
            if entry.path().is_file() && rewrite_file(&entry.path(), &mappings)? {
                changed += 1;
            }
        }
    }

    if changed > 0 {
        info!(files = changed, "rewrote NIC names in network interface config");
    } else {
        warn!("NIC rename repair had mappings but rewrote no files");
    }
    Ok(changed)
}

fn parse_mac_from_permaddr(output: &str) -> Option<String> {
    output
        .lines()
        .find(|l| l.to_lowercase().contains("permanent address"))
        .and_then(|l| l.split(':').nth(1))
        .map(|s| s.trim().to_lowercase())
}

fn parse_udevadm_props(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|l| l.strip_prefix("E: "))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Collects the current host's NIC inventory from sysfs plus best-effort
/// `ethtool -P` / `udevadm info` calls for permanent MAC and stable
/// identifiers. Interfaces under `/sys/devices/virtual` are marked
/// virtual (bridges, bonds, veths) and excluded from matching.
pub async fn collect_current_inventory(runner: &dyn CommandRunner, ctx: &RunContext, live_root: &Path) -> std::io::Result<Vec<NicInfo>> {
    let net_dir = live_root.join("sys/class/net");
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(&net_dir) else {
        return Ok(out);
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "lo" {
            continue;
        }
        let iface_dir = entry.path();
        let mac = std::fs::read_to_string(iface_dir.join("address")).unwrap_or_default().trim().to_lowercase();
        let is_virtual = std::fs::read_link(&iface_dir)
            .map(|target| target.to_string_lossy().contains("/devices/virtual/"))
            .unwrap_or(false);

        let device_link = std::fs::read_link(iface_dir.join("device")).ok();
        let pci_path = device_link.as_ref().and_then(|p| p.file_name()).map(|n| n.to_string_lossy().to_string());
        let driver = std::fs::read_link(iface_dir.join("device/driver"))
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()));

        let permanent_mac = {
            let invocation = Invocation::new("ethtool", vec!["-P".to_string(), name.clone()]);
            match runner.run(ctx, &invocation).await {
                Ok(output) => parse_mac_from_permaddr(&String::from_utf8_lossy(&output.bytes)),
                Err(_) => None,
            }
        };

        let udev_props = {
            let invocation = Invocation::new("udevadm", vec!["info".to_string(), format!("/sys/class/net/{name}")]);
            match runner.run(ctx, &invocation).await {
                Ok(output) => parse_udevadm_props(&String::from_utf8_lossy(&output.bytes)),
                Err(_) => BTreeMap::new(),
            }
        };

        out.push(NicInfo { name, mac, permanent_mac, pci_path, driver, udev_props, is_virtual });
    }

    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Loads the archive's NIC inventory JSON (captured at backup time by the
/// `network` category) from the staged archive root.
pub fn load_backup_inventory(stage_root: &Path) -> Vec<NicInfo> {
    let path = stage_root.join("var/lib/proxsave/nic-inventory.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return Vec::new();
    };
    serde_json::from_slice(&bytes).unwrap_or_default()
}

pub async fn plan_nic_name_repair(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    live_root: &Path,
    stage_root: &Path,
) -> std::io::Result<NicRepairPlan> {
    let backup = load_backup_inventory(stage_root);
    if backup.is_empty() {
        return Ok(NicRepairPlan::default());
    }
    let current = collect_current_inventory(runner, ctx, live_root).await?;
    Ok(compute_nic_mappings(&backup, &current))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nic(name: &str, mac: &str) -> NicInfo {
        NicInfo { name: name.to_string(), mac: mac.to_string(), ..Default::default() }
    }

    #[test]
    fn boundary_aware_replace_skips_prefix_suffix_and_underscore_neighbors() {
        let text = "auto eno1\niface eno1 inet manual\neno10 unrelated\nxeno1 unrelated\neno1_foo unrelated\n";
        let out = replace_token_boundary_aware(text, "eno1", "eth0");
        assert!(out.contains("auto eth0"));
        assert!(out.contains("iface eth0 inet manual"));
        assert!(out.contains("eno10 unrelated"));
        assert!(out.contains("xeno1 unrelated"));
        assert!(out.contains("eno1_foo unrelated"));
    }

    #[test]
    fn scenario_five_matches_spec_exactly() {
        let backup = vec![nic("eno1", "aa:aa:aa:aa:aa:aa"), nic("ens20", "bb:bb:bb:bb:bb:bb")];
        let current = vec![nic("eth0", "aa:aa:aa:aa:aa:aa"), nic("eno1", "bb:bb:bb:bb:bb:bb")];

        let plan = compute_nic_mappings(&backup, &current);

        assert_eq!(plan.safe_mappings.len(), 1);
        assert_eq!(plan.safe_mappings[0].target_name, "ens20");
        assert_eq!(plan.safe_mappings[0].current_name, "eno1");
        assert_eq!(plan.safe_mappings[0].method, MatchMethod::Mac);

        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].target_name, "eno1");
        assert_eq!(plan.conflicts[0].current_name, "eth0");
        assert_eq!(plan.conflicts[0].existing, vec!["eno1".to_string()]);
    }

    #[test]
    fn duplicated_mac_is_not_used_for_matching() {
        let backup = vec![nic("eno1", "aa:aa:aa:aa:aa:aa")];
        let current = vec![nic("eth0", "aa:aa:aa:aa:aa:aa"), nic("eth1", "aa:aa:aa:aa:aa:aa")];

        let plan = compute_nic_mappings(&backup, &current);
        assert!(plan.safe_mappings.is_empty());
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn matching_name_and_mac_produces_no_mapping() {
        let backup = vec![nic("eno1", "aa:aa:aa:aa:aa:aa")];
        let current = vec![nic("eno1", "aa:aa:aa:aa:aa:aa")];
        let plan = compute_nic_mappings(&backup, &current);
        assert!(plan.safe_mappings.is_empty());
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn apply_writes_only_safe_mappings_unless_conflicts_included() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("etc/network")).unwrap();
        std::fs::write(
            tmp.path().join("etc/network/interfaces"),
            "auto eno1\niface eno1 inet manual\nauto ens20\n",
        )
        .unwrap();

        let plan = NicRepairPlan {
            safe_mappings: vec![NicMapping { target_name: "ens20".to_string(), current_name: "eno1".to_string(), method: MatchMethod::Mac }],
            conflicts: vec![NicConflict { target_name: "eno1".to_string(), current_name: "eth0".to_string(), existing: vec!["eno1".to_string()] }],
        };

        let changed = apply_nic_name_repair(tmp.path(), &plan, false).unwrap();
        assert_eq!(changed, 1);
        let content = std::fs::read_to_string(tmp.path().join("etc/network/interfaces")).unwrap();
        // The staged config held `ens20` (the archive's name); the live
        // kernel now calls that NIC `eno1`, so the `ens20` line is rewritten.
        assert!(content.contains("auto eno1\niface eno1 inet manual\nauto eno1"));
        // The pre-existing `eno1` lines (tied to the conflicting mapping,
        // not applied since `include_conflicts` is false) are left intact.
        assert!(!content.contains("ens20"));
    }

    #[test]
    fn chained_mappings_do_not_recorrupt_each_other() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("etc/network")).unwrap();
        std::fs::write(
            tmp.path().join("etc/network/interfaces"),
            "auto eno1\niface eno1 inet manual\nauto ens18\niface ens18 inet manual\n",
        )
        .unwrap();

        // A 3-NIC renumbering: the staged config's `eno1` is now `ens18`,
        // and its `ens18` is now `ens20` — a chain where one mapping's
        // `current_name` equals another's `target_name`.
        let plan = NicRepairPlan {
            safe_mappings: vec![
                NicMapping { target_name: "eno1".to_string(), current_name: "ens18".to_string(), method: MatchMethod::Mac },
                NicMapping { target_name: "ens18".to_string(), current_name: "ens20".to_string(), method: MatchMethod::Mac },
            ],
            conflicts: vec![],
        };

        apply_nic_name_repair(tmp.path(), &plan, false).unwrap();
        let content = std::fs::read_to_string(tmp.path().join("etc/network/interfaces")).unwrap();
        assert!(content.contains("auto ens18\niface ens18 inet manual"));
        assert!(content.contains("auto ens20\niface ens20 inet manual"));
    }
}
