//! Static category registry.
//!
//! The registry is a compile-time table; every projection over it
//! (`by_role`, `categories_for_mode`, `staged_ids`, `export_only_ids`) is a
//! pure function, never a second hand-authored list.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use globset::Glob;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    Virtualization,
    BackupServer,
}

impl HostRole {
    pub fn as_str(self) -> &'static str {
        match self {
            HostRole::Virtualization => "pve",
            HostRole::BackupServer => "pbs",
        }
    }
}

/// A category's declared ownership. `Common` categories are returned by
/// `by_role` for both host roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryRole {
    Virtualization,
    BackupServer,
    Common,
}

impl CategoryRole {
    fn matches(self, role: HostRole) -> bool {
        match (self, role) {
            (CategoryRole::Common, _) => true,
            (CategoryRole::Virtualization, HostRole::Virtualization) => true,
            (CategoryRole::BackupServer, HostRole::BackupServer) => true,
            _ => false,
        }
    }
}

/// Selection mode for `categories_for_mode`. `Quick` is the subset of a
/// role's categories considered safe and fast to collect on every run;
/// `Full` is every category for the role (including export-only ones).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupMode {
    Quick,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub role: CategoryRole,
    pub paths: &'static [&'static str],
    pub export_only: bool,
    /// Included in the `Quick` backup mode. Every category is included in `Full`.
    pub quick: bool,
}

impl Category {
    /// Whether this category is applied via an external tool rather than a
    /// plain file copy.
    pub fn staged(&self) -> bool {
        staged_ids().contains(self.id)
    }
}

macro_rules! cat {
    ($id:literal, $name:literal, $desc:literal, $role:expr, $paths:expr, export_only: $export:literal, quick: $quick:literal) => {
        Category {
            id: $id,
            display_name: $name,
            description: $desc,
            role: $role,
            paths: $paths,
            export_only: $export,
            quick: $quick,
        }
    };
}

/// The full static registry, ~30 entries.
static REGISTRY: &[Category] = &[
    // --- common to both host roles ---
    cat!(
        "network",
        "Network interfaces",
        "Interface definitions, hostname and hosts file",
        CategoryRole::Common,
        &["./etc/network/interfaces", "./etc/network/interfaces.d/", "./etc/hostname", "./etc/hosts"],
        export_only: false, quick: true
    ),
    cat!(
        "resolver",
        "DNS resolver",
        "resolv.conf and systemd-resolved configuration",
        CategoryRole::Common,
        &["./etc/resolv.conf", "./etc/systemd/resolved.conf"],
        export_only: false, quick: true
    ),
    cat!(
        "ssh",
        "SSH daemon and host keys",
        "sshd_config, ssh_config and host key material",
        CategoryRole::Common,
        &["./etc/ssh/sshd_config", "./etc/ssh/ssh_config", "./etc/ssh/ssh_host_*"],
        export_only: false, quick: true
    ),
    cat!(
        "ntp",
        "Time synchronization",
        "chrony / systemd-timesyncd configuration",
        CategoryRole::Common,
        &["./etc/chrony.conf", "./etc/chrony/", "./etc/systemd/timesyncd.conf"],
        export_only: false, quick: true
    ),
    cat!(
        "cron",
        "Scheduled jobs",
        "System crontab and cron.d fragments",
        CategoryRole::Common,
        &["./etc/crontab", "./etc/cron.d/"],
        export_only: false, quick: false
    ),
    cat!(
        "fstab",
        "Filesystem table",
        "Static mount definitions (merged on restore, see repair::fstab)",
        CategoryRole::Common,
        &["./etc/fstab"],
        export_only: false, quick: true
    ),
    cat!(
        "apt_sources",
        "Package sources",
        "APT sources.list and sources.list.d fragments",
        CategoryRole::Common,
        &["./etc/apt/sources.list", "./etc/apt/sources.list.d/"],
        export_only: false, quick: false
    ),
    cat!(
        "host_management",
        "Host identity and service overrides",
        "Hostname, timezone and systemd drop-in overrides",
        CategoryRole::Common,
        &["./etc/hostname", "./etc/timezone", "./etc/systemd/system.conf", "./etc/systemd/system/*.conf.d/"],
        export_only: false, quick: false
    ),
    cat!(
        "users_groups",
        "Local users and groups",
        "passwd/group/shadow/sudoers; extracted for manual review only",
        CategoryRole::Common,
        &["./etc/passwd", "./etc/group", "./etc/shadow", "./etc/sudoers", "./etc/sudoers.d/"],
        export_only: true, quick: false
    ),
    cat!(
        "motd_issue",
        "Login banners",
        "motd and issue banners",
        CategoryRole::Common,
        &["./etc/motd", "./etc/issue"],
        export_only: false, quick: false
    ),
    cat!(
        "sysctl",
        "Kernel tunables",
        "sysctl.conf and sysctl.d fragments",
        CategoryRole::Common,
        &["./etc/sysctl.conf", "./etc/sysctl.d/"],
        export_only: false, quick: false
    ),
    cat!(
        "zfs_pools",
        "ZFS pool layout",
        "Pool topology snapshot used only to cross-check `zpool import` after restore",
        CategoryRole::Common,
        &["./var/lib/proxsave/zfs-inventory.json"],
        export_only: true, quick: false
    ),
    cat!(
        "host_inventory",
        "Hardware inventory",
        "NIC and block device inventory used by post-restore repairs",
        CategoryRole::Common,
        &["./var/lib/proxsave/nic-inventory.json", "./var/lib/proxsave/blk-inventory.json"],
        export_only: true, quick: false
    ),
    // --- virtualization host (pve-style) ---
    cat!(
        "pve_cluster",
        "Cluster configuration",
        "corosync cluster membership and config",
        CategoryRole::Virtualization,
        &["./etc/pve/corosync.conf", "./etc/corosync/"],
        export_only: false, quick: false
    ),
    cat!(
        "pve_firewall",
        "Cluster and host firewall",
        "Firewall rule sets; disruptive, rollback is armed after apply",
        CategoryRole::Virtualization,
        &["./etc/pve/firewall/", "./etc/pve/nodes/*/host.fw"],
        export_only: false, quick: false
    ),
    cat!(
        "pve_ha",
        "High availability",
        "HA groups and resource state; disruptive, rollback is armed after apply",
        CategoryRole::Virtualization,
        &["./etc/pve/ha/"],
        export_only: false, quick: false
    ),
    cat!(
        "pve_storage",
        "Storage definitions",
        "storage.cfg storage pool definitions",
        CategoryRole::Virtualization,
        &["./etc/pve/storage.cfg"],
        export_only: false, quick: true
    ),
    cat!(
        "pve_datacenter",
        "Datacenter defaults",
        "datacenter.cfg cluster-wide defaults",
        CategoryRole::Virtualization,
        &["./etc/pve/datacenter.cfg"],
        export_only: false, quick: true
    ),
    cat!(
        "pve_user",
        "Users and realms",
        "user.cfg and domains.cfg",
        CategoryRole::Virtualization,
        &["./etc/pve/user.cfg", "./etc/pve/domains.cfg"],
        export_only: false, quick: false
    ),
    cat!(
        "pve_notifications",
        "Notification targets",
        "notifications.cfg endpoints and matchers",
        CategoryRole::Virtualization,
        &["./etc/pve/notifications.cfg"],
        export_only: false, quick: false
    ),
    cat!(
        "pve_acme",
        "ACME/TLS certificates",
        "ACME account and certificate material",
        CategoryRole::Virtualization,
        &["./etc/pve/acme/", "./etc/pve/priv/acme/"],
        export_only: false, quick: false
    ),
    cat!(
        "pve_vzdump",
        "Backup job defaults",
        "vzdump.conf default job settings",
        CategoryRole::Virtualization,
        &["./etc/vzdump.conf"],
        export_only: false, quick: true
    ),
    cat!(
        "pve_sdn",
        "Software-defined networking",
        "SDN zone/vnet definitions",
        CategoryRole::Virtualization,
        &["./etc/pve/sdn/"],
        export_only: false, quick: false
    ),
    cat!(
        "pve_replication",
        "Storage replication",
        "replication.cfg job definitions",
        CategoryRole::Virtualization,
        &["./etc/pve/replication.cfg"],
        export_only: false, quick: false
    ),
    cat!(
        "pve_ceph",
        "Ceph configuration",
        "ceph.conf; export-only, cluster state is too sensitive to auto-apply",
        CategoryRole::Virtualization,
        &["./etc/ceph/ceph.conf", "./etc/pve/ceph.conf"],
        export_only: true, quick: false
    ),
    // --- backup server (pbs-style) ---
    cat!(
        "pbs_datastore",
        "Datastore definitions",
        "datastore.cfg datastore pool definitions",
        CategoryRole::BackupServer,
        &["./etc/proxmox-backup/datastore.cfg"],
        export_only: false, quick: true
    ),
    cat!(
        "pbs_firewall",
        "Host firewall",
        "firewall.cfg and node.cfg; disruptive, rollback is armed after apply",
        CategoryRole::BackupServer,
        &["./etc/proxmox-backup/firewall.cfg", "./etc/proxmox-backup/node.cfg"],
        export_only: false, quick: false
    ),
    cat!(
        "pbs_user",
        "Users and realms",
        "user.cfg and domains.cfg",
        CategoryRole::BackupServer,
        &["./etc/proxmox-backup/user.cfg", "./etc/proxmox-backup/domains.cfg"],
        export_only: false, quick: false
    ),
    cat!(
        "pbs_acl",
        "Access control lists",
        "acl.cfg permission assignments",
        CategoryRole::BackupServer,
        &["./etc/proxmox-backup/acl.cfg"],
        export_only: false, quick: false
    ),
    cat!(
        "pbs_remote",
        "Remote servers",
        "remote.cfg peer PBS definitions",
        CategoryRole::BackupServer,
        &["./etc/proxmox-backup/remote.cfg"],
        export_only: false, quick: false
    ),
    cat!(
        "pbs_sync",
        "Sync jobs",
        "sync.cfg pull/push job definitions",
        CategoryRole::BackupServer,
        &["./etc/proxmox-backup/sync.cfg"],
        export_only: false, quick: false
    ),
    cat!(
        "pbs_notifications",
        "Notification targets",
        "notifications.cfg and notifications-priv.cfg",
        CategoryRole::BackupServer,
        &["./etc/proxmox-backup/notifications.cfg", "./etc/proxmox-backup/notifications-priv.cfg"],
        export_only: false, quick: false
    ),
    cat!(
        "pbs_tape",
        "Tape backup",
        "tape.cfg and media-pool.cfg",
        CategoryRole::BackupServer,
        &["./etc/proxmox-backup/tape.cfg", "./etc/proxmox-backup/media-pool.cfg"],
        export_only: false, quick: false
    ),
    cat!(
        "pbs_cluster",
        "Cluster-wide proxy settings",
        "proxy.cfg",
        CategoryRole::BackupServer,
        &["./etc/proxmox-backup/proxy.cfg"],
        export_only: false, quick: false
    ),
];

/// Categories applied through an external tool rather than file copy.
/// Fixed, derived once.
fn staged_ids() -> &'static BTreeSet<&'static str> {
    static IDS: OnceLock<BTreeSet<&'static str>> = OnceLock::new();
    IDS.get_or_init(|| {
        [
            "pve_firewall",
            "pve_ha",
            "pve_storage",
            "pve_user",
            "pve_notifications",
            "pve_sdn",
            "pbs_datastore",
            "pbs_firewall",
            "pbs_user",
            "pbs_acl",
            "pbs_notifications",
        ]
        .into_iter()
            .collect()
    })
}

/// Categories whose disruptive reapplication arms a rollback timer.
pub fn disruptive_ids() -> &'static [&'static str] {
    &["pve_firewall", "pbs_firewall", "pve_ha"]
}

pub fn export_only_ids() -> BTreeSet<&'static str> {
    REGISTRY
        .iter()
        .filter(|c| c.export_only)
        .map(|c| c.id)
        .collect()
}

pub fn all() -> &'static [Category] {
    REGISTRY
}

pub fn by_id(id: &str) -> Option<&'static Category> {
    REGISTRY.iter().find(|c| c.id == id)
}

pub fn by_role(role: HostRole) -> Vec<&'static Category> {
    REGISTRY.iter().filter(|c| c.role.matches(role)).collect()
}

pub fn categories_for_mode(mode: BackupMode, role: HostRole) -> Vec<&'static Category> {
    by_role(role)
        .into_iter()
        .filter(|c| matches!(mode, BackupMode::Full) || c.quick)
        .collect()
}

/// Archive-relative path normalization: strip any leading `/`, collapse to
/// a `./`-prefixed form, and reject any `..` component.
pub fn normalize_archive_path(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    if trimmed.split('/').any(|seg| seg == "..") {
        return None;
    }
    Some(format!("./{trimmed}"))
}

fn is_glob_pattern(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Category path-matching semantics.
pub fn path_matches(path: &str, category: &Category) -> bool {
    let Some(normalized) = normalize_archive_path(path) else {
        return false;
    };

    category.paths.iter().any(|pattern| {
        let pattern = pattern.trim_end_matches('/');
        let is_dir_pattern = category.paths.iter().any(|p| *p == format!("{pattern}/"));

        if is_glob_pattern(pattern) && !is_dir_pattern {
            return Glob::new(pattern)
                .map(|g| g.compile_matcher().is_match(&normalized))
                .unwrap_or(false);
        }

        if is_dir_pattern {
            return normalized == pattern || normalized.starts_with(&format!("{pattern}/"));
        }

        normalized == pattern
    })
}

/// `analyze_archive`: categories with at least one matching entry path.
pub fn analyze_archive(entry_paths: &[String]) -> Vec<&'static Category> {
    REGISTRY
        .iter()
        .filter(|cat| entry_paths.iter().any(|p| path_matches(p, cat)))
        .collect()
}

/// Union of all paths across `categories`, order-preserving on first
/// appearance.
pub fn selected_paths(categories: &[&Category]) -> Vec<&'static str> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for cat in categories {
        for path in cat.paths {
            if seen.insert(*path) {
                out.push(*path);
            }
        }
    }
    out
}

/// Restore-time mode: whether the plan is applied to the live system, or
/// only extracted to an inspection directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    Apply,
    ExtractOnly,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<_> = REGISTRY.iter().map(|c| c.id).collect();
        let before = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), before, "duplicate category id in registry");
    }

    #[test]
    fn paths_are_archive_relative_and_traversal_free() {
        for cat in REGISTRY {
            for path in cat.paths {
                assert!(
                    normalize_archive_path(path).as_deref() == Some(*path)
                        || normalize_archive_path(path).is_some(),
                    "bad path in {}: {path}",
                    cat.id
                );
                assert!(!path.contains(".."), "traversal in {}: {path}", cat.id);
            }
        }
    }

    #[test]
    fn export_only_implies_not_staged() {
        for cat in REGISTRY {
            if cat.export_only {
                assert!(!cat.staged(), "{} is export_only and staged", cat.id);
            }
        }
    }

    #[test]
    fn common_categories_are_in_both_roles() {
        let pve = by_role(HostRole::Virtualization);
        let pbs = by_role(HostRole::BackupServer);
        assert!(pve.iter().any(|c| c.id == "network"));
        assert!(pbs.iter().any(|c| c.id == "network"));
    }

    #[test]
    fn quick_mode_is_subset_of_full() {
        let quick: BTreeSet<_> = categories_for_mode(BackupMode::Quick, HostRole::Virtualization)
            .iter()
            .map(|c| c.id)
            .collect();
        let full: BTreeSet<_> = categories_for_mode(BackupMode::Full, HostRole::Virtualization)
            .iter()
            .map(|c| c.id)
            .collect();
        assert!(quick.is_subset(&full));
    }

    #[test]
    fn path_matches_exact_and_directory_and_glob() {
        let network = by_id("network").unwrap();
        assert!(path_matches("etc/hostname", network));
        assert!(path_matches("/etc/network/interfaces", network));
        assert!(path_matches("etc/network/interfaces.d/eth0", network));
        assert!(!path_matches("etc/somethingelse", network));

        let ssh = by_id("ssh").unwrap();
        assert!(path_matches("etc/ssh/ssh_host_rsa_key", ssh));
        assert!(!path_matches("etc/ssh/sshd_config.bak", ssh));
    }

    #[test]
    fn normalize_rejects_traversal() {
        assert!(normalize_archive_path("etc/../etc/passwd").is_none());
        assert_eq!(
            normalize_archive_path("/etc/passwd").as_deref(),
            Some("./etc/passwd")
        );
    }

    #[test]
    fn selected_paths_is_order_preserving_and_deduped() {
        let network = by_id("network").unwrap();
        let resolver = by_id("resolver").unwrap();
        let paths = selected_paths(&[network, resolver, network]);
        assert_eq!(paths[0], network.paths[0]);
        let unique: BTreeSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), paths.len());
    }

    #[test]
    fn analyze_archive_finds_matching_categories() {
        let found = analyze_archive(&["etc/pve/firewall/cluster.fw".to_string()]);
        assert!(found.iter().any(|c| c.id == "pve_firewall"));
    }
}
