//! Partitions a selected category set into the three apply groups and
//! checks a manifest's `host_role` against the running host before any
//! of it is touched.

use proxsave_core::category::{self, HostRole};
use proxsave_core::error::CompatibilityError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestorePlan {
    pub normal: Vec<String>,
    pub staged: Vec<String>,
    pub export: Vec<String>,
    pub needs_cluster_restore: bool,
    pub needs_services: bool,
}

fn cluster_category_id(role: HostRole) -> &'static str {
    match role {
        HostRole::Virtualization => "pve_cluster",
        HostRole::BackupServer => "pbs_cluster",
    }
}

/// Partitions `selected_categories` for `target_role`:
/// export-only categories go to `export`; categories applied through an
/// external tool go to `staged`; everything else is a plain file copy
/// (`normal`). When `cluster_safe_mode` is set, the role's cluster
/// category is moved from `normal` to `export` regardless of where it
/// would otherwise land.
pub fn plan_restore(
    selected_categories: &[String],
    target_role: HostRole,
    cluster_safe_mode: bool,
) -> RestorePlan {
    let mut plan = RestorePlan::default();
    let cluster_id = cluster_category_id(target_role);

    for id in selected_categories {
        let Some(cat) = category::by_id(id) else {
            continue;
        };

        if cat.export_only {
            plan.export.push(id.clone());
        } else if cluster_safe_mode && cat.id == cluster_id {
            plan.export.push(id.clone());
        } else if cat.staged() {
            plan.staged.push(id.clone());
        } else {
            plan.normal.push(id.clone());
        }
    }

    plan.needs_cluster_restore = plan.normal.iter().any(|id| id == cluster_id);
    plan.needs_services = selected_categories.iter().any(|id| id == "host_management");
    plan
}

/// The manifest's recorded `host_role` must match the currently
/// detected role; anything else risks applying PVE config to a PBS
/// host or vice versa.
pub fn validate_compatibility(
    manifest_role: HostRole,
    detected_role: HostRole,
) -> Result<(), CompatibilityError> {
    if manifest_role == detected_role {
        Ok(())
    } else {
        Err(CompatibilityError {
            manifest_role: manifest_role.as_str().to_string(),
            detected_role: detected_role.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_only_category_always_lands_in_export() {
        let plan = plan_restore(&["users_groups".to_string()], HostRole::Virtualization, false);
        assert_eq!(plan.export, vec!["users_groups"]);
        assert!(plan.normal.is_empty());
    }

    #[test]
    fn staged_category_is_partitioned_separately() {
        let plan = plan_restore(&["pve_firewall".to_string()], HostRole::Virtualization, false);
        assert_eq!(plan.staged, vec!["pve_firewall"]);
    }

    #[test]
    fn plain_category_lands_in_normal() {
        let plan = plan_restore(&["network".to_string()], HostRole::Virtualization, false);
        assert_eq!(plan.normal, vec!["network"]);
    }

    #[test]
    fn cluster_safe_mode_exports_cluster_category_instead_of_applying() {
        let plan = plan_restore(&["pve_cluster".to_string()], HostRole::Virtualization, true);
        assert!(plan.export.contains(&"pve_cluster".to_string()));
        assert!(!plan.staged.contains(&"pve_cluster".to_string()));
    }

    #[test]
    fn needs_cluster_restore_reflects_normal_group_only() {
        let without_safe_mode =
            plan_restore(&["pve_cluster".to_string()], HostRole::Virtualization, false);
        assert!(without_safe_mode.normal.contains(&"pve_cluster".to_string()));
        assert!(without_safe_mode.needs_cluster_restore);
    }

    #[test]
    fn cluster_safe_toggle_returns_category_to_normal() {
        let safe = plan_restore(&["pve_cluster".to_string()], HostRole::Virtualization, true);
        assert!(safe.export.contains(&"pve_cluster".to_string()));
        assert!(!safe.needs_cluster_restore);

        let unsafe_again = plan_restore(&["pve_cluster".to_string()], HostRole::Virtualization, false);
        assert!(unsafe_again.normal.contains(&"pve_cluster".to_string()));
        assert!(unsafe_again.needs_cluster_restore);
    }

    #[test]
    fn mismatched_role_is_rejected() {
        let err = validate_compatibility(HostRole::Virtualization, HostRole::BackupServer)
            .unwrap_err();
        assert_eq!(err.manifest_role, "pve");
        assert_eq!(err.detected_role, "pbs");
    }
}
