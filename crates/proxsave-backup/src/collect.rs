//! Phase 2, Collect: resolving the enabled categories into the concrete
//! path list the archiver will read. The actual category→path expansion
//! (reading package databases, cluster config endpoints, etc.) is host
//! and category specific and lives outside this crate; this module only
//! defines the seam and the default implementation driven by the static
//! category registry.

use std::path::PathBuf;

use proxsave_core::category::{self, BackupMode, HostRole};

/// Resolves the category/role/mode selection into paths to archive.
/// Production code injects a host-aware implementation; tests inject a
/// fixed list.
pub trait Collector: Send + Sync {
    fn collect(&self, role: HostRole, mode: BackupMode, categories: &[String]) -> anyhow::Result<Vec<PathBuf>>;
}

/// Expands the selection to every path declared by the matching category
/// registry entries, in registry order, deduplicated.
pub struct RegistryCollector;

impl Collector for RegistryCollector {
    fn collect(&self, role: HostRole, mode: BackupMode, categories: &[String]) -> anyhow::Result<Vec<PathBuf>> {
        let selected: Vec<&category::Category> = category::categories_for_mode(mode, role)
            .into_iter()
            .filter(|c| categories.is_empty() || categories.iter().any(|id| id == c.id))
            .collect();

        let mut seen = std::collections::BTreeSet::new();
        let mut paths = Vec::new();
        for cat in selected {
            for p in cat.paths {
                if seen.insert(*p) {
                    paths.push(PathBuf::from(p));
                }
            }
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_collector_filters_by_selection() {
        let collector = RegistryCollector;
        let all = collector.collect(HostRole::Virtualization, BackupMode::Full, &[]).unwrap();
        assert!(!all.is_empty());

        let narrowed = collector
            .collect(HostRole::Virtualization, BackupMode::Full, &["network".to_string()])
            .unwrap();
        assert!(narrowed.len() <= all.len());
        assert!(!narrowed.is_empty());
    }
}
