//! Host role/version detection.
//!
//! The detector consults well-known marker files. Reading an actual
//! version string out of the installed product (`pveversion`,
//! `proxmox-backup-manager version`) is an external-command concern and is
//! layered on top by `proxsave-cmd`-aware callers; this module only owns
//! the role/marker logic and the trait seam tests replace.

use std::path::Path;

use crate::category::HostRole;

pub trait HostDetector: Send + Sync {
    fn detect_role(&self) -> Option<HostRole>;
}

/// Marker files that identify a role, checked in order. The first present
/// marker wins; if both are present (a genuinely inconsistent host), the
/// virtualization marker takes priority since `/etc/pve` existing means the
/// cluster filesystem is mounted and authoritative.
const PVE_MARKERS: &[&str] = &["/etc/pve/.version", "/etc/pve/local"];
const PBS_MARKERS: &[&str] = &["/etc/proxmox-backup/.version", "/etc/proxmox-backup"];

#[derive(Debug, Default)]
pub struct FilesystemHostDetector {
    root: Option<std::path::PathBuf>,
}

impl FilesystemHostDetector {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Root-prefixed constructor for tests (fake filesystem roots).
    pub fn with_root(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn prefixed(&self, marker: &str) -> std::path::PathBuf {
        match &self.root {
            Some(root) => root.join(marker.trim_start_matches('/')),
            None => std::path::PathBuf::from(marker),
        }
    }

    fn any_exists(&self, markers: &[&str]) -> bool {
        markers.iter().any(|m| self.prefixed(m).exists())
    }
}

impl HostDetector for FilesystemHostDetector {
    fn detect_role(&self) -> Option<HostRole> {
        if self.any_exists(PVE_MARKERS) {
            return Some(HostRole::Virtualization);
        }
        if self.any_exists(PBS_MARKERS) {
            return Some(HostRole::BackupServer);
        }
        None
    }
}

/// A detector that always reports a fixed role, for tests and dry-run
/// tooling that targets a role explicitly.
pub struct FixedHostDetector(pub HostRole);

impl HostDetector for FixedHostDetector {
    fn detect_role(&self) -> Option<HostRole> {
        Some(self.0)
    }
}

pub fn host_role_path_exists(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_virtualization_marker() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("etc/pve")).unwrap();
        std::fs::write(tmp.path().join("etc/pve/.version"), "8.2").unwrap();

        let detector = FilesystemHostDetector::with_root(tmp.path());
        assert_eq!(detector.detect_role(), Some(HostRole::Virtualization));
    }

    #[test]
    fn detects_backup_server_marker() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("etc/proxmox-backup")).unwrap();
        std::fs::write(tmp.path().join("etc/proxmox-backup/.version"), "3.2").unwrap();

        let detector = FilesystemHostDetector::with_root(tmp.path());
        assert_eq!(detector.detect_role(), Some(HostRole::BackupServer));
    }

    #[test]
    fn no_markers_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let detector = FilesystemHostDetector::with_root(tmp.path());
        assert_eq!(detector.detect_role(), None);
    }
}
