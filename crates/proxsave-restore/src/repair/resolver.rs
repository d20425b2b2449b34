//! DNS resolver repair: after a restore, `/etc/resolv.conf` can point at a
//! resolver daemon (`systemd-resolved`, `resolvconf`) that was never
//! reinstalled on the target, leaving a dangling symlink and no DNS.

use std::path::Path;

use tracing::{info, warn};

const RESOLVED_STUB: &str = "/run/systemd/resolve/stub-resolv.conf";
const RESOLVCONF_RUN: &str = "/run/resolvconf/resolv.conf";
const PUBLIC_FALLBACK: &str = "9.9.9.9";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverRepairAction {
    /// resolv.conf already points at a resolver daemon that's present; left untouched.
    NoneNeeded,
    /// A dangling symlink (daemon package missing) was replaced.
    ReplacedDanglingSymlink,
    /// The archive's own diagnostics capture had a usable `nameserver` line.
    RestoredFromBackupDiagnostics,
    /// Neither a live daemon nor backup diagnostics were usable; wrote a
    /// minimal static resolver.
    WroteMinimalStatic,
}

fn is_symlink_into_diagnostics(target: &Path) -> bool {
    let s = target.to_string_lossy();
    s.contains("diagnostics") || s.contains("NetworkManager")
}

/// Reads the default-route gateway from `ip route show default`-style
/// output, taking the first `via <addr>` token.
pub fn parse_default_gateway(ip_route_output: &str) -> Option<String> {
    ip_route_output
        .lines()
        .find(|l| l.trim_start().starts_with("default"))
        .and_then(|l| {
            let mut tokens = l.split_whitespace();
            while let Some(tok) = tokens.next() {
                if tok == "via" {
                    return tokens.next().map(str::to_string);
                }
            }
            None
        })
}

fn extract_nameserver_lines(diagnostics: &str) -> Vec<String> {
    diagnostics
        .lines()
        .filter(|l| l.trim_start().starts_with("nameserver "))
        .map(str::to_string)
        .collect()
}

fn minimal_static_resolver(gateway: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(gw) = gateway {
        out.push_str(&format!("nameserver {gw}\n"));
    }
    out.push_str(&format!("nameserver {PUBLIC_FALLBACK}\n"));
    out
}

/// Repairs `/etc/resolv.conf` under `live_root` if it's missing, or a
/// symlink pointing at a diagnostics capture path, or a dangling symlink.
/// `backup_diagnostics` is the archive's captured resolv.conf content (if
/// the `network` category staged one); `default_gateway` comes from
/// `ip route show default` run against the live host.
pub fn maybe_repair_resolv_conf(
    live_root: &Path,
    backup_diagnostics: Option<&str>,
    default_gateway: Option<&str>,
) -> std::io::Result<ResolverRepairAction> {
    let resolv_path = live_root.join("etc/resolv.conf");

    let needs_repair = match std::fs::symlink_metadata(&resolv_path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => return Err(e),
        Ok(meta) if meta.file_type().is_symlink() => {
            let target = std::fs::read_link(&resolv_path)?;
            is_symlink_into_diagnostics(&target) || !resolv_path.exists()
        }
        Ok(_) => false,
    };

    if !needs_repair {
        return Ok(ResolverRepairAction::NoneNeeded);
    }

    if std::fs::symlink_metadata(&resolv_path).is_ok() {
        std::fs::remove_file(&resolv_path)?;
    }

    for candidate in [RESOLVED_STUB, RESOLVCONF_RUN] {
        let daemon_path = live_root.join(candidate.trim_start_matches('/'));
        if daemon_path.exists() {
            symlink(candidate, &resolv_path)?;
            info!(target = candidate, "relinked resolv.conf to resolver daemon");
            return Ok(ResolverRepairAction::ReplacedDanglingSymlink);
        }
    }

    if let Some(diag) = backup_diagnostics {
        let lines = extract_nameserver_lines(diag);
        if !lines.is_empty() {
            std::fs::write(&resolv_path, lines.join("\n") + "\n")?;
            info!("restored resolv.conf from backup diagnostics capture");
            return Ok(ResolverRepairAction::RestoredFromBackupDiagnostics);
        }
    }

    warn!("no resolver daemon or usable backup diagnostics; writing minimal static resolver");
    std::fs::write(&resolv_path, minimal_static_resolver(default_gateway))?;
    Ok(ResolverRepairAction::WroteMinimalStatic)
}

#[cfg(unix)]
fn symlink(original: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn symlink(_original: &str, link: &Path) -> std::io::Result<()> {
    std::fs::write(link, b"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("etc")).unwrap();
        tmp
    }

    #[test]
    fn missing_resolv_conf_gets_minimal_static_when_nothing_else_available() {
        let tmp = setup();
        let action = maybe_repair_resolv_conf(tmp.path(), None, Some("192.168.1.1")).unwrap();
        assert_eq!(action, ResolverRepairAction::WroteMinimalStatic);
        let content = std::fs::read_to_string(tmp.path().join("etc/resolv.conf")).unwrap();
        assert!(content.contains("192.168.1.1"));
        assert!(content.contains("9.9.9.9"));
    }

    #[test]
    fn dangling_symlink_into_diagnostics_is_replaced() {
        let tmp = setup();
        #[cfg(unix)]
        std::os::unix::fs::symlink("/run/diagnostics/resolv.conf", tmp.path().join("etc/resolv.conf")).unwrap();
        #[cfg(not(unix))]
        std::fs::write(tmp.path().join("etc/resolv.conf"), b"").unwrap();

        let action = maybe_repair_resolv_conf(tmp.path(), Some("nameserver 10.0.0.1\n"), None).unwrap();
        assert_eq!(action, ResolverRepairAction::RestoredFromBackupDiagnostics);
    }

    #[test]
    fn resolver_daemon_present_is_relinked() {
        let tmp = setup();
        std::fs::create_dir_all(tmp.path().join("run/systemd/resolve")).unwrap();
        std::fs::write(tmp.path().join("run/systemd/resolve/stub-resolv.conf"), b"").unwrap();

        let action = maybe_repair_resolv_conf(tmp.path(), None, None).unwrap();
        assert_eq!(action, ResolverRepairAction::ReplacedDanglingSymlink);
    }

    #[test]
    fn valid_plain_file_is_left_untouched() {
        let tmp = setup();
        std::fs::write(tmp.path().join("etc/resolv.conf"), "nameserver 1.1.1.1\n").unwrap();

        let action = maybe_repair_resolv_conf(tmp.path(), None, None).unwrap();
        assert_eq!(action, ResolverRepairAction::NoneNeeded);
        let content = std::fs::read_to_string(tmp.path().join("etc/resolv.conf")).unwrap();
        assert_eq!(content, "nameserver 1.1.1.1\n");
    }

    #[test]
    fn default_gateway_parses_via_token() {
        let out = "default via 192.168.1.1 dev eth0 proto dhcp\n10.0.0.0/24 dev eth0\n";
        assert_eq!(parse_default_gateway(out), Some("192.168.1.1".to_string()));
    }
}
