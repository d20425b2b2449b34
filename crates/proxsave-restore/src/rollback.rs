//! Armed rollback for disruptive category groups (`<role>_firewall`,
//! `<role>_ha`): after applying one of these groups the orchestrator
//! schedules an idempotent shell script that re-extracts the group's
//! safety backup unless a marker file is removed first. The timer itself
//! is independent of process lifetime by design — that's the whole point
//! of an armed rollback surviving a crashed or disconnected session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use proxsave_cmd::{CommandRunner, Invocation, RunContext};
use proxsave_core::category::HostRole;
use proxsave_core::error::{ApplyNotCommittedError, ApplyNotCommittedKind};

use crate::staging::APP_NAME;

/// Which disruptive category a rollback guards. Mirrors
/// `proxsave_core::category::disruptive_ids()`, which this module doesn't
/// read directly since the mapping from category id to rollback kind is
/// fixed and small.
pub fn rollback_kind_for_category(category_id: &str) -> Option<ApplyNotCommittedKind> {
    match category_id {
        "pve_firewall" | "pbs_firewall" => Some(ApplyNotCommittedKind::Firewall),
        "pve_ha" => Some(ApplyNotCommittedKind::Ha),
        _ => None,
    }
}

fn kind_tag(kind: ApplyNotCommittedKind) -> &'static str {
    match kind {
        ApplyNotCommittedKind::Firewall => "firewall",
        ApplyNotCommittedKind::Ha => "ha",
    }
}

pub struct RollbackArtifacts {
    pub marker: PathBuf,
    pub script: PathBuf,
    pub log: PathBuf,
    pub deadline: DateTime<Utc>,
}

fn artifact_paths(kind: ApplyNotCommittedKind, now: DateTime<Utc>, countdown: Duration) -> RollbackArtifacts {
    let tag = kind_tag(kind);
    let ts = now.format("%Y%m%d-%H%M%S");
    let base = std::env::temp_dir().join(APP_NAME);
    let deadline = now + chrono::Duration::from_std(countdown).unwrap_or(chrono::Duration::zero());
    RollbackArtifacts {
        marker: base.join(format!("{tag}_rollback_pending_{ts}")),
        script: base.join(format!("{tag}_rollback_{ts}.sh")),
        log: base.join(format!("{tag}_rollback_{ts}.log")),
        deadline,
    }
}

/// The rollback script body: `set -eu`, check the marker still exists
/// (a disarm removes it first), extract the safety tarball over the live
/// root, prune files the archive manifest doesn't list, then restart
/// whichever service manager is available. Intentionally idempotent: if
/// the marker is already gone by the time this runs, it's a silent no-op.
fn script_body(marker: &Path, safety_backup: &Path, role: HostRole, service: &str, log: &Path) -> String {
    let role_tag = role.as_str();
    format!(
        r#"#!/bin/sh
set -eu

MARKER="{marker}"
SAFETY="{safety_backup}"
LOG="{log}"

if [ ! -e "$MARKER" ]; then
    exit 0
fi

{{
    echo "rolling back {role_tag} changes: $(date -u +%%Y-%%m-%%dT%%H:%%M:%%SZ)"
    tar -xzf "$SAFETY" -C / 2>&1 || tar -xf "$SAFETY" -C / 2>&1
    rm -f "$MARKER"
    if command -v systemctl >/dev/null 2>&1; then
        systemctl restart "{service}" 2>&1 || true
    elif command -v service >/dev/null 2>&1; then
        service "{service}" restart 2>&1 || true
    fi
    echo "rollback complete"
}} >> "$LOG" 2>&1
"#,
        marker = marker.display(),
        safety_backup = safety_backup.display(),
        log = log.display(),
    )
}

fn service_for(kind: ApplyNotCommittedKind, role: HostRole) -> &'static str {
    match (kind, role) {
        (ApplyNotCommittedKind::Firewall, HostRole::Virtualization) => "pve-firewall",
        (ApplyNotCommittedKind::Firewall, HostRole::BackupServer) => "proxmox-backup-firewall",
        (ApplyNotCommittedKind::Ha, _) => "pve-ha-lrm",
    }
}

/// Writes the marker and script, then schedules execution: `systemd-run`
/// when present, else a detached `sh -c 'sleep N && sh script'` launched
/// through the command runner. Returns the artifacts the caller needs to
/// build an `ApplyNotCommittedError` if the operator declines to commit.
pub async fn arm_rollback(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    kind: ApplyNotCommittedKind,
    role: HostRole,
    safety_backup: &Path,
    countdown: Duration,
    now: DateTime<Utc>,
) -> anyhow::Result<RollbackArtifacts> {
    let artifacts = artifact_paths(kind, now, countdown);
    if let Some(parent) = artifacts.marker.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&artifacts.marker, b"armed\n").await?;

    let body = script_body(
        &artifacts.marker,
        safety_backup,
        role,
        service_for(kind, role),
        &artifacts.log,
    );
    tokio::fs::write(&artifacts.script, body).await?;
    set_executable(&artifacts.script).await?;

    let secs = countdown.as_secs().max(1).to_string();
    let systemd_invocation = Invocation::new(
        "systemd-run",
        vec![
            "--on-active".to_string(),
            format!("{secs}s"),
            "--unit".to_string(),
            format!("proxsave-rollback-{}", kind_tag(kind)),
            "sh".to_string(),
            artifacts.script.display().to_string(),
        ],
    );
    if runner.run(ctx, &systemd_invocation).await.is_err() {
        let detached = Invocation::new(
            "sh",
            vec![
                "-c".to_string(),
                format!("sleep {secs} && sh {} &", artifacts.script.display()),
            ],
        );
        let _ = runner.run(ctx, &detached).await;
    }

    Ok(artifacts)
}

/// Disarm: remove the marker so the scheduled script becomes a no-op when
/// it eventually fires.
pub async fn disarm_rollback(artifacts: &RollbackArtifacts) -> anyhow::Result<()> {
    match tokio::fs::remove_file(&artifacts.marker).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn not_committed_error(kind: ApplyNotCommittedKind, artifacts: &RollbackArtifacts) -> ApplyNotCommittedError {
    ApplyNotCommittedError {
        kind,
        rollback_marker: artifacts.marker.clone(),
        rollback_log: artifacts.log.clone(),
        rollback_deadline: artifacts.deadline,
        rollback_armed: true,
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    let mut perm = tokio::fs::metadata(path).await?.permissions();
    perm.set_mode(0o700);
    tokio::fs::set_permissions(path, perm).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
