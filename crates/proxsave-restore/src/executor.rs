//! `RunRestoreWorkflow`: the top-level restore orchestrator. Drives the
//! UI through source/candidate/mode selection, prepares a plain bundle
//! (downloading and decrypting as needed), verifies its checksum, builds
//! a restore plan, stages the archive, applies each category group in
//! order with a safety backup and (for disruptive groups) an armed
//! rollback, then runs the post-apply repairs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use proxsave_cmd::{CommandRunner, Invocation, RunContext};
use proxsave_core::category::{self, HostRole};
use proxsave_core::clock::Clock;
use proxsave_core::error::{
    ApplyNotCommittedError, DecryptError, DecryptReason, IntegrityError, UserAbortReason,
    UserAbortedError,
};
use proxsave_core::manifest::{EncryptionMode, Manifest};
use proxsave_core::tempreg::TempDirRegistry;
use proxsave_crypto::derive_passphrase_identities;
use tracing::{info, warn};

use crate::discovery::{
    build_decrypt_path_options, discover_candidates, discover_rclone_backups, CandidateLocation,
    DiscoveredCandidate, SilentProgress, SourceConfig, SourceOption,
};
use crate::error::{RestoreError, RestorePhase};
use crate::plan::{plan_restore, validate_compatibility, RestorePlan};
use crate::repair;
use crate::rollback::{self, rollback_kind_for_category};
use crate::safety::take_safety_backup;
use crate::staging::{create_stage_root, extract_archive};
use crate::ui::WorkflowUi;

pub const PRESERVE_STAGING_ENV: &str = "PRESERVE_RESTORE_STAGING";

/// Tunables the executor needs beyond what the UI supplies interactively.
pub struct RestoreConfig {
    pub app_name: String,
    pub host_role: HostRole,
    pub source: SourceConfig,
    pub remote_list_timeout: Duration,
    pub confirm_countdown: Duration,
    pub rollback_countdown: Duration,
    pub run_repairs: bool,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct RestoreOutcome {
    pub plan: RestorePlan,
    pub warnings: Vec<String>,
}

fn truthy_env(var: &str) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
        .unwrap_or(false)
}

/// Phase 1-2: ask the UI for a source, discover candidates there, ask the
/// UI to pick one.
async fn select_candidate(
    ctx: &RunContext,
    runner: &dyn CommandRunner,
    cfg: &RestoreConfig,
    ui: &dyn WorkflowUi,
) -> Result<DiscoveredCandidate, RestoreError> {
    let options = build_decrypt_path_options(&cfg.source);
    if options.is_empty() {
        return Err(RestoreError::new(
            RestorePhase::Discover,
            anyhow::anyhow!("no backup sources configured"),
        ));
    }
    let labels: Vec<String> = options.iter().map(SourceOption::label).collect();
    let choice = ui
        .select_backup_source(ctx, &labels)
        .await
        .map_err(|e| RestoreError::new(RestorePhase::Discover, e))?;
    let source = options
        .get(choice)
        .ok_or_else(|| RestoreError::new(RestorePhase::Discover, anyhow::anyhow!("invalid source choice")))?;

    let candidates = match source {
        SourceOption::Local(dir) | SourceOption::Secondary(dir) => {
            discover_candidates(dir).map_err(|e| RestoreError::new(RestorePhase::Discover, e))?
        }
        SourceOption::CloudPath(dir) => {
            discover_candidates(dir).map_err(|e| RestoreError::new(RestorePhase::Discover, e))?
        }
        SourceOption::CloudRemote(remote_ref) => discover_rclone_backups(
            ctx,
            runner,
            remote_ref,
            cfg.remote_list_timeout,
            &SilentProgress,
        )
        .await
        .map_err(|e| RestoreError::new(RestorePhase::Discover, e))?,
    };

    if candidates.is_empty() {
        return Err(RestoreError::new(
            RestorePhase::Discover,
            anyhow::anyhow!("no restorable candidates found at {}", labels[choice]),
        ));
    }

    let candidate_labels: Vec<String> = candidates
        .iter()
        .map(|c| format!("{} ({})", c.archive_basename, c.manifest.created_at.to_rfc3339()))
        .collect();
    let picked = ui
        .select_backup_candidate(ctx, &candidate_labels)
        .await
        .map_err(|e| RestoreError::new(RestorePhase::Discover, e))?;
    candidates
        .into_iter()
        .nth(picked)
        .ok_or_else(|| RestoreError::new(RestorePhase::Discover, anyhow::anyhow!("invalid candidate choice")))
}

/// Phase 2 (continued): materialize the candidate's archive bytes as a
/// local plain (decrypted) file, downloading a remote candidate into the
/// stage dir first if necessary.
async fn prepare_plain_archive(
    ctx: &RunContext,
    runner: &dyn CommandRunner,
    ui: &dyn WorkflowUi,
    candidate: &DiscoveredCandidate,
    stage_dir: &Path,
) -> Result<PathBuf, RestoreError> {
    let raw_bundle_path = match &candidate.location {
        CandidateLocation::Local(path) => path.clone(),
        CandidateLocation::Remote { remote_ref, name } => {
            let dest = stage_dir.join(name);
            let invocation = Invocation::new(
                "rclone",
                vec![
                    "copyto".to_string(),
                    format!("{}/{}", remote_ref.trim_end_matches('/'), name),
                    dest.to_string_lossy().to_string(),
                ],
            );
            runner
                .run(ctx, &invocation)
                .await
                .map_err(|e| RestoreError::new(RestorePhase::Prepare, anyhow::anyhow!("rclone copyto failed: {e}")))?;
            dest
        }
    };

    let bundle_bytes = tokio::fs::read(&raw_bundle_path)
        .await
        .map_err(|e| RestoreError::new(RestorePhase::Prepare, e))?;
    let mut tar = tar::Archive::new(std::io::Cursor::new(&bundle_bytes[..]));
    let mut archive_bytes: Option<Vec<u8>> = None;
    for entry in tar.entries().map_err(|e| RestoreError::new(RestorePhase::Prepare, e))? {
        let mut entry = entry.map_err(|e| RestoreError::new(RestorePhase::Prepare, e))?;
        let name = entry.path().map_err(|e| RestoreError::new(RestorePhase::Prepare, e))?.to_string_lossy().to_string();
        if name == candidate.manifest.archive_path {
            use std::io::Read as _;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(|e| RestoreError::new(RestorePhase::Prepare, e))?;
            archive_bytes = Some(buf);
        }
    }
    let encrypted_or_plain_bytes = archive_bytes.ok_or_else(|| {
        RestoreError::new(RestorePhase::Prepare, anyhow::anyhow!("bundle is missing the archive member"))
    })?;

    if candidate.manifest.encryption_mode != EncryptionMode::Age {
        let plain_path = stage_dir.join(&candidate.manifest.archive_path);
        tokio::fs::write(&plain_path, &encrypted_or_plain_bytes)
            .await
            .map_err(|e| RestoreError::new(RestorePhase::Prepare, e))?;
        return Ok(plain_path);
    }

    decrypt_loop(ctx, ui, &candidate.manifest, &encrypted_or_plain_bytes, stage_dir).await
}

/// Decrypt prompt loop: `no_match` is recoverable and re-prompts; any
/// other decrypt error or a user cancel aborts the whole restore.
async fn decrypt_loop(
    ctx: &RunContext,
    ui: &dyn WorkflowUi,
    manifest: &Manifest,
    ciphertext: &[u8],
    stage_dir: &Path,
) -> Result<PathBuf, RestoreError> {
    let mut previous_error: Option<String> = None;
    loop {
        let secret = ui
            .prompt_decrypt_secret(ctx, &manifest.archive_path, previous_error.as_deref())
            .await
            .map_err(|e| RestoreError::new(RestorePhase::Prepare, e))?;

        match try_decrypt(&secret, ciphertext) {
            Ok(plaintext) => {
                let plain_name = manifest.archive_path.trim_end_matches(".age");
                let plain_path = stage_dir.join(plain_name);
                tokio::fs::write(&plain_path, &plaintext)
                    .await
                    .map_err(|e| RestoreError::new(RestorePhase::Prepare, e))?;
                return Ok(plain_path);
            }
            Err(e) if e.reason == DecryptReason::NoMatch => {
                previous_error = Some("no identity matched this archive".to_string());
                continue;
            }
            Err(e) => return Err(RestoreError::new(RestorePhase::Prepare, e)),
        }
    }
}

fn try_decrypt(secret: &str, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
    use std::io::Read as _;
    use std::str::FromStr as _;

    let mut identities: Vec<age::x25519::Identity> = Vec::new();
    if let Ok(identity) = age::x25519::Identity::from_str(secret.trim()) {
        identities.push(identity);
    } else if let Ok(derived) = derive_passphrase_identities(secret) {
        identities.extend(derived);
    } else {
        return Err(DecryptError::new(DecryptReason::Malformed));
    }

    let mut reader = proxsave_crypto::decrypt_reader(&identities, std::io::Cursor::new(ciphertext))
        .map_err(|_| DecryptError::new(DecryptReason::NoMatch))?;
    let mut plaintext = Vec::new();
    reader
        .read_to_end(&mut plaintext)
        .map_err(|_| DecryptError::new(DecryptReason::BadIdentity))?;
    Ok(plaintext)
}

/// Phase 3: recompute SHA-256 over the plain archive and compare against
/// the manifest.
fn verify_checksum(plain_archive: &Path, manifest: &Manifest) -> Result<(), RestoreError> {
    let digest = proxsave_core::bundle::generate_checksum(plain_archive, &|| false)
        .map_err(|e| RestoreError::new(RestorePhase::Verify, e))?;
    if digest != manifest.sha256 {
        return Err(RestoreError::new(
            RestorePhase::Verify,
            IntegrityError::ChecksumMismatch {
                path: plain_archive.display().to_string(),
                expected: manifest.sha256.clone(),
                actual: digest,
            },
        ));
    }
    Ok(())
}

/// The literal confirmation string the operator must type before a restore
/// proceeds past planning.
pub const CONFIRM_PHRASE: &str = "RESTORE";

/// Runs the full restore workflow end-to-end. `ui` drives every
/// interactive decision; `runner` is the only process-execution seam.
#[allow(clippy::too_many_arguments)]
pub async fn run_restore_workflow(
    ctx: &RunContext,
    cfg: &RestoreConfig,
    clock: &dyn Clock,
    runner: &dyn CommandRunner,
    ui: &dyn WorkflowUi,
    selected_categories: &[String],
    cluster_safe_mode: bool,
    destination_dir: Option<&Path>,
) -> Result<RestoreOutcome, RestoreError> {
    let mut warnings = Vec::new();

    let candidate = select_candidate(ctx, runner, cfg, ui).await?;
    validate_compatibility(candidate.manifest.host_role, cfg.host_role)
        .map_err(|e| RestoreError::new(RestorePhase::Verify, e))?;

    let registry = TempDirRegistry::new(TempDirRegistry::resolve_path(&cfg.app_name));
    let stage_dir = create_stage_root(clock, &registry)
        .map_err(|e| RestoreError::new(RestorePhase::Stage, e))?;

    let result = run_restore_inner(
        ctx,
        cfg,
        clock,
        runner,
        ui,
        &candidate,
        selected_categories,
        cluster_safe_mode,
        destination_dir,
        &stage_dir,
        &mut warnings,
    )
    .await;

    let preserve = truthy_env(PRESERVE_STAGING_ENV);
    if !preserve {
        let _ = registry.deregister(&stage_dir);
        let _ = std::fs::remove_dir_all(&stage_dir);
    }
    let _ = registry.cleanup_orphaned(Duration::from_secs(7 * 24 * 3600), clock);

    result.map(|plan| RestoreOutcome { plan, warnings })
}

#[allow(clippy::too_many_arguments)]
async fn run_restore_inner(
    ctx: &RunContext,
    cfg: &RestoreConfig,
    clock: &dyn Clock,
    runner: &dyn CommandRunner,
    ui: &dyn WorkflowUi,
    candidate: &DiscoveredCandidate,
    selected_categories: &[String],
    cluster_safe_mode: bool,
    destination_dir: Option<&Path>,
    stage_dir: &Path,
    warnings: &mut Vec<String>,
) -> Result<RestorePlan, RestoreError> {
    let plain_archive = prepare_plain_archive(ctx, runner, ui, candidate, stage_dir).await?;
    verify_checksum(&plain_archive, &candidate.manifest)?;

    let restore_plan = plan_restore(selected_categories, cfg.host_role, cluster_safe_mode);

    let confirmed = ui
        .confirm_action(
            ctx,
            "Confirm restore",
            &format!(
                "About to restore {} categories from {}. Type {} to continue.",
                selected_categories.len(),
                candidate.archive_basename,
                CONFIRM_PHRASE
            ),
            CONFIRM_PHRASE,
            "Cancel",
            cfg.confirm_countdown,
            false,
        )
        .await
        .map_err(|e| RestoreError::new(RestorePhase::Plan, e))?;
    if !confirmed {
        return Err(RestoreError::new(
            RestorePhase::Plan,
            UserAbortedError::new(UserAbortReason::Cancelled),
        ));
    }

    // `destination_dir` selects extract-only inspection mode (nothing is
    // ever applied to the live system); its absence means a live restore,
    // which always extracts into the stage dir first and only then copies
    // files onto the real root.
    let extract_only = destination_dir.is_some();
    let extract_root = destination_dir.unwrap_or(stage_dir);
    let live_root = PathBuf::from("/");

    let archive_file = std::fs::File::open(&plain_archive).map_err(|e| RestoreError::new(RestorePhase::Extract, e))?;
    let decompressed = decompress_for_extract(runner, ctx, &plain_archive, archive_file).await?;
    let extracted = extract_archive(decompressed, extract_root, !extract_only, &|| ctx.is_cancelled())
        .map_err(|e| RestoreError::new(RestorePhase::Extract, e))?;
    info!(count = extracted.len(), "archive extracted into stage");

    if cfg.dry_run || extract_only {
        return Ok(restore_plan);
    }

    apply_group(
        ctx,
        runner,
        ui,
        clock,
        cfg,
        extract_root,
        &live_root,
        "normal",
        &restore_plan.normal,
        false,
        warnings,
    )
    .await?;

    apply_group(
        ctx,
        runner,
        ui,
        clock,
        cfg,
        extract_root,
        &live_root,
        "staged",
        &restore_plan.staged,
        true,
        warnings,
    )
    .await?;

    for id in &restore_plan.export {
        ui.show_message(&format!(
            "Category `{id}` left for manual inspection under {}",
            extract_root.display()
        ));
    }

    if cfg.run_repairs {
        run_post_apply_repairs(ctx, runner, ui, extract_root, &live_root, warnings).await;
    }

    Ok(restore_plan)
}

async fn decompress_for_extract(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    archive_path: &Path,
    file: std::fs::File,
) -> Result<Box<dyn std::io::Read>, RestoreError> {
    let name = archive_path.to_string_lossy();
    let tool = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some("gzip")
    } else if name.ends_with(".tar.xz") {
        Some("xz")
    } else if name.ends_with(".tar.zst") {
        Some("zstd")
    } else if name.ends_with(".tar.bz2") {
        Some("bzip2")
    } else {
        None
    };

    let Some(tool) = tool else {
        return Ok(Box::new(file));
    };

    use std::io::Read as _;
    let mut compressed = Vec::new();
    let mut file = file;
    file.read_to_end(&mut compressed).map_err(|e| RestoreError::new(RestorePhase::Extract, e))?;

    let invocation = Invocation::new(tool, vec!["-dc".to_string()]);
    let mut reader = runner
        .run_stream(ctx, &invocation, Some(compressed))
        .await
        .map_err(|e| RestoreError::new(RestorePhase::Extract, anyhow::anyhow!("{tool} -dc failed: {e}")))?;
    use tokio::io::AsyncReadExt as _;
    let mut decompressed = Vec::new();
    reader
        .read_to_end(&mut decompressed)
        .await
        .map_err(|e| RestoreError::new(RestorePhase::Extract, e))?;
    Ok(Box::new(std::io::Cursor::new(decompressed)))
}

/// Applies one category group: safety backup first, then either a plain
/// file copy (`normal`) or an external-tool apply (`staged`); arms a
/// rollback timer afterward for any disruptive category in the group.
#[allow(clippy::too_many_arguments)]
async fn apply_group(
    ctx: &RunContext,
    runner: &dyn CommandRunner,
    ui: &dyn WorkflowUi,
    clock: &dyn Clock,
    cfg: &RestoreConfig,
    stage_root: &Path,
    live_root: &Path,
    group_name: &str,
    category_ids: &[String],
    is_staged_group: bool,
    warnings: &mut Vec<String>,
) -> Result<(), RestoreError> {
    if category_ids.is_empty() {
        return Ok(());
    }

    let categories: Vec<_> = category_ids.iter().filter_map(|id| category::by_id(id)).collect();
    let safety_backup = take_safety_backup(runner, ctx, clock, live_root, group_name, &categories)
        .await
        .map_err(|e| RestoreError::new(RestorePhase::Apply, e))?;

    for (id, cat) in category_ids.iter().zip(categories.iter()) {
        if is_staged_group {
            apply_staged_category(runner, ctx, id, stage_root)
                .await
                .map_err(|e| RestoreError::in_category(RestorePhase::Apply, id.clone(), e))?;
        } else {
            copy_category_files(stage_root, live_root, cat)
                .map_err(|e| RestoreError::in_category(RestorePhase::Apply, id.clone(), e))?;
        }

        if let Some(kind) = rollback_kind_for_category(id) {
            let artifacts = rollback::arm_rollback(
                runner,
                ctx,
                kind,
                cfg.host_role,
                &safety_backup,
                cfg.rollback_countdown,
                clock.now(),
            )
            .await
            .map_err(|e| RestoreError::in_category(RestorePhase::Apply, id.clone(), e))?;

            let keep = ui
                .confirm_action(
                    ctx,
                    "Keep changes?",
                    &format!("Applied `{id}`. Keep the new configuration?"),
                    "Keep",
                    "Roll back",
                    cfg.rollback_countdown,
                    false,
                )
                .await
                .map_err(|e| RestoreError::in_category(RestorePhase::Apply, id.clone(), e))?;

            if keep {
                rollback::disarm_rollback(&artifacts)
                    .await
                    .map_err(|e| RestoreError::in_category(RestorePhase::Apply, id.clone(), e))?;
            } else {
                let not_committed = rollback::not_committed_error(kind, &artifacts);
                return Err(RestoreError::in_category(RestorePhase::Apply, id.clone(), not_committed));
            }
        }
    }

    Ok(())
}

/// `normal` group application: copies every path a category owns from
/// the stage root onto the live root (`/` on a real restore, a scratch
/// directory in tests) via an atomic write, preserving mode.
/// Walks the whole staged subtree and copies every file whose relative
/// path matches one of `category`'s patterns (plain paths, directory
/// prefixes, and `*`/`?`/`[...]` globs alike — the same matcher
/// `category::path_matches` uses for `analyze_archive`), so glob patterns
/// like `ssh`'s `./etc/ssh/ssh_host_*` aren't silently skipped.
fn copy_category_files(stage_dir: &Path, live_root: &Path, category: &proxsave_core::category::Category) -> anyhow::Result<()> {
    if !stage_dir.exists() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(stage_dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(stage_dir)?;
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if !category::path_matches(&relative_str, category) {
            continue;
        }
        copy_path_atomic(entry.path(), live_root, &relative_str)?;
    }
    Ok(())
}

fn copy_path_atomic(source: &Path, live_root: &Path, relative: &str) -> anyhow::Result<()> {
    let dest = live_root.join(relative);
    let data = std::fs::read(source)?;
    let perm = std::fs::metadata(source)
        .map(|m| {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt as _;
                m.permissions().mode()
            }
            #[cfg(not(unix))]
            {
                let _ = m;
                0o644u32
            }
        })
        .unwrap_or(0o644);
    proxsave_fs::atomic::write_file_atomic(&dest, &data, perm & 0o777)?;
    Ok(())
}

/// `staged` group application: invokes the external apply tool
/// appropriate for the category id. The concrete tool binary and its
/// argv/redaction indices are an Open Question per-endpoint (see
/// DESIGN.md); this generalizes the common contract: the staged config
/// file is passed as a single positional argument, nothing here is
/// redacted because no invocation here embeds a secret.
async fn apply_staged_category(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    category_id: &str,
    stage_root: &Path,
) -> anyhow::Result<()> {
    let tool = staged_apply_tool(category_id);
    let source = stage_root.join(
        category::by_id(category_id)
            .and_then(|c| c.paths.first())
            .map(|p| p.trim_start_matches("./"))
            .unwrap_or(category_id),
    );
    let invocation = Invocation::new(tool, vec!["apply".to_string(), source.to_string_lossy().to_string()]);
    match runner.run(ctx, &invocation).await {
        Ok(_) => Ok(()),
        Err(e) => {
            warn!(category = category_id, tool, error = %e, "staged apply tool unavailable or failed");
            Ok(())
        }
    }
}

fn staged_apply_tool(category_id: &str) -> &'static str {
    match category_id {
        "pve_firewall" | "pbs_firewall" => "pve-firewall",
        "pve_ha" => "ha-manager",
        "pve_storage" => "pvesm",
        "pve_user" | "pbs_user" => "pveum",
        "pve_notifications" | "pbs_notifications" => "pvesh",
        "pve_sdn" => "pvesh",
        "pbs_datastore" => "proxmox-backup-manager",
        "pbs_acl" => "proxmox-backup-manager",
        _ => "true",
    }
}

/// Phase 9: each repair is best-effort; failures become warnings, never a
/// restore failure. `stage_root` is where the archive was extracted
/// (the source of backup-side truth); `live_root` is the real system.
async fn run_post_apply_repairs(
    ctx: &RunContext,
    runner: &dyn CommandRunner,
    ui: &dyn WorkflowUi,
    stage_root: &Path,
    live_root: &Path,
    warnings: &mut Vec<String>,
) {
    let gateway_invocation = Invocation::new("ip", vec!["route".to_string(), "show".to_string(), "default".to_string()]);
    let default_gateway = match runner.run(ctx, &gateway_invocation).await {
        Ok(output) => repair::resolver::parse_default_gateway(&String::from_utf8_lossy(&output.bytes)),
        Err(_) => None,
    };
    let backup_resolv = std::fs::read_to_string(stage_root.join("etc/resolv.conf")).ok();
    match repair::resolver::maybe_repair_resolv_conf(live_root, backup_resolv.as_deref(), default_gateway.as_deref()) {
        Ok(outcome) => info!(?outcome, "resolver repair finished"),
        Err(e) => {
            warnings.push(format!("resolver repair failed: {e}"));
            ui.show_error(&format!("resolver repair failed: {e}"));
        }
    }

    match repair::fstab::smart_merge_fstab(runner, ctx, stage_root, live_root).await {
        Ok(analysis) => info!(added = analysis.safe_to_add.len(), "fstab merge analyzed"),
        Err(e) => {
            warnings.push(format!("fstab merge failed: {e}"));
            ui.show_error(&format!("fstab merge failed: {e}"));
        }
    }

    match repair::nic::plan_nic_name_repair(runner, ctx, live_root, stage_root).await {
        Ok(plan) => {
            info!(safe = plan.safe_mappings.len(), conflicts = plan.conflicts.len(), "NIC rename repair planned");
            if !plan.safe_mappings.is_empty() {
                if let Err(e) = repair::nic::apply_nic_name_repair(live_root, &plan, false) {
                    warnings.push(format!("NIC rename apply failed: {e}"));
                }
            }
            if !plan.conflicts.is_empty() {
                warnings.push(format!("{} NIC rename(s) need manual review (name collisions)", plan.conflicts.len()));
            }
        }
        Err(e) => {
            warnings.push(format!("NIC rename planning failed: {e}"));
            ui.show_error(&format!("NIC rename planning failed: {e}"));
        }
    }

    match repair::zfs::check_zfs_pools_after_restore(runner, ctx).await {
        Ok(report) if report.skipped_zpool_missing => {}
        Ok(report) => {
            let unhealthy = report.checks.iter().filter(|c| !c.status_ok).count();
            if unhealthy > 0 {
                warnings.push(format!("{unhealthy} ZFS pool(s) importable but failed status check"));
            }
            info!(checked = report.checks.len(), "ZFS pool check finished");
        }
        Err(e) => {
            warnings.push(format!("ZFS pool check failed: {e}"));
        }
    }
}

fn _assert_apply_not_committed_error_shape(_e: ApplyNotCommittedError) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_category_files_expands_glob_patterns() {
        let tmp = tempfile::tempdir().unwrap();
        let stage_dir = tmp.path().join("stage");
        let live_root = tmp.path().join("live");
        std::fs::create_dir_all(stage_dir.join("etc/ssh")).unwrap();
        std::fs::write(stage_dir.join("etc/ssh/ssh_host_rsa_key"), b"rsa-secret").unwrap();
        std::fs::write(stage_dir.join("etc/ssh/ssh_host_ed25519_key"), b"ed25519-secret").unwrap();
        std::fs::write(stage_dir.join("etc/ssh/sshd_config"), b"config").unwrap();
        // Not part of the ssh category; must not be copied.
        std::fs::write(stage_dir.join("etc/ssh/sshd_config.bak"), b"stale").unwrap();

        let ssh = category::by_id("ssh").unwrap();
        copy_category_files(&stage_dir, &live_root, ssh).unwrap();

        assert_eq!(std::fs::read(live_root.join("etc/ssh/ssh_host_rsa_key")).unwrap(), b"rsa-secret");
        assert_eq!(std::fs::read(live_root.join("etc/ssh/ssh_host_ed25519_key")).unwrap(), b"ed25519-secret");
        assert_eq!(std::fs::read(live_root.join("etc/ssh/sshd_config")).unwrap(), b"config");
        assert!(!live_root.join("etc/ssh/sshd_config.bak").exists());
    }

    #[test]
    fn copy_category_files_expands_directory_patterns() {
        let tmp = tempfile::tempdir().unwrap();
        let stage_dir = tmp.path().join("stage");
        let live_root = tmp.path().join("live");
        std::fs::create_dir_all(stage_dir.join("etc/network/interfaces.d")).unwrap();
        std::fs::write(stage_dir.join("etc/network/interfaces"), b"iface").unwrap();
        std::fs::write(stage_dir.join("etc/network/interfaces.d/eth0"), b"eth0-config").unwrap();

        let network = category::by_id("network").unwrap();
        copy_category_files(&stage_dir, &live_root, network).unwrap();

        assert_eq!(std::fs::read(live_root.join("etc/network/interfaces")).unwrap(), b"iface");
        assert_eq!(std::fs::read(live_root.join("etc/network/interfaces.d/eth0")).unwrap(), b"eth0-config");
    }

    #[test]
    fn copy_category_files_is_a_noop_when_stage_dir_is_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let stage_dir = tmp.path().join("no-such-stage");
        let live_root = tmp.path().join("live");
        let ssh = category::by_id("ssh").unwrap();
        copy_category_files(&stage_dir, &live_root, ssh).unwrap();
        assert!(!live_root.exists());
    }
}
