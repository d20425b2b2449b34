//! The backup pipeline orchestrator: runs the nine phases strictly in
//! order, wrapping every phase's failure in `BackupError{phase, ...}`.
//! Restartable only at `Preflight`; there is no partial-resume.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use proxsave_cmd::{CommandRunner, RunContext};
use proxsave_core::bundle::{create_bundle, generate_checksum};
use proxsave_core::manifest::{CompressionType, EncryptionMode, Manifest};
use proxsave_core::tempreg::TempDirRegistry;
use proxsave_storage::retention::RetentionPolicy;
use proxsave_storage::target::{StorageTarget, UploadMetadata};
use proxsave_storage::BackupStats;
use serde_json::Map;
use tracing::{info, warn};

use crate::archive::{build_archive, write_checksum_sidecar, FsErrorPolicy};
use crate::collect::Collector;
use crate::compress::compress_archive;
use crate::config::BackupConfig;
use crate::encrypt::encrypt_archive;
use crate::error::{BackupError, BackupPhase};
use crate::lock::BackupLock;
use crate::{dispatch, metrics};

pub struct BackupOutcome {
    pub stats: BackupStats,
    pub metrics_text: String,
}

/// Ensures an encryption identity is configured before phase 6 runs. The
/// interactive wizard (C14's `EnsureAgeRecipientsReady`) lives in the
/// outer shell; this crate only needs a resolved recipient list.
pub trait RecipientProvider: Send + Sync {
    fn ensure_recipients(&self, configured: &[String]) -> anyhow::Result<Vec<String>>;
}

pub struct ConfiguredRecipients;

impl RecipientProvider for ConfiguredRecipients {
    fn ensure_recipients(&self, configured: &[String]) -> anyhow::Result<Vec<String>> {
        Ok(configured.to_vec())
    }
}

pub async fn run_backup(
    config: &BackupConfig,
    collector: &dyn Collector,
    recipient_provider: &dyn RecipientProvider,
    tiers: &[Box<dyn StorageTarget>],
    runner: &dyn CommandRunner,
    ctx: &RunContext,
) -> Result<BackupOutcome, BackupError> {
    let mut stats = BackupStats::default();
    let start = Instant::now();

    // Phase 1: Preflight.
    let _lock = BackupLock::acquire(&config.backup_dir, config.stale_lock_threshold)
        .map_err(|e| BackupError::new(BackupPhase::Preflight, e))?;
    std::fs::create_dir_all(&config.log_dir)
        .map_err(|e| BackupError::new(BackupPhase::Preflight, e))?;

    let recipients = recipient_provider
        .ensure_recipients(&config.recipients)
        .map_err(|e| BackupError::new(BackupPhase::Preflight, e))?;

    let registry = TempDirRegistry::new(TempDirRegistry::resolve_path(&config.app_name));
    let clock = proxsave_core::clock::SystemClock::default();
    if let Ok((removed, failed)) = registry.cleanup_orphaned(config.temp_dir_max_age, &clock) {
        if failed > 0 {
            warn!(removed, failed, "some orphaned temp dirs could not be cleaned up");
        }
    }

    // Phase 2: Collect.
    let paths = collector
        .collect(config.host_role, config.mode, &config.categories)
        .map_err(|e| BackupError::new(BackupPhase::Collect, e))?;
    info!(path_count = paths.len(), "collected categories");

    // Phase 3: Archive.
    let timestamp = chrono::Utc::now();
    let base_name = format!(
        "{}-backup-{}.tar",
        config.host_role.as_str(),
        timestamp.format("%Y%m%d-%H%M%S")
    );
    let tar_path = config.backup_dir.join(&base_name);
    std::fs::create_dir_all(&config.backup_dir)
        .map_err(|e| BackupError::new(BackupPhase::Archive, e))?;

    let build = build_archive(&paths, &tar_path, FsErrorPolicy::ContinueAndRecord)
        .map_err(|e| BackupError::new(BackupPhase::Archive, e))?;
    stats.warnings += build.issues.warnings_total;
    stats.errors += build.issues.errors_total;

    let compressed = compress_archive(
        runner,
        ctx,
        &tar_path,
        config.compression,
        config.compression_level,
        config.compression_threads,
    )
    .await
        .map_err(|e| BackupError::new(BackupPhase::Archive, e))?;

    stats.requested_compression = Some(format!("{:?}", compressed.requested).to_lowercase());
    stats.compression = Some(format!("{:?}", compressed.effective).to_lowercase());

    // Phase 4: Checksum (over the plaintext, pre-encryption).
    let plain_path = compressed.compressed_path.clone();
    let plain_digest = generate_checksum(&plain_path, &|| ctx.is_cancelled())
        .map_err(|e| BackupError::new(BackupPhase::Checksum, e))?;
    write_checksum_sidecar(&plain_path, &plain_digest)
        .map_err(|e| BackupError::new(BackupPhase::Checksum, e))?;
    let plain_size = std::fs::metadata(&plain_path)
        .map_err(|e| BackupError::new(BackupPhase::Checksum, e))?
        .len();

    // Phase 5: Manifest.
    let mut manifest = Manifest {
        archive_path: file_name_string(&plain_path),
        archive_size: plain_size,
        sha256: plain_digest,
        encryption_mode: EncryptionMode::None,
        compression_type: compressed.effective,
        requested_compression_type: compressed.requested,
        compression_mode: config.compression_mode.clone(),
        compression_level: config.compression_level,
        compression_threads: config.compression_threads,
        created_at: timestamp,
        script_version: config.script_version.clone(),
        hostname: config.hostname.clone(),
        host_role: config.host_role,
        host_version: config.host_version.clone(),
        cluster_mode: config.cluster_mode,
        targets: [config.host_role.as_str().to_string()].into_iter().collect(),
        extra: Map::new(),
    };

    let mut final_archive_path = plain_path.clone();

    // Phase 6: Encrypt (optional).
    if !recipients.is_empty() {
        let outcome = encrypt_archive(&plain_path, &recipients)
            .map_err(|e| BackupError::new(BackupPhase::Encrypt, e))?;
        manifest.encryption_mode = EncryptionMode::Age;
        manifest.archive_path = file_name_string(&outcome.encrypted_path);

        let encrypted_digest = generate_checksum(&outcome.encrypted_path, &|| ctx.is_cancelled())
            .map_err(|e| BackupError::new(BackupPhase::Encrypt, e))?;
        write_checksum_sidecar(&outcome.encrypted_path, &encrypted_digest)
            .map_err(|e| BackupError::new(BackupPhase::Encrypt, e))?;
        final_archive_path = outcome.encrypted_path;
    }

    if !manifest.validate_encryption_marker() {
        return Err(BackupError::new(
            BackupPhase::Encrypt,
            anyhow::anyhow!("encryption marker invariant violated"),
        ));
    }

    let metadata_path = {
        let mut s = final_archive_path.as_os_str().to_os_string();
        s.push(".metadata");
        PathBuf::from(s)
    };
    proxsave_fs::atomic::write_file_atomic(
        &metadata_path,
        &serde_json::to_vec_pretty(&manifest.to_json()).unwrap(),
        0o640,
    )
    .map_err(|e| BackupError::new(BackupPhase::Manifest, e))?;

    // Phase 7: Bundle.
    let bundle_path = create_bundle(&final_archive_path)
        .map_err(|e| BackupError::new(BackupPhase::Bundle, e))?;

    for sidecar in [
        final_archive_path.clone(),
        metadata_path,
        {
            let mut s = final_archive_path.as_os_str().to_os_string();
            s.push(".sha256");
            PathBuf::from(s)
        },
    ] {
        let _ = std::fs::remove_file(&sidecar);
    }

    stats.archive_path = Some(bundle_path.to_string_lossy().to_string());

    // Phase 8: Dispatch.
    if !config.dry_run {
        let upload_metadata = UploadMetadata {
            archive_basename: file_name_string(&bundle_path),
            manifest_created_at: manifest.created_at,
            size: std::fs::metadata(&bundle_path).map(|m| m.len()).unwrap_or(0),
        };
        dispatch::dispatch_all(ctx, tiers, &bundle_path, &upload_metadata, &config.retention, &mut stats)
            .await
            .map_err(|e| BackupError::new(BackupPhase::Dispatch, e))?;
    }

    // Phase 9: Finalize.
    let report_path = config.log_dir.join(format!("{base_name}.report.json"));
    proxsave_fs::atomic::write_file_atomic(
        &report_path,
        &serde_json::to_vec_pretty(&stats).unwrap(),
        0o640,
    )
    .map_err(|e| BackupError::new(BackupPhase::Finalize, e))?;
    stats.report_path = Some(report_path.to_string_lossy().to_string());

    let archive_bytes = std::fs::metadata(&bundle_path).map(|m| m.len()).unwrap_or(0);
    let metrics_text = metrics::render(&stats, archive_bytes, start.elapsed().as_secs_f64());

    info!(elapsed_ms = start.elapsed().as_millis() as u64, "backup run finished");
    Ok(BackupOutcome { stats, metrics_text })
}

fn file_name_string(path: &PathBuf) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Default stale-lock threshold used by the outer shell's config layer
/// when no override is set. Configurable; one hour is a conservative
/// default for a lock file that should only ever be held for the
/// duration of a single backup run.
pub const DEFAULT_STALE_LOCK_THRESHOLD: Duration = Duration::from_secs(3600);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::Collector;
    use proxsave_cmd::fake::FakeRunner;
    use proxsave_core::category::{BackupMode, HostRole};
    use std::path::PathBuf;

    struct FixedCollector(Vec<PathBuf>);

    impl Collector for FixedCollector {
        fn collect(&self, _role: HostRole, _mode: BackupMode, _categories: &[String]) -> anyhow::Result<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    fn base_config(dir: &std::path::Path) -> BackupConfig {
        BackupConfig {
            app_name: "proxsave".into(),
            backup_dir: dir.join("backups"),
            log_dir: dir.join("logs"),
            host_role: HostRole::Virtualization,
            mode: BackupMode::Full,
            categories: vec![],
            compression: CompressionType::None,
            compression_mode: "default".into(),
            compression_level: 0,
            compression_threads: 1,
            recipients: vec![],
            retention: RetentionPolicy::disabled(),
            stale_lock_threshold: DEFAULT_STALE_LOCK_THRESHOLD,
            temp_dir_max_age: Duration::from_secs(86400),
            dry_run: false,
            cluster_mode: false,
            script_version: "1.0.0".into(),
            host_version: "8.2".into(),
            hostname: "pve-node-1".into(),
        }
    }

    #[tokio::test]
    async fn happy_path_backup_produces_a_three_member_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("conf.d");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.conf"), b"hello").unwrap();

        let config = base_config(tmp.path());
        let collector = FixedCollector(vec![src]);
        let recipients = ConfiguredRecipients;
        let tiers: Vec<Box<dyn StorageTarget>> = vec![];
        let runner = FakeRunner::new();
        let ctx = RunContext::new();

        let outcome = run_backup(&config, &collector, &recipients, &tiers, &runner, &ctx)
            .await
            .unwrap();

        let archive_path = outcome.stats.archive_path.clone().unwrap();
        assert!(archive_path.ends_with(".bundle.tar"));

        let bytes = std::fs::read(&archive_path).unwrap();
        let mut archive = tar::Archive::new(&bytes[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names[0].ends_with(".metadata"));
        assert!(names[2].ends_with(".sha256"));
    }

    #[tokio::test]
    async fn compressor_fallback_is_recorded_on_stats() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("conf.d");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.conf"), b"hello").unwrap();

        let mut config = base_config(tmp.path());
        config.compression = CompressionType::Xz;

        let collector = FixedCollector(vec![src]);
        let recipients = ConfiguredRecipients;
        let tiers: Vec<Box<dyn StorageTarget>> = vec![];
        let runner = FakeRunner::new();
        runner.script(
            "xz",
            proxsave_cmd::fake::ScriptedResponse { output: Err(proxsave_cmd::fake::FakeRunError::NotFound) },
        );
        runner.script_success("gzip", b"gzipped".to_vec());
        let ctx = RunContext::new();

        let outcome = run_backup(&config, &collector, &recipients, &tiers, &runner, &ctx)
            .await
            .unwrap();

        assert_eq!(outcome.stats.requested_compression.as_deref(), Some("xz"));
        assert_eq!(outcome.stats.compression.as_deref(), Some("gzip"));
        let archive_path = outcome.stats.archive_path.clone().unwrap();
        assert!(archive_path.ends_with(".tar.gz.bundle.tar"));
    }
}
