//! Phase 8, Dispatch: hands the finished bundle to every enabled storage
//! tier in turn via `proxsave_storage::sync_tier`, folding each tier's
//! result onto the shared `BackupStats` record.

use std::path::Path;

use proxsave_cmd::RunContext;
use proxsave_storage::retention::RetentionPolicy;
use proxsave_storage::target::{StorageTarget, UploadMetadata};
use proxsave_storage::{sync_tier, BackupStats, StorageError};

/// Runs `sync_tier` against every tier in order, returning on the first
/// critical-tier error. Tiers already dispatched keep their recorded
/// stats even if a later tier aborts the phase.
pub async fn dispatch_all(
    ctx: &RunContext,
    tiers: &[Box<dyn StorageTarget>],
    bundle_path: &Path,
    metadata: &UploadMetadata,
    retention: &RetentionPolicy,
    stats: &mut BackupStats,
) -> Result<(), StorageError> {
    for tier in tiers {
        let tier_stats = sync_tier(ctx, tier.as_ref(), bundle_path, metadata, retention).await?;
        stats.set_tier(tier_stats);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxsave_storage::target::{FsInfo, RemoteEntry, TierLocation, TierUsage};

    struct StubTier {
        name: String,
        critical: bool,
        fail_store: bool,
    }

    #[async_trait::async_trait]
    impl StorageTarget for StubTier {
        fn name(&self) -> &str {
            &self.name
        }
        fn location(&self) -> TierLocation {
            TierLocation { secondary: Some("stub".into()), ..Default::default() }
        }
        fn is_enabled(&self) -> bool {
            true
        }
        fn is_critical(&self) -> bool {
            self.critical
        }
        async fn detect_filesystem(&self, _ctx: &RunContext) -> Result<FsInfo, StorageError> {
            Ok(FsInfo { filesystem_type: "ext4".into(), available_bytes: 1, total_bytes: 1 })
        }
        async fn store(
            &self,
            _ctx: &RunContext,
            _local_path: &Path,
            _metadata: &UploadMetadata,
        ) -> Result<(), StorageError> {
            if self.fail_store {
                Err(StorageError::new(&self.name, "boom", self.critical))
            } else {
                Ok(())
            }
        }
        async fn list(&self, _ctx: &RunContext) -> Result<Vec<RemoteEntry>, StorageError> {
            Ok(vec![])
        }
        async fn delete(&self, _ctx: &RunContext, _remote_path: &str) -> Result<(), StorageError> {
            Ok(())
        }
        async fn apply_retention(
            &self,
            _ctx: &RunContext,
            _policy: &RetentionPolicy,
        ) -> Result<u64, StorageError> {
            Ok(0)
        }
        async fn verify_upload(&self, _ctx: &RunContext, _local: &Path, _remote: &str) -> Result<bool, StorageError> {
            Ok(true)
        }
        async fn get_stats(&self, _ctx: &RunContext) -> Result<TierUsage, StorageError> {
            Ok(TierUsage { total_backups: 1, available_space: Some(1), total_space: Some(1) })
        }
    }

    #[tokio::test]
    async fn non_critical_failure_is_recorded_not_propagated() {
        let tiers: Vec<Box<dyn StorageTarget>> = vec![Box::new(StubTier {
            name: "secondary".into(),
            critical: false,
            fail_store: true,
        })];
        let ctx = RunContext::new();
        let metadata = UploadMetadata {
            archive_basename: "x.bundle.tar".into(),
            manifest_created_at: chrono::Utc::now(),
            size: 1,
        };
        let retention = RetentionPolicy::disabled();
        let mut stats = BackupStats::default();

        dispatch_all(&ctx, &tiers, Path::new("/tmp/x.bundle.tar"), &metadata, &retention, &mut stats)
            .await
            .unwrap();

        assert_eq!(stats.tier("secondary").unwrap().status, proxsave_storage::TierStatus::Error);
    }

    #[tokio::test]
    async fn critical_failure_propagates() {
        let tiers: Vec<Box<dyn StorageTarget>> = vec![Box::new(StubTier {
            name: "primary".into(),
            critical: true,
            fail_store: true,
        })];
        let ctx = RunContext::new();
        let metadata = UploadMetadata {
            archive_basename: "x.bundle.tar".into(),
            manifest_created_at: chrono::Utc::now(),
            size: 1,
        };
        let retention = RetentionPolicy::disabled();
        let mut stats = BackupStats::default();

        let result =
            dispatch_all(&ctx, &tiers, Path::new("/tmp/x.bundle.tar"), &metadata, &retention, &mut stats).await;
        assert!(result.is_err());
    }
}
