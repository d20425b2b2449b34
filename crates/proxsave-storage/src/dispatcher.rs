//! Adapter behavior shared by every tier: on a critical
//! tier's failure, propagate; on a non-critical tier's failure, record
//! status on the stats record and keep going. This is the only place
//! that branches on `is_critical()` — concrete `StorageTarget`
//! implementations never see the distinction.

use std::path::Path;

use proxsave_cmd::RunContext;
use tracing::{info, warn};

use crate::retention::RetentionPolicy;
use crate::stats::{TierCapacity, TierStats, TierStatus};
use crate::target::{StorageTarget, UploadMetadata};
use crate::StorageError;

/// Dispatch a single tier: detect filesystem, store, apply retention,
/// fetch stats — in that order, short-circuiting per the critical/
/// non-critical dispatch rules above.
pub async fn sync_tier(
    ctx: &RunContext,
    tier: &dyn StorageTarget,
    local_path: &Path,
    metadata: &UploadMetadata,
    retention: &RetentionPolicy,
) -> Result<TierStats, StorageError> {
    if !tier.is_enabled() {
        return Ok(TierStats::disabled(tier.name()));
    }

    let name = tier.name().to_string();
    info!(tier = %name, "dispatching backup to tier");

    if let Err(e) = tier.detect_filesystem(ctx).await {
        if tier.is_critical() {
            return Err(e);
        }
        warn!(tier = %name, error = %e, "non-critical tier filesystem detection failed");
        return Ok(TierStats {
            name,
            status: TierStatus::Error,
            backups: 0,
            retention_removed: 0,
            capacity: TierCapacity {
                available_space: None,
                total_space: None,
            },
        });
    }

    let mut status = TierStatus::Ok;

    if let Err(e) = tier.store(ctx, local_path, metadata).await {
        if tier.is_critical() {
            return Err(e);
        }
        warn!(tier = %name, error = %e, "non-critical tier store failed");
        status = TierStatus::Error;
    }

    let retention_removed = match tier.apply_retention(ctx, retention).await {
        Ok(removed) => removed,
        Err(e) => {
            warn!(tier = %name, error = %e, "retention application failed");
            if status == TierStatus::Ok {
                status = TierStatus::Warning;
            }
            0
        }
    };

    let usage = tier.get_stats(ctx).await.unwrap_or_default();

    Ok(TierStats {
        name,
        status,
        backups: usage.total_backups,
        retention_removed,
        capacity: TierCapacity {
            available_space: usage.available_space,
            total_space: usage.total_space,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{FsInfo, RemoteEntry, TierLocation, TierUsage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubTier {
        enabled: bool,
        critical: bool,
        detect_fails: AtomicBool,
        store_fails: AtomicBool,
        retention_fails: AtomicBool,
        retention_removed: Mutex<u64>,
    }

    #[async_trait]
    impl StorageTarget for StubTier {
        fn name(&self) -> &str {
            "stub"
        }
        fn location(&self) -> TierLocation {
            TierLocation::default()
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        fn is_critical(&self) -> bool {
            self.critical
        }
        async fn detect_filesystem(&self, _ctx: &RunContext) -> Result<FsInfo, StorageError> {
            if self.detect_fails.load(Ordering::SeqCst) {
                return Err(StorageError::critical("stub", "disk unavailable"));
            }
            Ok(FsInfo {
                filesystem_type: "ext4".into(),
                available_bytes: 1,
                total_bytes: 2,
            })
        }
        async fn store(
            &self,
            _ctx: &RunContext,
            _local_path: &Path,
            _metadata: &UploadMetadata,
        ) -> Result<(), StorageError> {
            if self.store_fails.load(Ordering::SeqCst) {
                return Err(StorageError::new("stub", "store failed", self.critical));
            }
            Ok(())
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
            if self.retention_fails.load(Ordering::SeqCst) {
                return Err(StorageError::new("stub", "retention failed", false));
            }
            Ok(*self.retention_removed.lock().unwrap())
        }
        async fn verify_upload(
            &self,
            _ctx: &RunContext,
            _local_path: &Path,
            _remote_path: &str,
        ) -> Result<bool, StorageError> {
            Ok(true)
        }
        async fn get_stats(&self, _ctx: &RunContext) -> Result<TierUsage, StorageError> {
            Ok(TierUsage {
                total_backups: 3,
                available_space: Some(10),
                total_space: Some(20),
            })
        }
    }

    fn meta() -> UploadMetadata {
        UploadMetadata {
            archive_basename: "a.tar".into(),
            manifest_created_at: chrono::Utc::now(),
            size: 10,
        }
    }

    #[tokio::test]
    async fn disabled_tier_short_circuits() {
        let tier = StubTier { enabled: false, ..Default::default() };
        let ctx = RunContext::new();
        let stats = sync_tier(&ctx, &tier, Path::new("/x"), &meta(), &RetentionPolicy::disabled())
            .await
            .unwrap();
        assert_eq!(stats.status, TierStatus::Disabled);
    }

    #[tokio::test]
    async fn critical_store_failure_propagates() {
        let tier = StubTier {
            enabled: true,
            critical: true,
            ..Default::default()
        };
        tier.store_fails.store(true, Ordering::SeqCst);
        let ctx = RunContext::new();
        let err = sync_tier(&ctx, &tier, Path::new("/x"), &meta(), &RetentionPolicy::disabled())
            .await
            .unwrap_err();
        assert!(err.critical);
    }

    #[tokio::test]
    async fn non_critical_store_failure_is_recorded_and_run_continues() {
        let tier = StubTier {
            enabled: true,
            critical: false,
            ..Default::default()
        };
        tier.store_fails.store(true, Ordering::SeqCst);
        let ctx = RunContext::new();
        let stats = sync_tier(&ctx, &tier, Path::new("/x"), &meta(), &RetentionPolicy::disabled())
            .await
            .unwrap();
        assert_eq!(stats.status, TierStatus::Error);
        assert_eq!(stats.backups, 3);
    }

    #[tokio::test]
    async fn retention_failure_sets_warning_not_error() {
        let tier = StubTier {
            enabled: true,
            critical: false,
            ..Default::default()
        };
        tier.retention_fails.store(true, Ordering::SeqCst);
        let ctx = RunContext::new();
        let stats = sync_tier(&ctx, &tier, Path::new("/x"), &meta(), &RetentionPolicy::disabled())
            .await
            .unwrap();
        assert_eq!(stats.status, TierStatus::Warning);
    }
}
