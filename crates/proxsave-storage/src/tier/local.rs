//! A local-directory tier: the primary backup destination, or a
//! secondary disk/SSH-mounted directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proxsave_cmd::RunContext;
use tracing::{debug, warn};

use crate::retention::{plan_retention, RetentionPolicy};
use crate::target::{FsInfo, RemoteEntry, StorageTarget, TierLocation, TierUsage, UploadMetadata};
use crate::StorageError;

#[derive(Debug, Clone)]
pub struct LocalTier {
    name: String,
    dir: PathBuf,
    enabled: bool,
    critical: bool,
}

impl LocalTier {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, enabled: bool, critical: bool) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            enabled,
            critical,
        }
    }

    fn bundle_path(&self, basename: &str) -> PathBuf {
        self.dir.join(basename)
    }
}

#[async_trait]
impl StorageTarget for LocalTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> TierLocation {
        TierLocation {
            primary: Some(self.dir.display().to_string()),
            secondary: None,
            cloud: None,
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    async fn detect_filesystem(&self, _ctx: &RunContext) -> Result<FsInfo, StorageError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            if self.critical {
                StorageError::critical(&self.name, format!("cannot create {}: {e}", self.dir.display()))
            } else {
                StorageError::new(&self.name, format!("cannot create {}: {e}", self.dir.display()), false)
            }
        })?;

        let available = fs2::available_space(&self.dir).unwrap_or(0);
        let total = fs2::total_space(&self.dir).unwrap_or(0);
        Ok(FsInfo {
            filesystem_type: "local".to_string(),
            available_bytes: available,
            total_bytes: total,
        })
    }

    async fn store(
        &self,
        _ctx: &RunContext,
        local_path: &Path,
        metadata: &UploadMetadata,
    ) -> Result<(), StorageError> {
        let dest = self.bundle_path(&metadata.archive_basename);
        debug!(tier = %self.name, dest = %dest.display(), "copying bundle to local tier");
        tokio::fs::copy(local_path, &dest).await.map_err(|e| {
            let msg = format!("copy to {} failed: {e}", dest.display());
            if self.critical {
                StorageError::critical(&self.name, msg)
            } else {
                StorageError::new(&self.name, msg, false)
            }
        })?;
        Ok(())
    }

    async fn list(&self, _ctx: &RunContext) -> Result<Vec<RemoteEntry>, StorageError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StorageError::new(&self.name, format!("list failed: {e}"), false)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::new(&self.name, format!("list failed: {e}"), false))?
        {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            if !entry.file_name().to_string_lossy().ends_with(".bundle.tar") {
                continue;
            }
            let modified: Option<DateTime<Utc>> = meta.modified().ok().map(DateTime::<Utc>::from);
            out.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                size: meta.len(),
                modified_at: modified,
            });
        }
        Ok(out)
    }

    async fn delete(&self, _ctx: &RunContext, remote_path: &str) -> Result<(), StorageError> {
        let path = self.bundle_path(remote_path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::new(&self.name, format!("delete failed: {e}"), false)),
        }
    }

    async fn apply_retention(
        &self,
        ctx: &RunContext,
        policy: &RetentionPolicy,
    ) -> Result<u64, StorageError> {
        let entries = self.list(ctx).await?;
        let doomed = plan_retention(policy, Utc::now(), &entries);
        let mut removed = 0;
        for entry in doomed {
            if let Err(e) = self.delete(ctx, &entry.name).await {
                warn!(tier = %self.name, entry = %entry.name, error = %e, "retention delete failed");
                continue;
            }
            removed += 1;
        }
        Ok(removed)
    }

    async fn verify_upload(
        &self,
        _ctx: &RunContext,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<bool, StorageError> {
        let remote = self.bundle_path(remote_path);
        let (Ok(local_meta), Ok(remote_meta)) =
            (tokio::fs::metadata(local_path).await, tokio::fs::metadata(&remote).await)
        else {
            return Ok(false);
        };
        Ok(local_meta.len() == remote_meta.len())
    }

    async fn get_stats(&self, ctx: &RunContext) -> Result<TierUsage, StorageError> {
        let entries = self.list(ctx).await?;
        Ok(TierUsage {
            total_backups: entries.len() as u64,
            available_space: Some(fs2::available_space(&self.dir).unwrap_or(0)),
            total_space: Some(fs2::total_space(&self.dir).unwrap_or(0)),
        })
    }
}
