//! An object-store-style remote tier driven entirely through `rclone`
//! via the command runner. Every operation goes through
//! `CommandRunner`; this tier never touches the host filesystem or
//! network directly.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proxsave_cmd::{CommandRunner, Invocation, RunContext};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::retention::{plan_retention, RetentionPolicy};
use crate::target::{FsInfo, RemoteEntry, StorageTarget, TierLocation, TierUsage, UploadMetadata};
use crate::StorageError;

pub struct RcloneTier {
    name: String,
    /// `remote:path` reference, e.g. `gdrive:pbs-backups/server1`.
    remote_ref: String,
    runner: std::sync::Arc<dyn CommandRunner>,
    enabled: bool,
    critical: bool,
    list_timeout: Duration,
}

impl RcloneTier {
    pub fn new(
        name: impl Into<String>,
        remote_ref: impl Into<String>,
        runner: std::sync::Arc<dyn CommandRunner>,
        enabled: bool,
        critical: bool,
    ) -> Self {
        Self {
            name: name.into(),
            remote_ref: remote_ref.into(),
            runner,
            enabled,
            critical,
            list_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    fn path_for(&self, basename: &str) -> String {
        format!("{}/{}", self.remote_ref.trim_end_matches('/'), basename)
    }

    fn err(&self, message: impl Into<String>) -> StorageError {
        if self.critical {
            StorageError::critical(&self.name, message)
        } else {
            StorageError::new(&self.name, message, false)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RcloneLsJsonEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Size")]
    size: u64,
    #[serde(rename = "ModTime")]
    mod_time: Option<String>,
    #[serde(rename = "IsDir")]
    is_dir: bool,
}

#[async_trait]
impl StorageTarget for RcloneTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> TierLocation {
        TierLocation {
            primary: None,
            secondary: None,
            cloud: Some(self.remote_ref.clone()),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    async fn detect_filesystem(&self, ctx: &RunContext) -> Result<FsInfo, StorageError> {
        let invocation = Invocation::new("rclone", vec!["about".into(), self.remote_ref.clone(), "--json".into()]);
        let out = self
            .runner
            .run(ctx, &invocation)
            .await
            .map_err(|e| self.err(format!("rclone about failed: {e}")))?;

        #[derive(Deserialize, Default)]
        struct About {
            #[serde(default)]
            total: Option<u64>,
            #[serde(default)]
            free: Option<u64>,
        }
        let about: About = serde_json::from_slice(&out.bytes).unwrap_or_default();

        Ok(FsInfo {
            filesystem_type: "rclone".to_string(),
            available_bytes: about.free.unwrap_or(0),
            total_bytes: about.total.unwrap_or(0),
        })
    }

    async fn store(
        &self,
        ctx: &RunContext,
        local_path: &Path,
        metadata: &UploadMetadata,
    ) -> Result<(), StorageError> {
        let dest = self.path_for(&metadata.archive_basename);
        debug!(tier = %self.name, dest = %dest, "uploading bundle via rclone");
        let invocation = Invocation::new(
            "rclone",
            vec!["copyto".into(), local_path.display().to_string(), dest],
        );
        self.runner
            .run(ctx, &invocation)
            .await
            .map_err(|e| self.err(format!("rclone copyto failed: {e}")))?;
        Ok(())
    }

    async fn list(&self, ctx: &RunContext) -> Result<Vec<RemoteEntry>, StorageError> {
        let invocation = Invocation::new(
            "rclone",
            vec!["lsjson".into(), self.remote_ref.clone()],
        );
        let run = tokio::time::timeout(self.list_timeout, self.runner.run(ctx, &invocation)).await;
        let out = match run {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(self.err(format!("rclone lsjson failed: {e}"))),
            Err(_) => {
                return Err(self.err(format!(
                    "rclone lsjson timed out after {:?}",
                    self.list_timeout
                )))
            }
        };

        let entries: Vec<RcloneLsJsonEntry> = serde_json::from_slice(&out.bytes)
            .map_err(|e| self.err(format!("malformed rclone lsjson output: {e}")))?;

        let mut seen = std::collections::HashSet::new();
        Ok(entries
            .into_iter()
            .filter(|e| !e.is_dir)
            .filter(|e| e.name.ends_with(".bundle.tar"))
            .filter(|e| seen.insert(e.name.clone()))
            .map(|e| RemoteEntry {
                name: e.name,
                size: e.size,
                modified_at: e
                    .mod_time
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
            })
            .collect())
    }

    async fn delete(&self, ctx: &RunContext, remote_path: &str) -> Result<(), StorageError> {
        let invocation = Invocation::new("rclone", vec!["deletefile".into(), self.path_for(remote_path)]);
        self.runner
            .run(ctx, &invocation)
            .await
            .map_err(|e| self.err(format!("rclone deletefile failed: {e}")))?;
        Ok(())
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
        ctx: &RunContext,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<bool, StorageError> {
        let Ok(local_meta) = tokio::fs::metadata(local_path).await else {
            return Ok(false);
        };
        let entries = self.list(ctx).await?;
        Ok(entries
            .iter()
            .any(|e| e.name == remote_path && e.size == local_meta.len()))
    }

    async fn get_stats(&self, ctx: &RunContext) -> Result<TierUsage, StorageError> {
        let entries = self.list(ctx).await?;
        let fs_info = self.detect_filesystem(ctx).await.ok();
        Ok(TierUsage {
            total_backups: entries.len() as u64,
            available_space: fs_info.as_ref().map(|f| f.available_bytes),
            total_space: fs_info.as_ref().map(|f| f.total_bytes),
        })
    }
}

/// An rclone remote reference has the shape `^[^/][^:]*:` -- contains a
/// colon before any slash, and doesn't start with a slash.
pub fn is_rclone_reference(s: &str) -> bool {
    if s.starts_with('/') {
        return false;
    }
    match s.find(':') {
        Some(colon_idx) => !s[..colon_idx].contains('/'),
        None => false,
    }
}
