//! The uniform per-tier interface every storage backend implements.
//! A tier is "critical" when its failure must abort the
//! backup run and "non-critical" when a failure is merely recorded on
//! the stats record and the run continues.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proxsave_cmd::RunContext;

use crate::retention::RetentionPolicy;
use crate::StorageError;

#[derive(Debug, Clone)]
pub struct FsInfo {
    pub filesystem_type: String,
    pub available_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub archive_basename: String,
    pub manifest_created_at: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct TierLocation {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub cloud: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TierUsage {
    pub total_backups: u64,
    pub available_space: Option<u64>,
    pub total_space: Option<u64>,
}

/// A single storage backend (local directory, rclone-style remote,...).
/// The dispatcher (`dispatcher::sync_tier`) drives every tier through
/// exactly this surface; no caller reaches into a concrete tier type.
#[async_trait]
pub trait StorageTarget: Send + Sync {
    fn name(&self) -> &str;
    fn location(&self) -> TierLocation;
    fn is_enabled(&self) -> bool;
    fn is_critical(&self) -> bool;

    async fn detect_filesystem(&self, ctx: &RunContext) -> Result<FsInfo, StorageError>;
    async fn store(
        &self,
        ctx: &RunContext,
        local_path: &std::path::Path,
        metadata: &UploadMetadata,
    ) -> Result<(), StorageError>;
    async fn list(&self, ctx: &RunContext) -> Result<Vec<RemoteEntry>, StorageError>;
    async fn delete(&self, ctx: &RunContext, remote_path: &str) -> Result<(), StorageError>;
    async fn apply_retention(
        &self,
        ctx: &RunContext,
        policy: &RetentionPolicy,
    ) -> Result<u64, StorageError>;
    async fn verify_upload(
        &self,
        ctx: &RunContext,
        local_path: &std::path::Path,
        remote_path: &str,
    ) -> Result<bool, StorageError>;
    async fn get_stats(&self, ctx: &RunContext) -> Result<TierUsage, StorageError>;
}
