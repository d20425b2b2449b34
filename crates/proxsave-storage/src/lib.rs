//! Storage dispatcher: a uniform `StorageTarget` interface over a local
//! directory and an rclone-style remote, plus the critical/non-critical
//! failure classification the backup pipeline's dispatch phase relies
//! on. The retry/backoff shape and redacted destination logging follow
//! the same pattern as the WebDAV client elsewhere in this codebase.

pub mod dispatcher;
pub mod retention;
pub mod stats;
pub mod target;
pub mod tier;

pub use dispatcher::sync_tier;
pub use retention::{plan_retention, RetentionKind, RetentionPolicy};
pub use stats::{BackupStats, TierCapacity, TierSlot, TierStats, TierStatus};
pub use target::{FsInfo, RemoteEntry, StorageTarget, UploadMetadata};
pub use tier::local::LocalTier;
pub use tier::rclone::RcloneTier;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{tier}: {message}")]
pub struct StorageError {
    pub tier: String,
    pub message: String,
    pub critical: bool,
}

impl StorageError {
    pub fn new(tier: impl Into<String>, message: impl Into<String>, critical: bool) -> Self {
        Self {
            tier: tier.into(),
            message: message.into(),
            critical,
        }
    }

    /// Marker text requires on a critical `detect_filesystem`
    /// failure.
    pub fn critical(tier: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(tier, format!("CRITICAL: {message}"), true)
    }
}
