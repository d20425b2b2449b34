//! Cross-cutting error kinds shared by the backup and restore pipelines.
//! Pipeline-specific kinds
//! (`BackupError`, `StorageError`, `RestoreError`) live in the crate that
//! owns that pipeline so they can carry crate-local context types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Context cancelled, explicit UI cancel, or a prompt timeout. Promoted to
/// a single sum-type with a reason enum per "Exceptions-for-flow"
/// redesign note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAbortReason {
    Cancelled,
    ContextDone,
    PromptTimedOut,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("user aborted ({reason:?})")]
pub struct UserAbortedError {
    pub reason: UserAbortReason,
}

impl UserAbortedError {
    pub fn new(reason: UserAbortReason) -> Self {
        Self { reason }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("manifest host_role `{manifest_role}` is incompatible with detected role `{detected_role}`")]
pub struct CompatibilityError {
    pub manifest_role: String,
    pub detected_role: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("sidecar checksum missing for {path}")]
    SidecarMissing { path: String },
    #[error("bundle is missing a manifest member")]
    BundleManifestMissing,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecryptReason {
    NoMatch,
    BadIdentity,
    Malformed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("decryption failed: {reason:?}")]
pub struct DecryptError {
    pub reason: DecryptReason,
}

impl DecryptError {
    pub fn new(reason: DecryptReason) -> Self {
        Self { reason }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{operation} timed out after {timeout_secs}s")]
pub struct TimedOutError {
    pub operation: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ApplyNotCommittedKind {
    Firewall,
    Ha,
}

/// Always terminal for the restore run: the orchestrator stops
/// here and surfaces the rollback artifacts so an operator can intervene
/// before the armed timer fires.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "{kind:?} apply was not committed; rollback armed at {rollback_marker} (deadline {rollback_deadline})"
)]
pub struct ApplyNotCommittedError {
    pub kind: ApplyNotCommittedKind,
    pub rollback_marker: PathBuf,
    pub rollback_log: PathBuf,
    pub rollback_deadline: DateTime<Utc>,
    pub rollback_armed: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("config error on field `{field}`: {message}")]
pub struct ConfigError {
    pub field: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}
