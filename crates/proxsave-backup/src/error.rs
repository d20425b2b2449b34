//! The backup pipeline's single error type: every phase failure is wrapped
//! with the phase it happened in and the exit code the CLI should use.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    Preflight,
    Collect,
    Archive,
    Checksum,
    Manifest,
    Encrypt,
    Bundle,
    Dispatch,
    Finalize,
}

impl BackupPhase {
    /// Exit code distinct per phase, per the CLI surface contract.
    pub fn exit_code(self) -> i32 {
        match self {
            BackupPhase::Preflight => 10,
            BackupPhase::Collect => 11,
            BackupPhase::Archive => 12,
            BackupPhase::Checksum => 13,
            BackupPhase::Manifest => 14,
            BackupPhase::Encrypt => 15,
            BackupPhase::Bundle => 16,
            BackupPhase::Dispatch => 17,
            BackupPhase::Finalize => 18,
        }
    }
}

impl fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupPhase::Preflight => "preflight",
            BackupPhase::Collect => "collect",
            BackupPhase::Archive => "archive",
            BackupPhase::Checksum => "checksum",
            BackupPhase::Manifest => "manifest",
            BackupPhase::Encrypt => "encrypt",
            BackupPhase::Bundle => "bundle",
            BackupPhase::Dispatch => "dispatch",
            BackupPhase::Finalize => "finalize",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("backup failed in phase {phase}: {source}")]
pub struct BackupError {
    pub phase: BackupPhase,
    #[source]
    pub source: anyhow::Error,
}

impl BackupError {
    pub fn new(phase: BackupPhase, source: impl Into<anyhow::Error>) -> Self {
        Self { phase, source: source.into() }
    }

    pub fn exit_code(&self) -> i32 {
        self.phase.exit_code()
    }
}
