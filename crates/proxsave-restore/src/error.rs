//! Restore-pipeline error kinds. `RestoreError` wraps a phase tag the way
//! `proxsave_backup::error::BackupError` wraps a `BackupPhase`; the restore
//! side additionally carries an optional category id since a restore
//! failure is usually attributable to one category group.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Discover,
    Prepare,
    Verify,
    Plan,
    Stage,
    Extract,
    Apply,
    Repair,
}

impl RestorePhase {
    /// Distinct exit codes per the CLI surface contract; picks up where
    /// `BackupPhase::exit_code` leaves off (10-18) so a shell script can
    /// tell a backup failure from a restore failure at a glance.
    pub fn exit_code(self) -> i32 {
        match self {
            RestorePhase::Discover => 20,
            RestorePhase::Prepare => 21,
            RestorePhase::Verify => 22,
            RestorePhase::Plan => 23,
            RestorePhase::Stage => 24,
            RestorePhase::Extract => 25,
            RestorePhase::Apply => 26,
            RestorePhase::Repair => 27,
        }
    }
}

impl std::fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RestorePhase::Discover => "discover",
            RestorePhase::Prepare => "prepare",
            RestorePhase::Verify => "verify",
            RestorePhase::Plan => "plan",
            RestorePhase::Stage => "stage",
            RestorePhase::Extract => "extract",
            RestorePhase::Apply => "apply",
            RestorePhase::Repair => "repair",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub struct RestoreError {
    pub phase: RestorePhase,
    pub category: Option<String>,
    #[source]
    pub source: anyhow::Error,
}

impl std::fmt::Display for RestoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.category {
            Some(cat) => write!(f, "restore failed in phase {} (category {cat}): {}", self.phase, self.source),
            None => write!(f, "restore failed in phase {}: {}", self.phase, self.source),
        }
    }
}

impl RestoreError {
    pub fn new(phase: RestorePhase, source: impl Into<anyhow::Error>) -> Self {
        Self {
            phase,
            category: None,
            source: source.into(),
        }
    }

    pub fn in_category(phase: RestorePhase, category: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self {
            phase,
            category: Some(category.into()),
            source: source.into(),
        }
    }
}
