//! The shared stats record every tier's dispatch writes onto, and the
//! final backup report persists.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStatus {
    Ok,
    Warning,
    Error,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierCapacity {
    pub available_space: Option<u64>,
    pub total_space: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierStats {
    pub name: String,
    pub status: TierStatus,
    pub backups: u64,
    pub retention_removed: u64,
    pub capacity: TierCapacity,
}

impl TierStats {
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TierStatus::Disabled,
            backups: 0,
            retention_removed: 0,
            capacity: TierCapacity {
                available_space: None,
                total_space: None,
            },
        }
    }
}

/// Named tier slots the dispatcher writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierSlot {
    Primary,
    Secondary,
    Cloud,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupStats {
    pub archive_path: Option<String>,
    pub report_path: Option<String>,
    pub requested_compression: Option<String>,
    pub compression: Option<String>,
    pub warnings: u64,
    pub errors: u64,
    pub tiers: Vec<TierStats>,
}

impl BackupStats {
    pub fn set_tier(&mut self, stats: TierStats) {
        if let Some(existing) = self.tiers.iter_mut().find(|t| t.name == stats.name) {
            *existing = stats;
        } else {
            self.tiers.push(stats);
        }
    }

    pub fn tier(&self, name: &str) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.name == name)
    }
}
