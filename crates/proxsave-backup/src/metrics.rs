//! Prometheus-style text exposition for a single backup run's stats.
//! No scrape server lives here; the outer shell decides whether and
//! how to publish this text.

use std::fmt::Write as _;

use proxsave_storage::{BackupStats, TierStatus};

fn status_value(status: TierStatus) -> u8 {
    match status {
        TierStatus::Ok => 0,
        TierStatus::Warning => 1,
        TierStatus::Error => 2,
        TierStatus::Disabled => 3,
    }
}

/// Renders gauges/counters for bytes archived, phase duration, and
/// per-tier status in the standard text exposition format.
pub fn render(stats: &BackupStats, archive_bytes: u64, phase_duration_secs: f64) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# HELP proxsave_backup_archive_bytes Size of the archived payload in bytes.");
    let _ = writeln!(out, "# TYPE proxsave_backup_archive_bytes gauge");
    let _ = writeln!(out, "proxsave_backup_archive_bytes {archive_bytes}");

    let _ = writeln!(out, "# HELP proxsave_backup_duration_seconds Wall-clock duration of the run.");
    let _ = writeln!(out, "# TYPE proxsave_backup_duration_seconds gauge");
    let _ = writeln!(out, "proxsave_backup_duration_seconds {phase_duration_secs}");

    let _ = writeln!(out, "# HELP proxsave_backup_warnings_total Warnings recorded during the run.");
    let _ = writeln!(out, "# TYPE proxsave_backup_warnings_total counter");
    let _ = writeln!(out, "proxsave_backup_warnings_total {}", stats.warnings);

    let _ = writeln!(out, "# HELP proxsave_backup_errors_total Errors recorded during the run.");
    let _ = writeln!(out, "# TYPE proxsave_backup_errors_total counter");
    let _ = writeln!(out, "proxsave_backup_errors_total {}", stats.errors);

    let _ = writeln!(out, "# HELP proxsave_backup_tier_status Per-tier status (0=ok,1=warning,2=error,3=disabled).");
    let _ = writeln!(out, "# TYPE proxsave_backup_tier_status gauge");
    for tier in &stats.tiers {
        let _ = writeln!(
            out,
            "proxsave_backup_tier_status{{tier=\"{}\"}} {}",
            tier.name,
            status_value(tier.status)
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxsave_storage::{TierCapacity, TierStats};

    #[test]
    fn renders_tier_gauges() {
        let mut stats = BackupStats::default();
        stats.set_tier(TierStats {
            name: "primary".into(),
            status: TierStatus::Ok,
            backups: 3,
            retention_removed: 1,
            capacity: TierCapacity { available_space: Some(1), total_space: Some(2) },
        });

        let text = render(&stats, 4096, 1.5);
        assert!(text.contains("proxsave_backup_archive_bytes 4096"));
        assert!(text.contains("proxsave_backup_tier_status{tier=\"primary\"} 0"));
    }
}
