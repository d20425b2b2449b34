//! Per-tier retention policy and the pure function that decides which
//! remote entries a policy would remove.

use chrono::{DateTime, Utc};

use crate::target::RemoteEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionKind {
    /// Keep the `max_backups` most recent entries, dropping the rest.
    MaxBackups,
    /// Keep entries younger than `max_age_days`, dropping the rest.
    MaxAge,
    /// Apply both bounds; an entry is dropped if either bound excludes it.
    Both,
}

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub kind: RetentionKind,
    pub max_backups: Option<u64>,
    pub max_age_days: Option<u64>,
}

impl RetentionPolicy {
    pub fn disabled() -> Self {
        Self {
            kind: RetentionKind::MaxAge,
            max_backups: None,
            max_age_days: None,
        }
    }
}

/// Pure projection: given a policy, `now`, and a tier's current entries
/// (newest first is not assumed; entries are sorted here), return the
/// subset that should be deleted.
pub fn plan_retention(
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    entries: &[RemoteEntry],
) -> Vec<RemoteEntry> {
    let mut sorted: Vec<&RemoteEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        b.modified_at
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .cmp(&a.modified_at.unwrap_or(DateTime::<Utc>::MIN_UTC))
    });

    let mut doomed_by_count: Vec<bool> = vec![false; sorted.len()];
    if matches!(policy.kind, RetentionKind::MaxBackups | RetentionKind::Both) {
        if let Some(max) = policy.max_backups {
            for (idx, flag) in doomed_by_count.iter_mut().enumerate() {
                *flag = idx as u64 >= max;
            }
        }
    }

    let mut doomed_by_age: Vec<bool> = vec![false; sorted.len()];
    if matches!(policy.kind, RetentionKind::MaxAge | RetentionKind::Both) {
        if let Some(max_age) = policy.max_age_days {
            let cutoff = now - chrono::Duration::days(max_age as i64);
            for (idx, entry) in sorted.iter().enumerate() {
                if let Some(modified) = entry.modified_at {
                    doomed_by_age[idx] = modified < cutoff;
                }
            }
        }
    }

    let require_both = matches!(policy.kind, RetentionKind::Both);
    sorted
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| {
            if require_both {
                doomed_by_count[*idx] && doomed_by_age[*idx]
            } else {
                doomed_by_count[*idx] || doomed_by_age[*idx]
            }
        })
        .map(|(_, e)| e.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, days_old: i64, now: DateTime<Utc>) -> RemoteEntry {
        RemoteEntry {
            name: name.to_string(),
            size: 0,
            modified_at: Some(now - chrono::Duration::days(days_old)),
        }
    }

    #[test]
    fn max_backups_keeps_most_recent_n() {
        let now = Utc::now();
        let entries = vec![
            entry("a", 0, now),
            entry("b", 1, now),
            entry("c", 2, now),
            entry("d", 3, now),
        ];
        let policy = RetentionPolicy {
            kind: RetentionKind::MaxBackups,
            max_backups: Some(2),
            max_age_days: None,
        };
        let doomed = plan_retention(&policy, now, &entries);
        let names: Vec<_> = doomed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["c", "d"]);
    }

    #[test]
    fn max_age_drops_entries_past_cutoff() {
        let now = Utc::now();
        let entries = vec![entry("fresh", 1, now), entry("stale", 40, now)];
        let policy = RetentionPolicy {
            kind: RetentionKind::MaxAge,
            max_backups: None,
            max_age_days: Some(30),
        };
        let doomed = plan_retention(&policy, now, &entries);
        assert_eq!(doomed.len(), 1);
        assert_eq!(doomed[0].name, "stale");
    }

    #[test]
    fn zero_max_backups_dooms_everything() {
        let now = Utc::now();
        let entries = vec![entry("a", 0, now)];
        let policy = RetentionPolicy {
            kind: RetentionKind::MaxBackups,
            max_backups: Some(0),
            max_age_days: None,
        };
        assert_eq!(plan_retention(&policy, now, &entries).len(), 1);
    }

    #[test]
    fn disabled_policy_dooms_nothing() {
        let now = Utc::now();
        let entries = vec![entry("a", 1000, now)];
        assert!(plan_retention(&RetentionPolicy::disabled(), now, &entries).is_empty());
    }
}
