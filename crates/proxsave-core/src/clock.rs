//! Deterministic time source and process-unique sequence numbers.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Injected at the dependency-injection boundary so every caller that needs "now" or a unique suffix goes
/// through one seam that tests can replace wholesale.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    /// Monotonic, process-unique counter used to build unique temp-dir
    /// and stage-root names.
    fn next_seq(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock {
    seq: AtomicU64,
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

/// A fake clock for tests: fixed or steppable time, independent sequence.
#[derive(Debug)]
pub struct FakeClock {
    now: std::sync::Mutex<DateTime<Utc>>,
    seq: AtomicU64,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
            seq: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock().expect("fake clock mutex poisoned");
        *guard += delta;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("fake clock mutex poisoned")
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_sequence_is_monotonic_and_unique() {
        let clock = SystemClock::default();
        let a = clock.next_seq();
        let b = clock.next_seq();
        assert!(b > a);
    }

    #[test]
    fn fake_clock_now_is_controllable() {
        let start: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let clock = FakeClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(clock.now(), start + chrono::Duration::hours(2));
    }
}
