//! Cache Statistics Module
//!
//! Thread-safe counters for hits, misses, puts and removals, plus
//! cumulative operation timings. Counters accumulate monotonically until
//! explicitly cleared and are read out through an immutable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Statistics ==
/// Atomic per-cache counters, scoped to one cache instance.
///
/// All updates are single atomic increments; readers take a [`StatsSnapshot`]
/// rather than observing the live counters. Counts taken around a full clear
/// are best-effort and may race with concurrent writers (documented, not
/// hidden).
#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
    get_time_nanos: AtomicU64,
    put_time_nanos: AtomicU64,
    remove_time_nanos: AtomicU64,
}

impl CacheStatistics {
    // == Constructor ==
    /// Creates statistics with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Recorders ==
    /// Adds to the hit counter.
    pub fn record_hits(&self, count: u64) {
        self.hits.fetch_add(count, Ordering::Relaxed);
    }

    /// Adds to the miss counter.
    pub fn record_misses(&self, count: u64) {
        self.misses.fetch_add(count, Ordering::Relaxed);
    }

    /// Adds to the put counter.
    pub fn record_puts(&self, count: u64) {
        self.puts.fetch_add(count, Ordering::Relaxed);
    }

    /// Adds to the removal counter.
    pub fn record_removals(&self, count: u64) {
        self.removals.fetch_add(count, Ordering::Relaxed);
    }

    /// Adds elapsed time to the cumulative get timing.
    pub fn add_get_time_nanos(&self, nanos: u64) {
        self.get_time_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Adds elapsed time to the cumulative put timing.
    pub fn add_put_time_nanos(&self, nanos: u64) {
        self.put_time_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Adds elapsed time to the cumulative remove timing.
    pub fn add_remove_time_nanos(&self, nanos: u64) {
        self.remove_time_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    // == Clear ==
    /// Resets every counter to zero.
    pub fn clear(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
        self.removals.store(0, Ordering::Relaxed);
        self.get_time_nanos.store(0, Ordering::Relaxed);
        self.put_time_nanos.store(0, Ordering::Relaxed);
        self.remove_time_nanos.store(0, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Returns a read-only copy of the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            get_time_nanos: self.get_time_nanos.load(Ordering::Relaxed),
            put_time_nanos: self.put_time_nanos.load(Ordering::Relaxed),
            remove_time_nanos: self.remove_time_nanos.load(Ordering::Relaxed),
        }
    }
}

// == Statistics Snapshot ==
/// Read-only view of the statistics counters at one point in time.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals
    pub misses: u64,
    /// Number of values stored
    pub puts: u64,
    /// Number of entries removed
    pub removals: u64,
    /// Cumulative time spent in get operations, in nanoseconds
    pub get_time_nanos: u64,
    /// Cumulative time spent in put operations, in nanoseconds
    pub put_time_nanos: u64,
    /// Cumulative time spent in remove operations, in nanoseconds
    pub remove_time_nanos: u64,
}

impl StatsSnapshot {
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Average time per get in nanoseconds, or 0 with no gets recorded.
    pub fn average_get_time_nanos(&self) -> u64 {
        let gets = self.hits + self.misses;
        if gets == 0 {
            0
        } else {
            self.get_time_nanos / gets
        }
    }

    /// Average time per put in nanoseconds, or 0 with no puts recorded.
    pub fn average_put_time_nanos(&self) -> u64 {
        if self.puts == 0 {
            0
        } else {
            self.put_time_nanos / self.puts
        }
    }

    /// Average time per removal in nanoseconds, or 0 with no removals recorded.
    pub fn average_remove_time_nanos(&self) -> u64 {
        if self.removals == 0 {
            0
        } else {
            self.remove_time_nanos / self.removals
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStatistics::new();
        let snapshot = stats.snapshot();

        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.misses, 0);
        assert_eq!(snapshot.puts, 0);
        assert_eq!(snapshot.removals, 0);
    }

    #[test]
    fn test_record_counters() {
        let stats = CacheStatistics::new();

        stats.record_hits(2);
        stats.record_misses(1);
        stats.record_puts(3);
        stats.record_removals(1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.puts, 3);
        assert_eq!(snapshot.removals, 1);
    }

    #[test]
    fn test_clear_resets_counters() {
        let stats = CacheStatistics::new();
        stats.record_hits(5);
        stats.add_get_time_nanos(1000);

        stats.clear();

        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let snapshot = StatsSnapshot::default();
        assert_eq!(snapshot.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let stats = CacheStatistics::new();
        stats.record_hits(1);
        stats.record_misses(1);

        assert_eq!(stats.snapshot().hit_rate(), 0.5);
    }

    #[test]
    fn test_average_times() {
        let stats = CacheStatistics::new();
        stats.record_hits(2);
        stats.add_get_time_nanos(4000);
        stats.record_puts(2);
        stats.add_put_time_nanos(1000);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.average_get_time_nanos(), 2000);
        assert_eq!(snapshot.average_put_time_nanos(), 500);
        assert_eq!(snapshot.average_remove_time_nanos(), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(CacheStatistics::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    stats.record_hits(1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.snapshot().hits, 8000);
    }
}
