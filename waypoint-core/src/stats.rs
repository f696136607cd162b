//! Plugin stat counters.
//!
//! Counters are `stat-define`d once at load time and `stat-update`d from any
//! transaction thread afterward, so the table is a concurrent map of atomic
//! integers rather than anything behind a single lock — `dashmap` over a
//! `Mutex<HashMap<_>>` wherever a map is mutated from concurrent
//! request-handling tasks.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct StatsTable {
    counters: DashMap<String, AtomicI64>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, name: impl Into<String>) {
        self.counters.entry(name.into()).or_insert_with(|| AtomicI64::new(0));
    }

    /// Apply `delta` to `name`. `stat-update` defaults to `+1` when no delta
    /// is given (the directive layer supplies that default; this just
    /// applies whatever delta it's handed).
    pub fn update(&self, name: &str, delta: i64) {
        match self.counters.get(name) {
            Some(counter) => {
                counter.fetch_add(delta, Ordering::Relaxed);
            }
            None => {
                self.counters
                    .entry(name.to_string())
                    .or_insert_with(|| AtomicI64::new(0))
                    .fetch_add(delta, Ordering::Relaxed);
            }
        }
    }

    pub fn read(&self, name: &str) -> i64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn names(&self) -> Vec<String> {
        self.counters.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_accumulates_and_defaults_to_zero() {
        let stats = StatsTable::new();
        stats.define("requests");
        assert_eq!(stats.read("requests"), 0);
        stats.update("requests", 1);
        stats.update("requests", 1);
        assert_eq!(stats.read("requests"), 2);
    }

    #[test]
    fn update_on_undefined_counter_still_counts() {
        let stats = StatsTable::new();
        stats.update("ad-hoc", 5);
        assert_eq!(stats.read("ad-hoc"), 5);
    }
}
