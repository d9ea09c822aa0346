//! Process-wide request counters, reported by the `STATS` command.

use std::sync::atomic::{AtomicI64, Ordering};

/// Plain atomic counters shared across every connection via the `Engine`.
///
/// No true global state: callers own an `Arc<Stats>` and pass it around, so tests can spin up
/// independent engines in parallel without cross-talk.
#[derive(Debug, Default)]
pub struct Stats {
    gets: AtomicI64,
    sets: AtomicI64,
    dels: AtomicI64,
    hits: AtomicI64,
    misses: AtomicI64,
    errors: AtomicI64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_get(&self, hit: bool) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_del(&self) {
        self.dels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A name-sorted snapshot, ready to render as the `STATS` response body.
    pub fn snapshot(&self) -> Vec<(&'static str, i64)> {
        let mut snap = vec![
            ("dels", self.dels.load(Ordering::Relaxed)),
            ("errors", self.errors.load(Ordering::Relaxed)),
            ("gets", self.gets.load(Ordering::Relaxed)),
            ("hits", self.hits.load(Ordering::Relaxed)),
            ("misses", self.misses.load(Ordering::Relaxed)),
            ("sets", self.sets.load(Ordering::Relaxed)),
        ];
        snap.sort_by_key(|(name, _)| *name);
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_sorted_by_name() {
        let stats = Stats::new();
        stats.record_get(true);
        stats.record_get(false);
        stats.record_set();
        stats.record_del();
        stats.record_error();

        let snap = stats.snapshot();
        let names: Vec<_> = snap.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["dels", "errors", "gets", "hits", "misses", "sets"]);

        let as_map: std::collections::HashMap<_, _> = snap.into_iter().collect();
        assert_eq!(as_map["gets"], 2);
        assert_eq!(as_map["hits"], 1);
        assert_eq!(as_map["misses"], 1);
        assert_eq!(as_map["sets"], 1);
        assert_eq!(as_map["dels"], 1);
        assert_eq!(as_map["errors"], 1);
    }
}
