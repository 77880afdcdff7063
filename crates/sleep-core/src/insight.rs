//! Bounded FIFO of insights awaiting application.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::Insight;

/// Insights waiting for the applicator, oldest first.
///
/// Every operation is a single short critical section; nothing awaits while
/// the lock is held.
pub struct InsightCache {
    entries: Mutex<VecDeque<Insight>>,
    capacity: usize,
}

impl InsightCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Insight>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an insight, returning the oldest entry if it had to be evicted.
    pub fn push(&self, insight: Insight) -> Option<Insight> {
        let mut entries = self.lock();
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(insight);
        evicted
    }

    /// Remove and return the oldest insight.
    pub fn pop_front(&self) -> Option<Insight> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the pending insights, oldest first.
    pub fn pending(&self) -> Vec<Insight> {
        self.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnalysisKind;
    use serde_json::json;

    fn insight(description: &str) -> Insight {
        Insight::new(AnalysisKind::PatternMining, 0.9, description, vec![], json!({}))
    }

    #[test]
    fn test_fifo_order() {
        let cache = InsightCache::new(10);
        cache.push(insight("a"));
        cache.push(insight("b"));
        assert_eq!(cache.pop_front().unwrap().description, "a");
        assert_eq!(cache.pop_front().unwrap().description, "b");
        assert!(cache.pop_front().is_none());
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let cache = InsightCache::new(2);
        assert!(cache.push(insight("a")).is_none());
        assert!(cache.push(insight("b")).is_none());
        let evicted = cache.push(insight("c")).unwrap();
        assert_eq!(evicted.description, "a");
        let pending: Vec<String> = cache.pending().into_iter().map(|i| i.description).collect();
        assert_eq!(pending, vec!["b", "c"]);
    }
}
