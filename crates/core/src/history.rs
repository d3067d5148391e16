use crate::bounded_store::BoundedStore;

pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Queries executed during the current connection session.
#[derive(Debug, Clone)]
pub struct QueryHistory {
    entries: BoundedStore<String>,
}

impl Default for QueryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl QueryHistory {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            entries: BoundedStore::new(size),
        }
    }

    pub fn add(&mut self, query: impl Into<String>) {
        if let Some(evicted) = self.entries.push(query.into()) {
            tracing::trace!(query = %evicted, "history entry evicted");
        }
    }

    /// Snapshot with the newest query first.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        self.entries.iter().rev().cloned().collect()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&str> {
        self.entries.newest().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.capacity()
    }

    pub fn resize(&mut self, size: usize) {
        self.entries.set_capacity(size);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{QueryHistory, DEFAULT_HISTORY_SIZE};

    #[test]
    fn default_size_matches_setting_default() {
        assert_eq!(QueryHistory::default().size(), DEFAULT_HISTORY_SIZE);
    }

    #[test]
    fn full_history_evicts_oldest_and_keeps_newest() {
        let mut history = QueryHistory::new(2);
        history.add("select 1");
        history.add("select 2");
        history.add("select 3");

        assert_eq!(history.len(), 2);
        assert_eq!(history.all(), vec!["select 3", "select 2"]);
        assert_eq!(history.latest(), Some("select 3"));
    }

    #[test]
    fn never_exceeds_cap() {
        let mut history = QueryHistory::new(5);
        for index in 0..50 {
            history.add(format!("select {index}"));
            assert!(history.len() <= 5);
        }
    }

    #[test]
    fn resize_keeps_entries_that_still_fit() {
        let mut history = QueryHistory::new(4);
        for query in ["a", "b", "c", "d"] {
            history.add(query);
        }

        history.resize(2);
        assert_eq!(history.all(), vec!["d", "c"]);

        history.resize(10);
        assert_eq!(history.all(), vec!["d", "c"]);
        assert_eq!(history.size(), 10);
    }

    #[test]
    fn clear_empties_history() {
        let mut history = QueryHistory::new(3);
        history.add("select 1");
        history.clear();
        assert!(history.is_empty());
    }
}
