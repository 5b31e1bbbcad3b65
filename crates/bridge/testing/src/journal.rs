//! Shared, ordered call log.

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// True when every entry appears, in the given order.
    pub fn in_order(&self, expected: &[&str]) -> bool {
        let entries = self.entries.lock();
        let mut from = 0;
        for wanted in expected {
            match entries[from..].iter().position(|e| e == wanted) {
                Some(offset) => from += offset + 1,
                None => return false,
            }
        }
        true
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order() {
        let journal = Journal::new();
        for e in ["connect:a", "initialize:m", "listen:x", "stop:m"] {
            journal.record(e);
        }
        assert!(journal.in_order(&["connect:a", "listen:x", "stop:m"]));
        assert!(!journal.in_order(&["listen:x", "connect:a"]));
        assert!(!journal.in_order(&["missing"]));
        assert_eq!(journal.count_prefix("connect:"), 1);
    }
}
