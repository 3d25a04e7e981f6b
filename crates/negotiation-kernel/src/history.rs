//! Append-only negotiation history shared by both roles.

use serde::{Deserialize, Serialize};

/// Separator placed between entries when rendering.
pub const ENTRY_SEPARATOR: &str = "\n\n";

/// Ordered record of what happened during a negotiation.
///
/// Entries can only be appended. Both roles receive the same rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLedger {
    entries: Vec<String>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry at the end.
    pub fn append(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    /// All entries joined in insertion order.
    pub fn render(&self) -> String {
        self.entries.join(ENTRY_SEPARATOR)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_preserves_insertion_order() {
        let mut ledger = HistoryLedger::new();
        assert!(ledger.is_empty());
        assert_eq!(ledger.render(), "");

        ledger.append("first");
        ledger.append(String::from("second"));
        ledger.append("third");

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.render(), "first\n\nsecond\n\nthird");
        assert_eq!(ledger.last(), Some("third"));
    }

    #[test]
    fn test_render_is_stable_without_appends() {
        let mut ledger = HistoryLedger::new();
        ledger.append("only");
        let before = ledger.render();
        let _ = ledger.entries();
        assert_eq!(ledger.render(), before);
    }

    #[test]
    fn test_entry_count_never_decreases() {
        let mut ledger = HistoryLedger::new();
        let mut previous = 0;
        for i in 0..10 {
            ledger.append(format!("entry {i}"));
            assert!(ledger.len() > previous);
            previous = ledger.len();
        }
        assert_eq!(ledger.entries()[0], "entry 0");
        assert_eq!(ledger.entries()[9], "entry 9");
    }
}
