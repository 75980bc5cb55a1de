//! The stack folder and aggregation table.
//!
//! Folded text format (stable):
//!
//! ```text
//! <stack-key><space><count><newline>
//! ```
//!
//! where `<stack-key>` is `ThreadName;frame;frame;...` in caller-first
//! order and `<count>` is a positive decimal. The final entry omits the
//! trailing newline, which makes line splitting trivially safe.

use crate::error::{EngineError, Result};

use indexmap::IndexMap;

/// In-memory aggregation of folded stacks.
///
/// Single-writer: all updates happen in the sampling context. Snapshots
/// (`dumps`, iteration) are taken only while the sampler is not actively
/// writing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StackTable {
    entries: IndexMap<String, u64>,
    ticks: u64,
}

impl StackTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sampled stack: compose the key from the thread name and the
    /// canonical frames (caller-first) and count one occurrence. An empty
    /// frame list produces no update.
    pub fn fold(&mut self, thread_name: &str, frames: &[String]) {
        if frames.is_empty() {
            return;
        }
        let key = format!("{};{}", thread_name, frames.join(";"));
        *self.entries.entry(key).or_insert(0) += 1;
    }

    /// Add `count` occurrences of a pre-composed key (merge path).
    pub fn add(&mut self, key: &str, count: u64) {
        if key.is_empty() || count == 0 {
            return;
        }
        *self.entries.entry(key.to_string()).or_insert(0) += count;
    }

    /// Record one completed sample tick.
    pub fn record_tick(&mut self) {
        self.ticks += 1;
    }

    /// Completed sample ticks folded into this table.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Number of distinct stack keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no stack has been folded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.entries.values().sum()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// Drop every entry and reset the tick counter; configuration and
    /// identity are untouched. Used by the post-fork child hook.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ticks = 0;
    }

    /// Fold another table into this one (counts are additive).
    pub fn merge(&mut self, other: &StackTable) {
        for (key, count) in other.iter() {
            self.add(key, count);
        }
        self.ticks += other.ticks;
    }

    /// Serialise to folded text. Entries are emitted in insertion order;
    /// the terminal newline is omitted from the last entry.
    pub fn dumps(&self) -> String {
        let lines: Vec<String> = self
            .entries
            .iter()
            .map(|(key, count)| format!("{key} {count}"))
            .collect();
        lines.join("\n")
    }

    /// Parse folded text produced by [`dumps`](Self::dumps). Strict: any
    /// malformed line is an error (lenient parsing for display purposes
    /// lives in the renderer).
    pub fn parse(text: &str) -> Result<Self> {
        let mut table = Self::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed = line
                .rsplit_once(' ')
                .and_then(|(key, count)| Some((key, count.parse::<u64>().ok()?)))
                .filter(|(key, count)| !key.is_empty() && *count > 0);
            match parsed {
                Some((key, count)) => table.add(key, count),
                None => {
                    return Err(EngineError::FoldedFormat {
                        line_no: idx + 1,
                        line: line.to_string(),
                    })
                }
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(frames: &[&str]) -> Vec<String> {
        frames.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fold_composes_thread_prefixed_keys() {
        let mut table = StackTable::new();
        table.fold("MainThread", &canon(&["a.py:main:1", "a.py:fib:9"]));
        table.fold("MainThread", &canon(&["a.py:main:1", "a.py:fib:9"]));
        table.fold("worker-1", &canon(&["a.py:run:3"]));

        assert_eq!(table.len(), 2);
        let entries: Vec<_> = table.iter().collect();
        assert_eq!(entries[0], ("MainThread;a.py:main:1;a.py:fib:9", 2));
        assert_eq!(entries[1], ("worker-1;a.py:run:3", 1));
    }

    #[test]
    fn test_empty_stack_produces_no_update() {
        let mut table = StackTable::new();
        table.fold("MainThread", &[]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_counts_are_strictly_positive_and_keys_non_empty() {
        let mut table = StackTable::new();
        table.add("", 3);
        table.add("a;b", 0);
        assert!(table.is_empty());

        table.fold("T", &canon(&["f"]));
        for (key, count) in table.iter() {
            assert!(!key.is_empty());
            assert!(count >= 1);
        }
    }

    #[test]
    fn test_dumps_insertion_order_no_trailing_newline() {
        let mut table = StackTable::new();
        table.fold("T", &canon(&["z"]));
        table.fold("T", &canon(&["a"]));
        let text = table.dumps();
        assert_eq!(text, "T;z 1\nT;a 1");
        assert!(!text.ends_with('\n'));
    }

    #[test]
    fn test_parse_dumps_round_trip() {
        let mut table = StackTable::new();
        table.fold("MainThread", &canon(&["a.py:main:1", "a.py:fib:9"]));
        table.fold("worker", &canon(&["a.py:run:3"]));
        table.fold("MainThread", &canon(&["a.py:main:1", "a.py:fib:9"]));

        let reparsed = StackTable::parse(&table.dumps()).unwrap();
        let a: Vec<_> = table.iter().collect();
        let b: Vec<_> = reparsed.iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dumps_is_idempotent() {
        let mut table = StackTable::new();
        table.fold("T", &canon(&["x", "y"]));
        assert_eq!(table.dumps(), table.dumps());
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        let err = StackTable::parse("a;b 2\nbogus line\n").unwrap_err();
        match err {
            EngineError::FoldedFormat { line_no, line } => {
                assert_eq!(line_no, 2);
                assert_eq!(line, "bogus line");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_merge_adds_counts() {
        let mut a = StackTable::new();
        a.fold("T", &canon(&["x"]));
        let mut b = StackTable::new();
        b.fold("T", &canon(&["x"]));
        b.fold("T", &canon(&["y"]));
        a.merge(&b);
        assert_eq!(a.total(), 3);
        let entries: Vec<_> = a.iter().collect();
        assert_eq!(entries[0], ("T;x", 2));
        assert_eq!(entries[1], ("T;y", 1));
    }

    #[test]
    fn test_clear_resets_entries_and_ticks() {
        let mut table = StackTable::new();
        table.fold("T", &canon(&["x"]));
        table.record_tick();
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.ticks(), 0);
    }
}
