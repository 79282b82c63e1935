use std::collections::VecDeque;

/// Bounded, oldest-evicted log of display-ready chat lines.
///
/// Only inbound traffic lands here; any local echo is the host's own
/// concern.
#[derive(Debug)]
pub struct ChatLog {
    entries: VecDeque<String>,
    capacity: usize,
}

impl ChatLog {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a ready-to-display line, evicting the oldest at capacity.
    pub fn push(&mut self, line: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line);
    }

    /// Appends a sender/text pair in the normalized `sender: text` form
    /// shared by every wire encoding. An empty sender means the text is
    /// already display-ready.
    pub fn push_message(&mut self, sender: &str, text: &str) {
        if sender.is_empty() {
            self.push(text.to_string());
        } else {
            self.push(format!("{sender}: {text}"));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// The most recent `count` lines, oldest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &str> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_keeps_newest() {
        let mut log = ChatLog::new(3);
        for line in ["a", "b", "c", "d"] {
            log.push(line.to_string());
        }
        let lines: Vec<&str> = log.iter().collect();
        assert_eq!(lines, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_push_message_normalizes() {
        let mut log = ChatLog::default();
        log.push_message("Alice", "hi");
        log.push_message("", "Server restarting");
        let lines: Vec<&str> = log.iter().collect();
        assert_eq!(lines, vec!["Alice: hi", "Server restarting"]);
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut log = ChatLog::new(8);
        for line in ["one", "two", "three"] {
            log.push(line.to_string());
        }
        let tail: Vec<&str> = log.recent(2).collect();
        assert_eq!(tail, vec!["two", "three"]);
        assert_eq!(log.recent(10).count(), 3);
    }

    #[test]
    fn test_clear_empties_log() {
        let mut log = ChatLog::default();
        log.push("hello".to_string());
        log.clear();
        assert!(log.is_empty());
    }
}
