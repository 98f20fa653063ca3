use std::sync::Mutex;

/// Write-only sink for per-alert history lines.
///
/// Implementations are owned by the persistence layer; notifiers only ever
/// append.
pub trait History: Send + Sync {
    fn append_message_and_update(&self, message: &str, cause: Option<&str>, code: i32);
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HistoryEntry {
    pub message: String,
    pub cause: Option<String>,
    pub code: i32,
}

/// Keeps appended lines in memory. Handy for embedding and for tests.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|entry| entry.message).collect()
    }
}

impl History for MemoryHistory {
    fn append_message_and_update(&self, message: &str, cause: Option<&str>, code: i32) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(HistoryEntry {
                message: message.to_string(),
                cause: cause.map(str::to_string),
                code,
            });
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistory;

impl History for NoopHistory {
    fn append_message_and_update(&self, _message: &str, _cause: Option<&str>, _code: i32) {}
}

#[cfg(test)]
mod tests {
    use super::{History, MemoryHistory};

    #[test]
    fn memory_history_keeps_append_order() {
        let history = MemoryHistory::new();
        history.append_message_and_update("first", None, 0);
        history.append_message_and_update("second", Some("boom"), 1);
        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].cause.as_deref(), Some("boom"));
    }
}
