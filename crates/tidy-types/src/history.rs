use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub kind: String,
    pub status: HistoryStatus,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HistoryPage {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub can_undo: bool,
    #[serde(default)]
    pub operations: Vec<HistoryEntry>,
}

impl HistoryPage {
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.operations.iter().max_by_key(|entry| entry.timestamp)
    }
}

/// Result of one call into the undo protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoOutcome {
    /// History holds nothing that can be undone; the backend was not asked
    /// to undo anything.
    NothingToUndo,
    /// The backend asked for confirmation. Call again with `confirm = true`.
    ConfirmationRequired {
        message: Option<String>,
        operation: Option<serde_json::Value>,
    },
    Undone {
        message: Option<String>,
    },
}
