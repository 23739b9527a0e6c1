use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidy_types::{HistoryEntry, HistoryPage, HistoryStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItemResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub reason: String,
    pub status: String,
    pub timestamp: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<HistoryItemResponse> for HistoryEntry {
    fn from(value: HistoryItemResponse) -> Self {
        let status = if value.status.eq_ignore_ascii_case("success") {
            HistoryStatus::Success
        } else {
            HistoryStatus::Failed
        };
        HistoryEntry {
            id: value.id,
            kind: value.kind,
            status,
            source: value.source,
            target: Some(value.target).filter(|t| !t.is_empty()),
            reason: Some(value.reason).filter(|r| !r.is_empty()),
            error: value.error,
            timestamp: parse_timestamp(&value.timestamp).unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub operations: Vec<HistoryItemResponse>,
    pub total: u64,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub can_undo: bool,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

impl From<HistoryResponse> for HistoryPage {
    fn from(value: HistoryResponse) -> Self {
        HistoryPage {
            total: value.total,
            page: value.page,
            page_size: value.page_size,
            can_undo: value.can_undo,
            operations: value.operations.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanUndoResponse {
    pub can_undo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoRequest {
    pub confirm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UndoResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub confirm_required: bool,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub operation: Option<Value>,
}

/// Backend timestamps are ISO-8601, with or without an offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_naive_and_offset_timestamps() {
        let naive = parse_timestamp("2024-05-01T10:20:30.123456").unwrap();
        assert_eq!((naive.year(), naive.hour(), naive.minute()), (2024, 10, 20));
        let offset = parse_timestamp("2024-05-01T10:20:30+02:00").unwrap();
        assert_eq!(offset.hour(), 8);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn history_response_maps_status_and_empty_fields() {
        let raw = serde_json::json!({
            "operations": [{
                "id": "op1",
                "type": "move",
                "source": "/a/x.pdf",
                "target": "",
                "reason": "",
                "status": "success",
                "timestamp": "2024-05-01T10:20:30"
            }, {
                "id": "op2",
                "type": "rename",
                "source": "/a/y.txt",
                "target": "/a/z.txt",
                "reason": "clarity",
                "status": "failed",
                "timestamp": "2024-05-01T10:21:30",
                "error": "exists"
            }],
            "total": 2,
            "can_undo": true
        });
        let page: HistoryPage = serde_json::from_value::<HistoryResponse>(raw)
            .unwrap()
            .into();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 20);
        assert!(page.can_undo);
        assert_eq!(page.operations[0].status, HistoryStatus::Success);
        assert_eq!(page.operations[0].target, None);
        assert_eq!(page.operations[1].status, HistoryStatus::Failed);
        assert_eq!(page.latest().map(|e| e.id.as_str()), Some("op2"));
    }

    #[test]
    fn undo_response_defaults_to_not_required() {
        let parsed: UndoResponse =
            serde_json::from_str(r#"{"message":"undo succeeded","success":true}"#).unwrap();
        assert!(!parsed.confirm_required);
        assert!(parsed.success);
    }
}
