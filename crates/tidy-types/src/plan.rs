use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Move,
    Rename,
    CreateFolder,
    Delete,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Move => "move",
            OperationKind::Rename => "rename",
            OperationKind::CreateFolder => "create_folder",
            OperationKind::Delete => "delete",
        }
    }
}

/// One step of a reorganization plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOperation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: OperationKind,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl PlanOperation {
    pub fn new(kind: OperationKind, source: impl Into<String>, target: Option<String>) -> Self {
        Self {
            id: None,
            kind,
            source: source.into(),
            target,
            reason: String::new(),
            confidence: default_confidence(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// The part of a scan result the client keeps around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub scan_id: String,
    pub directory: String,
    pub total_files: u64,
    #[serde(default)]
    pub total_size: u64,
    /// File count per extension, as reported by the scan.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_extension: BTreeMap<String, u64>,
}
