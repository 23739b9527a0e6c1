use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidy_types::{
    NotificationKind, OperationKind, PlanOperation, ScanSummary, Task, TaskNotification,
    TaskResult, TaskStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub directory: String,
    pub recursive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    pub include_metadata: bool,
    #[serde(default)]
    pub include_content: bool,
}

impl ScanRequest {
    pub fn new(directory: impl Into<String>, recursive: bool) -> Self {
        Self {
            directory: directory.into(),
            recursive,
            extensions: None,
            include_metadata: true,
            include_content: false,
        }
    }

    /// The scan the organize flow issues before asking for a plan.
    pub fn for_plan(directory: impl Into<String>) -> Self {
        Self::new(directory, true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStats {
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub total_size_human: String,
    #[serde(default)]
    pub by_extension: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    pub scan_id: String,
    pub directory: String,
    pub total_files: u64,
    #[serde(default)]
    pub files: Vec<Value>,
    pub stats: ScanStats,
}

impl From<ScanResponse> for ScanSummary {
    fn from(value: ScanResponse) -> Self {
        Self {
            scan_id: value.scan_id,
            directory: value.directory,
            total_files: value.total_files,
            total_size: value.stats.total_size,
            by_extension: value.stats.by_extension,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizePlanRequest {
    pub scan_id: String,
    pub request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineRequest {
    pub operations: Vec<OperationModel>,
    pub feedback: String,
    pub scan_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeAgentRequest {
    pub directory: String,
    pub request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub dry_run: bool,
    pub create_backup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub operations: Vec<OperationModel>,
    pub create_backup: bool,
}

/// Operation as the backend spells it. `target` is always present on the
/// wire; an empty string stands for "no target".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl From<&PlanOperation> for OperationModel {
    fn from(op: &PlanOperation) -> Self {
        Self {
            id: op.id.clone(),
            kind: op.kind,
            source: op.source.clone(),
            target: op.target.clone().unwrap_or_default(),
            reason: op.reason.clone(),
            confidence: op.confidence.clamp(0.0, 1.0),
        }
    }
}

impl From<OperationModel> for PlanOperation {
    fn from(op: OperationModel) -> Self {
        Self {
            id: op.id,
            kind: op.kind,
            source: op.source,
            target: Some(op.target).filter(|t| !t.trim().is_empty()),
            reason: op.reason,
            confidence: op.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OperationResultResponse {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failed_count: u32,
    #[serde(default)]
    pub skipped_count: u32,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub duration: f64,
}

impl From<OperationResultResponse> for TaskResult {
    fn from(value: OperationResultResponse) -> Self {
        TaskResult {
            total: value.total,
            success_count: value.success_count,
            failed_count: value.failed_count,
            skipped_count: value.skipped_count,
            success_rate: value.success_rate,
            errors: value.errors,
            duration_secs: value.duration,
        }
        .normalized()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<TaskResponse> for Task {
    fn from(value: TaskResponse) -> Self {
        // Agent runs report free-form result objects; only counter-shaped
        // results become a TaskResult.
        let result = value
            .result
            .and_then(|raw| serde_json::from_value::<OperationResultResponse>(raw).ok())
            .filter(|r| r.total > 0 || r.success_count > 0 || r.failed_count > 0)
            .map(TaskResult::from);
        Task {
            id: value.task_id,
            status: value.status,
            progress: value.progress.min(100),
            current_item: value.current_file,
            message: value.message,
            result,
            error: value.error,
        }
    }
}

/// Classify one frame of the task event stream.
///
/// Frames normally carry `type`; the backend also pushes bare task snapshots,
/// which are classified by their `status`. Frames that name another task are
/// dropped.
pub fn classify_task_frame(value: &Value, task_id: &str) -> Option<TaskNotification> {
    if let Some(frame_task) = value.get("task_id").and_then(Value::as_str) {
        if frame_task != task_id {
            return None;
        }
    }

    let kind = match value.get("type").and_then(Value::as_str) {
        Some("progress") => NotificationKind::Progress,
        Some("complete") => NotificationKind::Complete,
        Some("error") => NotificationKind::Error,
        Some(_) => return None,
        None => match value.get("status").and_then(Value::as_str) {
            Some("completed") => NotificationKind::Complete,
            Some("failed") => NotificationKind::Error,
            Some("pending") | Some("running") => NotificationKind::Progress,
            _ => return None,
        },
    };

    Some(TaskNotification {
        kind,
        task_id: task_id.to_string(),
        progress: value
            .get("progress")
            .and_then(Value::as_u64)
            .map(|p| p.min(100) as u8),
        message: value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        error: value.get("error").and_then(Value::as_str).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_response_with_counter_result_becomes_task_result() {
        let raw = json!({
            "task_id": "t1",
            "status": "completed",
            "progress": 100,
            "result": {"total": 10, "success_count": 9, "failed_count": 1, "success_rate": 0.9}
        });
        let task: Task = serde_json::from_value::<TaskResponse>(raw).unwrap().into();
        assert!(task.is_terminal());
        let result = task.result.as_ref().expect("result");
        assert_eq!(result.total, 10);
        assert_eq!(result.success_rate, 0.9);
    }

    #[test]
    fn free_form_agent_result_is_not_a_task_result() {
        let raw = json!({
            "task_id": "t1",
            "status": "completed",
            "progress": 100,
            "result": {"success": true, "output": "moved 3 files"}
        });
        let task: Task = serde_json::from_value::<TaskResponse>(raw).unwrap().into();
        assert!(task.result.is_none());
    }

    #[test]
    fn operation_target_round_trips_through_empty_string() {
        let op = PlanOperation::new(OperationKind::CreateFolder, "/tmp/a/docs", None);
        let wire = OperationModel::from(&op);
        assert_eq!(wire.target, "");
        let encoded = serde_json::to_value(&wire).unwrap();
        assert_eq!(encoded["type"], "create_folder");
        let back = PlanOperation::from(wire);
        assert_eq!(back.target, None);
    }

    #[test]
    fn typed_frames_are_classified_by_type() {
        let n = classify_task_frame(&json!({"type": "progress", "progress": 40}), "t1").unwrap();
        assert_eq!(n.kind, NotificationKind::Progress);
        assert_eq!(n.progress, Some(40));
        let n = classify_task_frame(&json!({"type": "complete"}), "t1").unwrap();
        assert_eq!(n.kind, NotificationKind::Complete);
        let n = classify_task_frame(&json!({"type": "error", "error": "disk full"}), "t1").unwrap();
        assert_eq!(n.kind, NotificationKind::Error);
        assert_eq!(n.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn bare_snapshots_are_classified_by_status() {
        let n = classify_task_frame(&json!({"task_id": "t1", "status": "running"}), "t1").unwrap();
        assert_eq!(n.kind, NotificationKind::Progress);
        let n = classify_task_frame(&json!({"task_id": "t1", "status": "failed"}), "t1").unwrap();
        assert_eq!(n.kind, NotificationKind::Error);
    }

    #[test]
    fn frames_for_other_tasks_or_unknown_kinds_are_dropped() {
        assert!(classify_task_frame(&json!({"task_id": "t2", "status": "running"}), "t1").is_none());
        assert!(classify_task_frame(&json!({"type": "heartbeat"}), "t1").is_none());
        assert!(classify_task_frame(&json!({"hello": "world"}), "t1").is_none());
    }
}
