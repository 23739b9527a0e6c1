use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Outcome counters of an executed plan or agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskResult {
    pub total: u32,
    pub success_count: u32,
    pub failed_count: u32,
    #[serde(default)]
    pub skipped_count: u32,
    pub success_rate: f64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub duration_secs: f64,
}

impl TaskResult {
    pub fn new(total: u32, success_count: u32, failed_count: u32) -> Self {
        Self {
            total,
            success_count,
            failed_count,
            skipped_count: 0,
            success_rate: 0.0,
            errors: Vec::new(),
            duration_secs: 0.0,
        }
        .normalized()
    }

    /// Clamp counters so `success_count + failed_count <= total` and derive
    /// `success_rate` from them.
    pub fn normalized(mut self) -> Self {
        let counted = self.success_count.saturating_add(self.failed_count);
        if counted > self.total {
            self.total = counted;
        }
        self.success_rate = if self.total == 0 {
            0.0
        } else {
            f64::from(self.success_count) / f64::from(self.total)
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            progress: 0,
            current_item: None,
            message: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Progress,
    Complete,
    Error,
}

/// Push notification from a task event channel. Advisory only: consumers
/// treat it as a wake signal and fetch the task to learn its real state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNotification {
    pub kind: NotificationKind,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskNotification {
    pub fn wake(task_id: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Progress,
            task_id: task_id.into(),
            progress: None,
            message: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_matches_counts() {
        let result = TaskResult::new(10, 9, 1);
        assert_eq!(result.success_rate, 0.9);
        assert!(result.success_count + result.failed_count <= result.total);
    }

    #[test]
    fn success_rate_is_zero_for_empty_result() {
        let result = TaskResult::new(0, 0, 0);
        assert_eq!(result.success_rate, 0.0);
    }

    #[test]
    fn normalized_repairs_inconsistent_counters() {
        let raw = TaskResult {
            total: 3,
            success_count: 4,
            failed_count: 2,
            skipped_count: 0,
            success_rate: 7.5,
            errors: Vec::new(),
            duration_secs: 0.0,
        };
        let fixed = raw.normalized();
        assert_eq!(fixed.total, 6);
        assert!(fixed.success_count + fixed.failed_count <= fixed.total);
        assert!((0.0..=1.0).contains(&fixed.success_rate));
    }

    #[test]
    fn success_rate_stays_in_unit_interval() {
        for total in 0..20u32 {
            for success in 0..=total {
                let failed = total - success;
                let result = TaskResult::new(total, success, failed);
                assert!((0.0..=1.0).contains(&result.success_rate));
                assert!(result.success_count + result.failed_count <= result.total);
            }
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!Task::pending("t1").is_terminal());
    }
}
