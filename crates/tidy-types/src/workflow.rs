use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Input,
    Plan,
    Execute,
    Result,
}

impl WorkflowPhase {
    pub const ALL: [WorkflowPhase; 4] = [
        WorkflowPhase::Input,
        WorkflowPhase::Plan,
        WorkflowPhase::Execute,
        WorkflowPhase::Result,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowPhase::Input => "input",
            WorkflowPhase::Plan => "plan",
            WorkflowPhase::Execute => "execute",
            WorkflowPhase::Result => "result",
        }
    }

    /// Forward-only transition table. Reset to `Input` is handled separately.
    pub fn can_advance_to(self, next: WorkflowPhase) -> bool {
        matches!(
            (self, next),
            (WorkflowPhase::Input, WorkflowPhase::Plan)
                | (WorkflowPhase::Input, WorkflowPhase::Execute)
                | (WorkflowPhase::Plan, WorkflowPhase::Execute)
                | (WorkflowPhase::Execute, WorkflowPhase::Result)
        )
    }
}

/// How an organize request is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrganizeMode {
    /// The backend agent plans and executes in one task.
    #[default]
    Agent,
    /// Scan, generate a plan for review, then execute it.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizeRequest {
    pub directory: String,
    pub request: String,
    #[serde(default)]
    pub mode: OrganizeMode,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_create_backup")]
    pub create_backup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

fn default_create_backup() -> bool {
    true
}

impl OrganizeRequest {
    pub fn new(directory: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            request: request.into(),
            mode: OrganizeMode::default(),
            dry_run: false,
            create_backup: default_create_backup(),
            provider: None,
        }
    }
}
