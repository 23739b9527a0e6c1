use thiserror::Error;
use tidy_client::ClientError;
use tidy_types::WorkflowPhase;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("a reply is still streaming")]
    Busy,
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("cannot {action} during the {} phase", .phase.as_str())]
    InvalidPhase {
        action: &'static str,
        phase: WorkflowPhase,
    },

    #[error(transparent)]
    Backend(#[from] ClientError),

    #[error("task watcher stopped before task {0} finished")]
    Interrupted(String),
}

#[derive(Error, Debug)]
pub enum UndoError {
    #[error("undo was not previewed; request it without confirmation first")]
    NotArmed,

    #[error("undo rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Backend(#[from] ClientError),
}
