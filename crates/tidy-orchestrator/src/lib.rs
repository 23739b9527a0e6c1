//! Client-side orchestration of smart-tidy's long-running backend work:
//! streamed chat turns with a non-streaming fallback, task event channels,
//! status reconciliation, the organize workflow and two-step undo.

pub mod channel;
pub mod chat;
pub mod error;
pub mod reconciler;
pub mod undo;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use channel::{ChannelOptions, CloseHandle, EventChannel};
pub use chat::{ChatStreamSession, TurnOutcome};
pub use error::{ChatError, UndoError, WorkflowError};
pub use reconciler::{
    ApplyOutcome, FetchTicket, Reconciliation, ReconcilerOptions, ReconcilerPhase, TaskReconciler,
};
pub use undo::UndoCoordinator;
pub use workflow::{OrganizeWorkflow, WorkflowSnapshot};
