use std::sync::{Arc, Mutex};

use tidy_client::HistoryApi;
use tidy_types::UndoOutcome;

use crate::error::UndoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UndoState {
    Idle,
    /// The backend asked for confirmation of the previewed undo.
    Armed,
    Committing,
    Committed,
}

/// Two-step undo of the most recent operation: preview with
/// `confirm = false`, then commit with `confirm = true`.
pub struct UndoCoordinator {
    api: Arc<dyn HistoryApi>,
    state: Mutex<UndoState>,
}

impl UndoCoordinator {
    pub fn new(api: Arc<dyn HistoryApi>) -> Self {
        Self {
            api,
            state: Mutex::new(UndoState::Idle),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.with_state(|state| *state == UndoState::Armed)
    }

    pub async fn request_undo(&self, confirm: bool) -> Result<UndoOutcome, UndoError> {
        if confirm {
            self.commit().await
        } else {
            self.preview().await
        }
    }

    async fn preview(&self) -> Result<UndoOutcome, UndoError> {
        if !self.api.can_undo().await? {
            self.with_state(|state| {
                if *state != UndoState::Committing {
                    *state = UndoState::Idle;
                }
            });
            tracing::debug!("nothing to undo");
            return Ok(UndoOutcome::NothingToUndo);
        }

        let response = self.api.undo(false).await?;
        if response.confirm_required {
            self.with_state(|state| {
                if *state != UndoState::Committing {
                    *state = UndoState::Armed;
                }
            });
            return Ok(UndoOutcome::ConfirmationRequired {
                message: response.message,
                operation: response.operation,
            });
        }
        if response.success {
            tracing::warn!("backend undid without asking for confirmation");
            self.with_state(|state| *state = UndoState::Committed);
            return Ok(UndoOutcome::Undone {
                message: response.message,
            });
        }
        Ok(UndoOutcome::NothingToUndo)
    }

    async fn commit(&self) -> Result<UndoOutcome, UndoError> {
        let previous = self.with_state(|state| {
            let previous = *state;
            if previous == UndoState::Armed {
                *state = UndoState::Committing;
            }
            previous
        });
        match previous {
            UndoState::Armed => {}
            UndoState::Committing | UndoState::Committed => return Ok(UndoOutcome::NothingToUndo),
            UndoState::Idle => return Err(UndoError::NotArmed),
        }

        let result = self.api.undo(true).await;
        let outcome = match result {
            Ok(response) if response.success => {
                tracing::info!("undo committed");
                Ok(UndoOutcome::Undone {
                    message: response.message,
                })
            }
            Ok(response) => Err(UndoError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "backend did not confirm the undo".to_string()),
            )),
            Err(err) => Err(UndoError::Backend(err)),
        };
        let next = if outcome.is_ok() {
            UndoState::Committed
        } else {
            UndoState::Idle
        };
        self.with_state(|state| *state = next);
        outcome
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut UndoState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}
