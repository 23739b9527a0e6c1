use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tidy_client::OrganizeApi;
use tidy_types::Task;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelOptions, CloseHandle, EventChannel};

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub channel: ChannelOptions,
    /// Status polling interval once the event channel is gone.
    pub fallback_poll_interval: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            channel: ChannelOptions::default(),
            fallback_poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilerPhase {
    Watching,
    Fetching,
    Done,
}

/// Issued by [`Reconciliation::begin_fetch`]; orders fetch responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A newer non-terminal snapshot replaced the previous one.
    Updated,
    /// A terminal snapshot was applied; no further fetches will be issued.
    Finalized,
    /// The response arrived after `Done`, after teardown, or behind a newer one.
    Stale,
    /// The fetch failed; the previous snapshot stays.
    Failed,
}

/// Reconciliation state for one task. Pure: the driver owns all I/O.
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    task_id: String,
    phase: ReconcilerPhase,
    snapshot: Option<Task>,
    last_error: Option<String>,
    fetches: u64,
    #[serde(skip)]
    next_seq: u64,
    #[serde(skip)]
    last_applied: Option<u64>,
    #[serde(skip)]
    in_flight: u32,
    stopped: bool,
}

impl Reconciliation {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            phase: ReconcilerPhase::Watching,
            snapshot: None,
            last_error: None,
            fetches: 0,
            next_seq: 0,
            last_applied: None,
            in_flight: 0,
            stopped: false,
        }
    }

    /// Start from the snapshot returned when the task was created.
    pub fn seeded(task: Task) -> Self {
        let mut state = Self::new(task.id.clone());
        if task.is_terminal() {
            state.phase = ReconcilerPhase::Done;
        }
        state.snapshot = Some(task);
        state
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn phase(&self) -> ReconcilerPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == ReconcilerPhase::Done
    }

    /// Set once the driver has exited, whether or not it reached `Done`.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn snapshot(&self) -> Option<&Task> {
        self.snapshot.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    pub fn begin_fetch(&mut self) -> Option<FetchTicket> {
        if self.is_done() || self.stopped {
            return None;
        }
        let ticket = FetchTicket { seq: self.next_seq };
        self.next_seq += 1;
        self.in_flight += 1;
        self.fetches += 1;
        self.phase = ReconcilerPhase::Fetching;
        Some(ticket)
    }

    pub fn apply(&mut self, ticket: FetchTicket, result: Result<Task, String>) -> ApplyOutcome {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.is_done() || self.stopped {
            return ApplyOutcome::Stale;
        }
        let outcome = if self.last_applied.is_some_and(|last| ticket.seq <= last) {
            ApplyOutcome::Stale
        } else {
            match result {
                Ok(task) => {
                    self.last_applied = Some(ticket.seq);
                    self.last_error = None;
                    let terminal = task.is_terminal();
                    self.snapshot = Some(task);
                    if terminal {
                        self.phase = ReconcilerPhase::Done;
                        return ApplyOutcome::Finalized;
                    }
                    ApplyOutcome::Updated
                }
                Err(err) => {
                    self.last_error = Some(err);
                    ApplyOutcome::Failed
                }
            }
        };
        if self.in_flight == 0 {
            self.phase = ReconcilerPhase::Watching;
        }
        outcome
    }

    fn mark_stopped(&mut self) {
        self.stopped = true;
        if !self.is_done() {
            self.phase = ReconcilerPhase::Watching;
        }
    }
}

struct Shared {
    api: Arc<dyn OrganizeApi>,
    state: watch::Sender<Reconciliation>,
}

impl Shared {
    async fn fetch(&self) -> ApplyOutcome {
        let mut ticket = None;
        self.state.send_if_modified(|state| {
            ticket = state.begin_fetch();
            ticket.is_some()
        });
        let Some(ticket) = ticket else {
            return ApplyOutcome::Stale;
        };

        let task_id = self.state.borrow().task_id.clone();
        let result = self
            .api
            .task_status(&task_id)
            .await
            .map_err(|err| err.to_string());
        if let Err(err) = &result {
            tracing::warn!(task_id = %task_id, "task status fetch failed: {}", err);
        }

        let mut outcome = ApplyOutcome::Stale;
        self.state.send_modify(|state| {
            outcome = state.apply(ticket, result);
        });
        if outcome == ApplyOutcome::Stale {
            tracing::debug!(task_id = %task_id, "discarded stale task status");
        }
        outcome
    }
}

/// Drives a [`Reconciliation`] from an [`EventChannel`].
///
/// Every notification is a wake: the reconciler fetches the task status and
/// publishes the fetched snapshot, never the notification body.
pub struct TaskReconciler {
    shared: Arc<Shared>,
    close: CloseHandle,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

impl TaskReconciler {
    pub fn attach(
        api: Arc<dyn OrganizeApi>,
        channel: EventChannel,
        initial: Option<Task>,
        fallback_poll_interval: Duration,
    ) -> Self {
        let state = match initial {
            Some(task) if task.id == channel.task_id() => Reconciliation::seeded(task),
            _ => Reconciliation::new(channel.task_id()),
        };
        let (state, _) = watch::channel(state);
        let shared = Arc::new(Shared { api, state });
        let close = channel.close_handle();
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive(
            shared.clone(),
            channel,
            fallback_poll_interval,
            cancel.clone(),
        ));
        Self {
            shared,
            close,
            cancel,
            driver,
        }
    }

    /// Subscribe to the task's event stream and start reconciling it.
    pub fn watch_task(api: Arc<dyn OrganizeApi>, task: Task, options: &ReconcilerOptions) -> Self {
        let channel = EventChannel::subscribe(api.clone(), task.id.clone(), options.channel.clone());
        Self::attach(api, channel, Some(task), options.fallback_poll_interval)
    }

    pub fn subscribe(&self) -> watch::Receiver<Reconciliation> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> Reconciliation {
        self.shared.state.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        self.shared.state.borrow().is_done()
    }

    /// Fetch the status now, outside the notification loop. Goes through the
    /// same ordering guard as driver fetches.
    pub async fn refresh(&self) -> ApplyOutcome {
        let outcome = self.shared.fetch().await;
        if outcome == ApplyOutcome::Finalized {
            self.close.close();
        }
        outcome
    }

    /// Wait for a terminal snapshot. `None` if the reconciler was torn down
    /// first.
    pub async fn wait_done(&self) -> Option<Task> {
        let mut rx = self.shared.state.subscribe();
        let state = rx
            .wait_for(|state| state.is_done() || state.is_stopped())
            .await
            .ok()?;
        if state.is_done() {
            state.snapshot().cloned()
        } else {
            None
        }
    }

    /// Stop reconciling and release the channel.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.close.close();
        self.shared.state.send_modify(Reconciliation::mark_stopped);
    }
}

impl Drop for TaskReconciler {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.close.close();
        self.driver.abort();
    }
}

async fn drive(
    shared: Arc<Shared>,
    mut channel: EventChannel,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let close = channel.close_handle();
    let task_id = channel.task_id().to_string();
    let mut channel_open = true;
    let mut pending_wake = false;

    while !shared.state.borrow().is_done() {
        if pending_wake {
            pending_wake = false;
            let fetch = shared.fetch();
            tokio::pin!(fetch);
            let outcome = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    outcome = &mut fetch => break Some(outcome),
                    note = channel.recv(), if channel_open => match note {
                        // Coalesced into the single follow-up fetch.
                        Some(_) => pending_wake = true,
                        None => {
                            channel_open = false;
                            pending_wake = true;
                        }
                    },
                }
            };
            match outcome {
                None => break,
                Some(ApplyOutcome::Finalized) => break,
                Some(_) => continue,
            }
        }

        if channel_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                note = channel.recv() => match note {
                    Some(note) => {
                        tracing::debug!(task_id = %task_id, kind = ?note.kind, "wake");
                        pending_wake = true;
                    }
                    None => {
                        if close.is_closed() {
                            break;
                        }
                        tracing::warn!(
                            task_id = %task_id,
                            "task event stream ended; polling status every {:?}",
                            poll_interval
                        );
                        channel_open = false;
                        pending_wake = true;
                    }
                },
            }
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => pending_wake = true,
            }
        }
    }

    if close.close() {
        tracing::debug!(task_id = %task_id, "task event channel closed");
    }
    shared.state.send_modify(Reconciliation::mark_stopped);
    if let Some(task) = shared.state.borrow().snapshot().filter(|t| t.is_terminal()) {
        tracing::info!(
            task_id = %task_id,
            status = task.status.as_str(),
            "task reconciled"
        );
    }
}
