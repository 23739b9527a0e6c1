//! In-memory collaborators for orchestrator tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tidy_client::{
    ChatApi, ChatEventStream, ClientError, HistoryApi, OrganizeApi, TaskEventStream,
};
use tidy_types::{
    HistoryPage, OperationKind, PlanOperation, ScanSummary, StreamEvent, Task, TaskNotification,
    TaskResult, TaskStatus,
};
use tidy_wire::{
    ChatRequest, ChatResponse, ExecuteRequest, OrganizeAgentRequest, OrganizePlanRequest,
    RefineRequest, ScanRequest, UndoResponse,
};
use tokio::sync::Semaphore;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn task(id: &str, status: TaskStatus, progress: u8) -> Task {
    Task {
        status,
        progress,
        ..Task::pending(id)
    }
}

pub fn completed(id: &str, total: u32, success: u32, failed: u32) -> Task {
    Task {
        result: Some(TaskResult::new(total, success, failed)),
        ..task(id, TaskStatus::Completed, 100)
    }
}

pub fn progress(id: &str, pct: u8) -> TaskNotification {
    TaskNotification {
        progress: Some(pct),
        ..TaskNotification::wake(id)
    }
}

/// Notifications followed by a stream that never ends.
pub fn open_stream(items: Vec<TaskNotification>) -> TaskEventStream {
    Box::pin(futures::stream::iter(items.into_iter().map(Ok)).chain(futures::stream::pending()))
}

/// Notifications followed by a clean close.
pub fn closing_stream(items: Vec<TaskNotification>) -> TaskEventStream {
    Box::pin(futures::stream::iter(items.into_iter().map(Ok)))
}

enum ChatScript {
    Events(Vec<Result<StreamEvent, ClientError>>),
    OpenError(ClientError),
    Manual(mpsc::UnboundedReceiver<Result<StreamEvent, ClientError>>),
}

pub struct FakeChat {
    script: Mutex<Option<ChatScript>>,
    fallback: Mutex<Option<Result<String, ClientError>>>,
    echo_prefix: Option<String>,
    fallback_gate: Option<Arc<Semaphore>>,
    stream_calls: AtomicUsize,
    fallback_calls: AtomicUsize,
}

impl FakeChat {
    fn with_script(script: ChatScript) -> Self {
        Self {
            script: Mutex::new(Some(script)),
            fallback: Mutex::new(None),
            echo_prefix: None,
            fallback_gate: None,
            stream_calls: AtomicUsize::new(0),
            fallback_calls: AtomicUsize::new(0),
        }
    }

    pub fn streaming(events: Vec<Result<StreamEvent, ClientError>>) -> Self {
        Self::with_script(ChatScript::Events(events))
    }

    pub fn open_error(err: ClientError) -> Self {
        Self::with_script(ChatScript::OpenError(err))
    }

    pub fn manual() -> (Self, mpsc::UnboundedSender<Result<StreamEvent, ClientError>>) {
        let (tx, rx) = mpsc::unbounded();
        (Self::with_script(ChatScript::Manual(rx)), tx)
    }

    pub fn with_fallback(self, reply: Result<&str, ClientError>) -> Self {
        *lock(&self.fallback) = Some(reply.map(str::to_string));
        self
    }

    /// Every fallback call answers `prefix` followed by the user message.
    pub fn with_echo_fallback(mut self, prefix: &str) -> Self {
        self.echo_prefix = Some(prefix.to_string());
        self
    }

    /// Each fallback call is counted, then waits for one permit.
    pub fn with_fallback_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.fallback_gate = Some(gate);
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn fallback_calls(&self) -> usize {
        self.fallback_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn open_chat_stream(&self, _request: &ChatRequest) -> Result<ChatEventStream, ClientError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.script).take() {
            Some(ChatScript::Events(events)) => Ok(Box::pin(futures::stream::iter(events))),
            Some(ChatScript::OpenError(err)) => Err(err),
            Some(ChatScript::Manual(rx)) => Ok(Box::pin(rx)),
            None => Err(ClientError::Stream("script exhausted".into())),
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.fallback_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(prefix) = &self.echo_prefix {
            return Ok(ChatResponse {
                message: format!("{prefix}{}", request.message),
                provider: None,
            });
        }
        match lock(&self.fallback).take() {
            Some(Ok(message)) => Ok(ChatResponse {
                message,
                provider: None,
            }),
            Some(Err(err)) => Err(err),
            None => Err(ClientError::Stream("no fallback scripted".into())),
        }
    }
}

pub struct FakeOrganize {
    statuses: Mutex<VecDeque<Result<Task, ClientError>>>,
    last_status: Mutex<Option<Task>>,
    subscriptions: Mutex<VecDeque<Result<TaskEventStream, ClientError>>>,
    status_gate: Option<Arc<Semaphore>>,
    plan: Mutex<Result<Vec<PlanOperation>, u16>>,
    created_task: Task,
    pub status_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    pub scan_calls: AtomicUsize,
    pub plan_calls: AtomicUsize,
    pub refine_calls: AtomicUsize,
    pub execute_calls: AtomicUsize,
    pub agent_calls: AtomicUsize,
}

impl FakeOrganize {
    pub fn new(task_id: &str) -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            last_status: Mutex::new(None),
            subscriptions: Mutex::new(VecDeque::new()),
            status_gate: None,
            plan: Mutex::new(Ok(sample_plan())),
            created_task: Task::pending(task_id),
            status_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            scan_calls: AtomicUsize::new(0),
            plan_calls: AtomicUsize::new(0),
            refine_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            agent_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_statuses(self, statuses: Vec<Result<Task, ClientError>>) -> Self {
        *lock(&self.statuses) = statuses.into();
        self
    }

    pub fn with_subscription(self, stream: TaskEventStream) -> Self {
        lock(&self.subscriptions).push_back(Ok(stream));
        self
    }

    pub fn with_failed_subscription(self, err: ClientError) -> Self {
        lock(&self.subscriptions).push_back(Err(err));
        self
    }

    /// Each status call waits for one permit.
    pub fn with_status_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.status_gate = Some(gate);
        self
    }

    pub fn with_plan_error(self, status: u16) -> Self {
        *lock(&self.plan) = Err(status);
        self
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub fn sample_plan() -> Vec<PlanOperation> {
    vec![
        PlanOperation::new(OperationKind::CreateFolder, "/tmp/inbox/docs", None)
            .with_reason("group documents"),
        PlanOperation::new(
            OperationKind::Move,
            "/tmp/inbox/report.pdf",
            Some("/tmp/inbox/docs/report.pdf".to_string()),
        )
        .with_reason("pdf"),
    ]
}

#[async_trait]
impl OrganizeApi for FakeOrganize {
    async fn scan(&self, request: &ScanRequest) -> Result<ScanSummary, ClientError> {
        let n = self.scan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ScanSummary {
            scan_id: format!("scan-{}", n + 1),
            directory: request.directory.clone(),
            total_files: 2,
            total_size: 1024,
            by_extension: Default::default(),
        })
    }

    async fn get_scan(&self, scan_id: &str) -> Result<ScanSummary, ClientError> {
        if scan_id == "missing" {
            return Err(ClientError::Status {
                status: 404,
                message: format!("scan not found: {}", scan_id),
            });
        }
        Ok(ScanSummary {
            scan_id: scan_id.to_string(),
            directory: "/tmp/inbox".to_string(),
            total_files: 2,
            total_size: 1024,
            by_extension: Default::default(),
        })
    }

    async fn generate_plan(
        &self,
        _request: &OrganizePlanRequest,
    ) -> Result<Vec<PlanOperation>, ClientError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        match &*lock(&self.plan) {
            Ok(plan) => Ok(plan.clone()),
            Err(status) => Err(ClientError::Status {
                status: *status,
                message: "plan generation failed".to_string(),
            }),
        }
    }

    async fn refine_plan(&self, request: &RefineRequest) -> Result<Vec<PlanOperation>, ClientError> {
        self.refine_calls.fetch_add(1, Ordering::SeqCst);
        Ok(request
            .operations
            .iter()
            .cloned()
            .map(PlanOperation::from)
            .filter(|op| op.kind != OperationKind::CreateFolder)
            .collect())
    }

    async fn organize_with_agent(
        &self,
        _request: &OrganizeAgentRequest,
    ) -> Result<Task, ClientError> {
        self.agent_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.created_task.clone())
    }

    async fn execute_plan(&self, _request: &ExecuteRequest) -> Result<Task, ClientError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.created_task.clone())
    }

    async fn task_status(&self, task_id: &str) -> Result<Task, ClientError> {
        if let Some(gate) = &self.status_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.statuses).pop_front();
        match next {
            Some(Ok(task)) => {
                *lock(&self.last_status) = Some(task.clone());
                Ok(task)
            }
            Some(Err(err)) => Err(err),
            None => Ok(lock(&self.last_status)
                .clone()
                .unwrap_or_else(|| Task::pending(task_id))),
        }
    }

    async fn subscribe_task(&self, _task_id: &str) -> Result<TaskEventStream, ClientError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.subscriptions)
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Stream("no subscription scripted".into())))
    }
}

pub struct FakeHistory {
    can_undo: bool,
    undo_gate: Option<Arc<Semaphore>>,
    pub can_undo_calls: AtomicUsize,
    pub preview_calls: AtomicUsize,
    pub commit_calls: AtomicUsize,
}

impl FakeHistory {
    pub fn new(can_undo: bool) -> Self {
        Self {
            can_undo,
            undo_gate: None,
            can_undo_calls: AtomicUsize::new(0),
            preview_calls: AtomicUsize::new(0),
            commit_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_undo_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.undo_gate = Some(gate);
        self
    }

    pub fn undo_calls(&self) -> usize {
        self.preview_calls.load(Ordering::SeqCst) + self.commit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryApi for FakeHistory {
    async fn history(&self, _limit: u32, page: u32) -> Result<HistoryPage, ClientError> {
        Ok(HistoryPage {
            page,
            can_undo: self.can_undo,
            ..HistoryPage::default()
        })
    }

    async fn can_undo(&self) -> Result<bool, ClientError> {
        self.can_undo_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.can_undo)
    }

    async fn undo(&self, confirm: bool) -> Result<UndoResponse, ClientError> {
        if !self.can_undo {
            return Err(ClientError::Status {
                status: 400,
                message: "no undoable operation".to_string(),
            });
        }
        if !confirm {
            self.preview_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(UndoResponse {
                message: Some("confirm undo".to_string()),
                confirm_required: true,
                operation: Some(serde_json::json!({"id": "op1"})),
                ..UndoResponse::default()
            });
        }
        if let Some(gate) = &self.undo_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(UndoResponse {
            message: Some("undone".to_string()),
            success: true,
            ..UndoResponse::default()
        })
    }
}
