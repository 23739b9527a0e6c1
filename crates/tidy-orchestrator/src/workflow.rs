use std::sync::Arc;

use tidy_client::OrganizeApi;
use tidy_types::{
    OrganizeMode, OrganizeRequest, PlanOperation, ScanSummary, Task, WorkflowPhase,
};
use tidy_wire::{
    ExecuteRequest, OperationModel, OrganizeAgentRequest, OrganizePlanRequest, RefineRequest,
    ScanRequest,
};
use tokio::sync::watch;

use crate::error::WorkflowError;
use crate::reconciler::{ApplyOutcome, Reconciliation, ReconcilerOptions, TaskReconciler};

/// Point-in-time view of a workflow for rendering.
#[derive(Debug, Clone)]
pub struct WorkflowSnapshot {
    pub phase: WorkflowPhase,
    pub request: Option<OrganizeRequest>,
    pub scan: Option<ScanSummary>,
    pub plan: Vec<PlanOperation>,
    pub task: Option<Task>,
    pub last_error: Option<String>,
}

/// The `input -> plan -> execute -> result` state machine of one organize
/// run. Owns its plan, its task and the reconciler watching that task.
pub struct OrganizeWorkflow {
    api: Arc<dyn OrganizeApi>,
    options: ReconcilerOptions,
    phase: WorkflowPhase,
    request: Option<OrganizeRequest>,
    scan: Option<ScanSummary>,
    plan: Vec<PlanOperation>,
    task: Option<Task>,
    reconciler: Option<TaskReconciler>,
    last_error: Option<String>,
}

impl OrganizeWorkflow {
    pub fn new(api: Arc<dyn OrganizeApi>, options: ReconcilerOptions) -> Self {
        Self {
            api,
            options,
            phase: WorkflowPhase::Input,
            request: None,
            scan: None,
            plan: Vec::new(),
            task: None,
            reconciler: None,
            last_error: None,
        }
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.phase
    }

    pub fn plan(&self) -> &[PlanOperation] {
        &self.plan
    }

    pub fn scan(&self) -> Option<&ScanSummary> {
        self.scan.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Latest task snapshot: the reconciler's while executing, the final one
    /// afterwards.
    pub fn task(&self) -> Option<Task> {
        self.reconciler
            .as_ref()
            .and_then(|r| r.state().snapshot().cloned())
            .or_else(|| self.task.clone())
    }

    pub fn watch_task(&self) -> Option<watch::Receiver<Reconciliation>> {
        self.reconciler.as_ref().map(TaskReconciler::subscribe)
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            phase: self.phase,
            request: self.request.clone(),
            scan: self.scan.clone(),
            plan: self.plan.clone(),
            task: self.task(),
            last_error: self.last_error.clone(),
        }
    }

    /// Dispatch on the request mode: manual builds a plan for review, agent
    /// starts executing right away.
    pub async fn submit(&mut self, request: OrganizeRequest) -> Result<WorkflowPhase, WorkflowError> {
        match request.mode {
            OrganizeMode::Manual => {
                self.generate_plan(request).await?;
            }
            OrganizeMode::Agent => {
                self.start_agent(request).await?;
            }
        }
        Ok(self.phase)
    }

    /// Adopt a scan made earlier so plan generation can skip scanning.
    pub async fn use_scan(&mut self, scan_id: &str) -> Result<&ScanSummary, WorkflowError> {
        self.require_phase(WorkflowPhase::Input, "adopt a scan")?;
        let scan_id = scan_id.trim();
        if scan_id.is_empty() {
            return Err(self.invalid("scan id is empty"));
        }
        let fetched = self.api.get_scan(scan_id).await;
        let scan = self.track(fetched)?;
        Ok(self.scan.insert(scan))
    }

    pub async fn generate_plan(
        &mut self,
        request: OrganizeRequest,
    ) -> Result<&[PlanOperation], WorkflowError> {
        self.require_phase(WorkflowPhase::Input, "generate a plan")?;
        self.validate(&request)?;

        let scan = match self.scan.take() {
            Some(scan) if same_directory(&scan.directory, &request.directory) => {
                tracing::debug!(scan_id = %scan.scan_id, "reusing scan");
                scan
            }
            _ => {
                let scanned = self
                    .api
                    .scan(&ScanRequest::for_plan(request.directory.trim()))
                    .await;
                self.track(scanned)?
            }
        };
        let scan_id = scan.scan_id.clone();
        self.scan = Some(scan);

        let generated = self
            .api
            .generate_plan(&OrganizePlanRequest {
                scan_id,
                request: request.request.trim().to_string(),
                provider: request.provider.clone(),
            })
            .await;
        let plan = self.track(generated)?;

        tracing::info!(operations = plan.len(), "plan generated");
        self.plan = plan;
        self.request = Some(request);
        self.advance(WorkflowPhase::Plan);
        Ok(&self.plan)
    }

    /// Replace the current plan with one refined from user feedback.
    pub async fn refine_plan(&mut self, feedback: &str) -> Result<&[PlanOperation], WorkflowError> {
        self.require_phase(WorkflowPhase::Plan, "refine the plan")?;
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(self.invalid("feedback is empty"));
        }
        let Some(scan_id) = self.scan.as_ref().map(|s| s.scan_id.clone()) else {
            return Err(self.invalid("no scan to refine against"));
        };
        let request = RefineRequest {
            operations: self.plan.iter().map(OperationModel::from).collect(),
            feedback: feedback.to_string(),
            scan_id,
        };
        let refined = self.api.refine_plan(&request).await;
        let plan = self.track(refined)?;
        tracing::info!(operations = plan.len(), "plan refined");
        self.plan = plan;
        Ok(&self.plan)
    }

    pub async fn start_agent(&mut self, request: OrganizeRequest) -> Result<&Task, WorkflowError> {
        self.require_phase(WorkflowPhase::Input, "start the agent")?;
        self.validate(&request)?;

        let created = self
            .api
            .organize_with_agent(&OrganizeAgentRequest {
                directory: request.directory.trim().to_string(),
                request: request.request.trim().to_string(),
                provider: request.provider.clone(),
                dry_run: request.dry_run,
                create_backup: request.create_backup,
            })
            .await;
        let task = self.track(created)?;
        self.request = Some(request);
        Ok(self.begin_execution(task))
    }

    pub async fn execute_plan(&mut self) -> Result<&Task, WorkflowError> {
        self.require_phase(WorkflowPhase::Plan, "execute the plan")?;
        if self.plan.is_empty() {
            return Err(self.invalid("the plan has no operations"));
        }
        let create_backup = self.request.as_ref().map_or(true, |r| r.create_backup);
        let created = self
            .api
            .execute_plan(&ExecuteRequest {
                operations: self.plan.iter().map(OperationModel::from).collect(),
                create_backup,
            })
            .await;
        let task = self.track(created)?;
        Ok(self.begin_execution(task))
    }

    /// Wait for the task to finish and move to `Result`.
    pub async fn wait_for_result(&mut self) -> Result<Task, WorkflowError> {
        if self.phase == WorkflowPhase::Result {
            if let Some(task) = &self.task {
                return Ok(task.clone());
            }
        }
        self.require_phase(WorkflowPhase::Execute, "wait for a result")?;
        let Some(reconciler) = &self.reconciler else {
            return Err(WorkflowError::Interrupted(self.task_id()));
        };
        let finished = reconciler.wait_done().await;
        match finished {
            Some(task) => {
                self.finish(task.clone());
                Ok(task)
            }
            None => Err(WorkflowError::Interrupted(self.task_id())),
        }
    }

    /// Fetch the task status now and advance if it has finished.
    pub async fn refresh(&mut self) -> Result<WorkflowPhase, WorkflowError> {
        self.require_phase(WorkflowPhase::Execute, "refresh the task")?;
        if let Some(reconciler) = &self.reconciler {
            if reconciler.refresh().await == ApplyOutcome::Failed {
                self.last_error = reconciler.state().last_error().map(str::to_string);
            }
        }
        Ok(self.poll())
    }

    /// Advance to `Result` if the reconciler has already reached `Done`.
    pub fn poll(&mut self) -> WorkflowPhase {
        if self.phase == WorkflowPhase::Execute {
            let done = self
                .reconciler
                .as_ref()
                .map(TaskReconciler::state)
                .filter(Reconciliation::is_done)
                .and_then(|state| state.snapshot().cloned());
            if let Some(task) = done {
                self.finish(task);
            }
        }
        self.phase
    }

    /// Back to `Input`, dropping plan, scan and task state and tearing down
    /// the reconciler.
    pub fn reset(&mut self) {
        if let Some(reconciler) = self.reconciler.take() {
            reconciler.abort();
        }
        self.request = None;
        self.scan = None;
        self.plan.clear();
        self.task = None;
        self.last_error = None;
        if self.phase != WorkflowPhase::Input {
            tracing::info!(from = self.phase.as_str(), "workflow reset");
        }
        self.phase = WorkflowPhase::Input;
    }

    fn begin_execution(&mut self, task: Task) -> &Task {
        tracing::info!(task_id = %task.id, "task started");
        self.reconciler = Some(TaskReconciler::watch_task(
            self.api.clone(),
            task.clone(),
            &self.options,
        ));
        self.last_error = None;
        self.advance(WorkflowPhase::Execute);
        self.task.insert(task)
    }

    fn finish(&mut self, task: Task) {
        self.task = Some(task);
        self.reconciler = None;
        self.advance(WorkflowPhase::Result);
    }

    fn advance(&mut self, next: WorkflowPhase) {
        debug_assert!(self.phase.can_advance_to(next));
        tracing::info!(from = self.phase.as_str(), to = next.as_str(), "workflow phase");
        self.phase = next;
    }

    fn task_id(&self) -> String {
        self.task.as_ref().map(|t| t.id.clone()).unwrap_or_default()
    }

    fn require_phase(&self, expected: WorkflowPhase, action: &'static str) -> Result<(), WorkflowError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(WorkflowError::InvalidPhase {
                action,
                phase: self.phase,
            })
        }
    }

    fn validate(&mut self, request: &OrganizeRequest) -> Result<(), WorkflowError> {
        if request.directory.trim().is_empty() {
            return Err(self.invalid("directory is required"));
        }
        if request.request.trim().is_empty() {
            return Err(self.invalid("describe how the files should be organized"));
        }
        Ok(())
    }

    fn invalid(&mut self, message: &str) -> WorkflowError {
        self.last_error = Some(message.to_string());
        WorkflowError::Validation(message.to_string())
    }

    fn track<T>(&mut self, result: Result<T, tidy_client::ClientError>) -> Result<T, WorkflowError> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!("organize request failed: {}", err);
                self.last_error = Some(err.to_string());
                Err(err.into())
            }
        }
    }
}

impl Drop for OrganizeWorkflow {
    fn drop(&mut self) {
        if let Some(reconciler) = self.reconciler.take() {
            reconciler.abort();
        }
    }
}

fn same_directory(a: &str, b: &str) -> bool {
    a.trim().trim_end_matches('/') == b.trim().trim_end_matches('/')
}
