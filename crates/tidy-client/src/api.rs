use async_trait::async_trait;
use tidy_types::{HistoryPage, PlanOperation, ScanSummary, Task};
use tidy_wire::{
    AiConfigRequest, ChatRequest, ChatResponse, ConfigResponse, ConfigUpdateResponse,
    ConfigValidation, ExecuteRequest, OrganizeAgentRequest, OrganizePlanRequest, RefineRequest,
    ScanRequest, SetDefaultResponse, UndoResponse,
};

use crate::sse::{ChatEventStream, TaskEventStream};
use crate::ClientError;

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Open the streaming completion. Failing to open is an `Err`; failures
    /// after that arrive as items of the returned stream.
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ChatEventStream, ClientError>;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError>;
}

#[async_trait]
pub trait OrganizeApi: Send + Sync {
    async fn scan(&self, request: &ScanRequest) -> Result<ScanSummary, ClientError>;

    async fn get_scan(&self, scan_id: &str) -> Result<ScanSummary, ClientError>;

    async fn generate_plan(
        &self,
        request: &OrganizePlanRequest,
    ) -> Result<Vec<PlanOperation>, ClientError>;

    async fn refine_plan(&self, request: &RefineRequest) -> Result<Vec<PlanOperation>, ClientError>;

    async fn organize_with_agent(&self, request: &OrganizeAgentRequest) -> Result<Task, ClientError>;

    async fn execute_plan(&self, request: &ExecuteRequest) -> Result<Task, ClientError>;

    async fn task_status(&self, task_id: &str) -> Result<Task, ClientError>;

    async fn subscribe_task(&self, task_id: &str) -> Result<TaskEventStream, ClientError>;
}

#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn history(&self, limit: u32, page: u32) -> Result<HistoryPage, ClientError>;

    async fn can_undo(&self) -> Result<bool, ClientError>;

    async fn undo(&self, confirm: bool) -> Result<UndoResponse, ClientError>;
}

#[async_trait]
pub trait ConfigApi: Send + Sync {
    async fn config(&self) -> Result<ConfigResponse, ClientError>;

    async fn update_ai_config(
        &self,
        request: &AiConfigRequest,
    ) -> Result<ConfigUpdateResponse, ClientError>;

    async fn validate_config(&self, provider: &str) -> Result<ConfigValidation, ClientError>;

    async fn set_default_provider(&self, provider: &str) -> Result<SetDefaultResponse, ClientError>;
}
