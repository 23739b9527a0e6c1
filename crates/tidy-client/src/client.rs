use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tidy_types::{HistoryPage, PlanOperation, ScanSummary, Task};
use tidy_wire::{
    AiConfigRequest, CanUndoResponse, ChatRequest, ChatResponse, ConfigResponse,
    ConfigUpdateResponse, ConfigValidation, ErrorBody, ExecuteRequest, HistoryResponse,
    OperationModel, OrganizeAgentRequest, OrganizePlanRequest, RefineRequest, ScanRequest,
    ScanResponse, SetDefaultResponse, TaskResponse, UndoRequest, UndoResponse,
};

use crate::api::{ChatApi, ConfigApi, HistoryApi, OrganizeApi};
use crate::sse::{decode_chat_stream, decode_task_stream, ChatEventStream, TaskEventStream};
use crate::ClientError;

pub const API_PREFIX: &str = "/api/v1";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Applies to plain JSON calls only. Streams stay open as long as the
    /// server keeps them open.
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(120)),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy") || self.status.eq_ignore_ascii_case("ok")
    }
}

/// reqwest-backed implementation of every collaborator trait.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_options(base_url, ClientOptions::default())
    }

    pub fn with_options(base_url: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(base_url)?;
        let mut builder = reqwest::Client::builder().connect_timeout(options.connect_timeout);
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            stream_http,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        let url = format!("{}/health", self.base_url);
        read_json(self.http.get(url).send().await?).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        tracing::debug!(path, "GET");
        read_json(self.http.get(self.url(path)).send().await?).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        tracing::debug!(path, "POST");
        read_json(self.http.post(self.url(path)).json(body).send().await?).await
    }

    async fn open_sse(&self, request: reqwest::RequestBuilder) -> Result<Response, ClientError> {
        let response = request
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl ChatApi for BackendClient {
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ChatEventStream, ClientError> {
        let response = self
            .open_sse(self.stream_http.post(self.url("/ai/chat/stream")).json(request))
            .await?;
        Ok(decode_chat_stream(response.bytes_stream()))
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        self.post_json("/ai/chat", request).await
    }
}

#[async_trait]
impl OrganizeApi for BackendClient {
    async fn scan(&self, request: &ScanRequest) -> Result<ScanSummary, ClientError> {
        let response: ScanResponse = self.post_json("/scan", request).await?;
        Ok(response.into())
    }

    async fn get_scan(&self, scan_id: &str) -> Result<ScanSummary, ClientError> {
        let response: ScanResponse = self.get_json(&format!("/scan/{}", scan_id)).await?;
        Ok(response.into())
    }

    async fn generate_plan(
        &self,
        request: &OrganizePlanRequest,
    ) -> Result<Vec<PlanOperation>, ClientError> {
        let operations: Vec<OperationModel> = self.post_json("/organize/plan", request).await?;
        Ok(operations.into_iter().map(Into::into).collect())
    }

    async fn refine_plan(&self, request: &RefineRequest) -> Result<Vec<PlanOperation>, ClientError> {
        let operations: Vec<OperationModel> = self.post_json("/organize/refine", request).await?;
        Ok(operations.into_iter().map(Into::into).collect())
    }

    async fn organize_with_agent(&self, request: &OrganizeAgentRequest) -> Result<Task, ClientError> {
        let task: TaskResponse = self.post_json("/organize/agent", request).await?;
        Ok(task.into())
    }

    async fn execute_plan(&self, request: &ExecuteRequest) -> Result<Task, ClientError> {
        let task: TaskResponse = self.post_json("/organize/execute", request).await?;
        Ok(task.into())
    }

    async fn task_status(&self, task_id: &str) -> Result<Task, ClientError> {
        let task: TaskResponse = self.get_json(&format!("/organize/{}", task_id)).await?;
        Ok(task.into())
    }

    async fn subscribe_task(&self, task_id: &str) -> Result<TaskEventStream, ClientError> {
        let url = self.url(&format!("/organize/{}/stream", task_id));
        let response = self.open_sse(self.stream_http.get(url)).await?;
        Ok(decode_task_stream(response.bytes_stream(), task_id))
    }
}

#[async_trait]
impl HistoryApi for BackendClient {
    async fn history(&self, limit: u32, page: u32) -> Result<HistoryPage, ClientError> {
        let path = format!("/history/operations?limit={}&page={}", limit.clamp(1, 100), page.max(1));
        let response: HistoryResponse = self.get_json(&path).await?;
        Ok(response.into())
    }

    async fn can_undo(&self) -> Result<bool, ClientError> {
        let response: CanUndoResponse = self.get_json("/history/can-undo").await?;
        Ok(response.can_undo)
    }

    async fn undo(&self, confirm: bool) -> Result<UndoResponse, ClientError> {
        self.post_json("/history/undo", &UndoRequest { confirm }).await
    }
}

#[async_trait]
impl ConfigApi for BackendClient {
    async fn config(&self) -> Result<ConfigResponse, ClientError> {
        self.get_json("/config").await
    }

    async fn update_ai_config(
        &self,
        request: &AiConfigRequest,
    ) -> Result<ConfigUpdateResponse, ClientError> {
        tracing::debug!(provider = %request.provider, "PUT /config/ai");
        read_json(
            self.http
                .put(self.url("/config/ai"))
                .json(request)
                .send()
                .await?,
        )
        .await
    }

    async fn validate_config(&self, provider: &str) -> Result<ConfigValidation, ClientError> {
        read_json(
            self.http
                .post(self.url("/config/validate"))
                .query(&[("provider", provider)])
                .send()
                .await?,
        )
        .await
    }

    async fn set_default_provider(&self, provider: &str) -> Result<SetDefaultResponse, ClientError> {
        read_json(
            self.http
                .post(self.url("/config/set-default"))
                .query(&[("provider", provider)])
                .send()
                .await?,
        )
        .await
    }
}

/// Accepts `host:port` style input and a trailing `/api/v1`.
pub fn normalize_base_url(raw: &str) -> Result<String, ClientError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ClientError::InvalidUrl("base url is empty".to_string()));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    let without_prefix = with_scheme
        .strip_suffix(API_PREFIX)
        .unwrap_or(&with_scheme)
        .trim_end_matches('/')
        .to_string();
    let parsed =
        Url::parse(&without_prefix).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", raw, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ClientError::InvalidUrl(format!(
            "{}: unsupported scheme `{}`",
            raw,
            parsed.scheme()
        )));
    }
    Ok(without_prefix)
}

async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.message())
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                truncate_for_error(&text, 500)
            }
        });
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    let mut out = text.chars().take(max_chars).collect::<String>();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
