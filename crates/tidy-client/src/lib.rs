//! Client side of the smart-tidy backend: the collaborator traits the
//! orchestrator drives, the reqwest implementation of them, and the SSE
//! decoders for the chat and task streams.

pub mod api;
pub mod client;
pub mod error;
pub mod sse;

pub use api::{ChatApi, ConfigApi, HistoryApi, OrganizeApi};
pub use client::{BackendClient, ClientOptions, HealthStatus, API_PREFIX, DEFAULT_BASE_URL};
pub use error::ClientError;
pub use sse::{decode_chat_stream, decode_task_stream, ChatEventStream, TaskEventStream};
