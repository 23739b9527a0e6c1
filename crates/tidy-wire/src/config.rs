use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SUPPORTED_PROVIDERS: [&str; 4] = ["claude", "openai", "local", "custom"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSummary {
    pub provider: String,
    pub model: String,
    pub is_configured: bool,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub default_provider: String,
    #[serde(default)]
    pub providers: Vec<ProviderSummary>,
    #[serde(default)]
    pub file_operations: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AiConfigRequest {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdateResponse {
    pub message: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValidation {
    pub valid: bool,
    pub provider: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDefaultResponse {
    pub message: String,
    pub default_provider: String,
}

pub fn normalize_provider(raw: &str) -> Option<String> {
    let provider = raw.trim().to_ascii_lowercase();
    SUPPORTED_PROVIDERS
        .contains(&provider.as_str())
        .then_some(provider)
}
