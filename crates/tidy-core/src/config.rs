use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tidy_client::{ClientOptions, DEFAULT_BASE_URL};
use tidy_orchestrator::{ChannelOptions, ReconcilerOptions};
use tokio::fs;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub reconnect_delay_ms: u64,
    pub max_reconnects: u32,
    pub fallback_poll_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 800,
            max_reconnects: 5,
            fallback_poll_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub retention_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { retention_days: 14 }
    }
}

/// Effective client settings after all layers are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    /// Provider sent with chat and plan requests. `None` lets the backend
    /// use its configured default.
    pub provider: Option<String>,
    /// Zero disables the timeout.
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            provider: None,
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            request_timeout: (self.request_timeout_secs > 0)
                .then(|| Duration::from_secs(self.request_timeout_secs)),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
        }
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            channel: ChannelOptions {
                reconnect_delay: Duration::from_millis(self.stream.reconnect_delay_ms),
                max_reconnects: self.stream.max_reconnects,
            },
            fallback_poll_interval: Duration::from_millis(self.stream.fallback_poll_ms.max(100)),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    defaults: Value,
    global: Value,
    project: Value,
    env: Value,
    cli: Value,
}

impl ConfigLayers {
    fn merged(&self) -> Value {
        let mut merged = empty_object();
        for layer in [
            &self.defaults,
            &self.global,
            &self.project,
            &self.env,
            &self.cli,
        ] {
            deep_merge(&mut merged, layer);
        }
        merged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    Global,
    Project,
}

/// Layered JSON configuration. Later layers win: defaults, global file,
/// project file, environment, command-line overrides.
#[derive(Clone)]
pub struct ConfigStore {
    global_path: PathBuf,
    project_path: Option<PathBuf>,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(
        project_path: Option<PathBuf>,
        cli_overrides: Option<Value>,
    ) -> anyhow::Result<Self> {
        let global_path = resolve_global_config_path();
        Self::open(
            global_path,
            project_path,
            env_layer_from(|key| std::env::var(key).ok()),
            cli_overrides,
        )
        .await
    }

    /// Like [`ConfigStore::new`] with every source given explicitly.
    pub async fn open(
        global_path: PathBuf,
        project_path: Option<PathBuf>,
        env: Value,
        cli_overrides: Option<Value>,
    ) -> anyhow::Result<Self> {
        let defaults = serde_json::to_value(ClientConfig::default())?;
        let global = read_json_file(&global_path).await?;
        let project = match &project_path {
            Some(path) => read_json_file(path).await?,
            None => empty_object(),
        };

        let layers = ConfigLayers {
            defaults,
            global,
            project,
            env,
            cli: cli_overrides.unwrap_or_else(empty_object),
        };
        // Fail at startup rather than on first use.
        decode_config(&layers.merged())?;

        Ok(Self {
            global_path,
            project_path,
            layers: Arc::new(RwLock::new(layers)),
        })
    }

    pub fn global_path(&self) -> &Path {
        &self.global_path
    }

    pub fn project_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }

    pub async fn get(&self) -> anyhow::Result<ClientConfig> {
        decode_config(&self.get_effective_value().await)
    }

    pub async fn get_effective_value(&self) -> Value {
        self.layers.read().await.merged()
    }

    pub async fn get_layers_value(&self) -> Value {
        let layers = self.layers.read().await;
        json!({
            "defaults": layers.defaults,
            "global": layers.global,
            "project": layers.project,
            "env": layers.env,
            "cli": layers.cli
        })
    }

    /// Merge `patch` into the file behind `scope` and persist it. The patch
    /// is rejected, and nothing is written, if the result would not decode.
    pub async fn patch(&self, scope: ConfigScope, patch: Value) -> anyhow::Result<Value> {
        let path = match scope {
            ConfigScope::Global => self.global_path.clone(),
            ConfigScope::Project => self
                .project_path
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no project config file; pass --config <path>"))?,
        };

        let mut layers = self.layers.write().await;
        let mut candidate = layers.clone();
        let target = match scope {
            ConfigScope::Global => &mut candidate.global,
            ConfigScope::Project => &mut candidate.project,
        };
        deep_merge(target, &patch);
        let updated = target.clone();
        decode_config(&candidate.merged())?;

        write_json_file(&path, &updated).await?;
        *layers = candidate;
        tracing::info!(path = %path.display(), "config updated");
        Ok(updated)
    }

    /// Set one dotted key such as `stream.max_reconnects`.
    pub async fn set_key(&self, scope: ConfigScope, key: &str, value: Value) -> anyhow::Result<Value> {
        let patch = dotted_patch(key, value)?;
        self.patch(scope, patch).await
    }
}

fn decode_config(value: &Value) -> anyhow::Result<ClientConfig> {
    serde_json::from_value(value.clone()).context("invalid smart-tidy configuration")
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Build a nested object from a dotted key, rejecting keys that are not
/// part of [`ClientConfig`].
pub fn dotted_patch(key: &str, value: Value) -> anyhow::Result<Value> {
    let segments: Vec<&str> = key.split('.').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        anyhow::bail!("invalid config key `{key}`");
    }

    let defaults = serde_json::to_value(ClientConfig::default())?;
    let mut cursor = &defaults;
    for segment in &segments {
        cursor = cursor
            .get(segment)
            .ok_or_else(|| anyhow::anyhow!("unknown config key `{key}`"))?;
    }
    if cursor.is_object() {
        anyhow::bail!("config key `{key}` is a section; set one of its fields");
    }

    let mut patch = value;
    for segment in segments.iter().rev() {
        let mut map = Map::new();
        map.insert((*segment).to_string(), patch);
        patch = Value::Object(map);
    }
    Ok(patch)
}

/// Interpret a command-line value: JSON when it parses, a string otherwise.
pub fn parse_override_value(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "ignoring malformed config file");
            Ok(empty_object())
        }
    }
}

async fn write_json_file(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn resolve_global_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TIDY_GLOBAL_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("smart-tidy").join("config.json");
    }
    PathBuf::from(".smart-tidy/config.json")
}

fn env_layer_from(lookup: impl Fn(&str) -> Option<String>) -> Value {
    let mut root = empty_object();

    if let Some(url) = lookup("TIDY_BASE_URL") {
        if !url.trim().is_empty() {
            deep_merge(&mut root, &json!({ "base_url": url.trim() }));
        }
    }
    if let Some(provider) = lookup("TIDY_PROVIDER") {
        let provider = provider.trim().to_ascii_lowercase();
        if !provider.is_empty() {
            deep_merge(&mut root, &json!({ "provider": provider }));
        }
    }
    if let Some(secs) = parse_u64_env(&lookup, "TIDY_REQUEST_TIMEOUT_SECS") {
        deep_merge(&mut root, &json!({ "request_timeout_secs": secs }));
    }
    if let Some(days) = parse_u64_env(&lookup, "TIDY_LOG_RETENTION_DAYS") {
        deep_merge(&mut root, &json!({ "logging": { "retention_days": days } }));
    }

    root
}

fn parse_u64_env(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric environment override");
            None
        }
    }
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}
