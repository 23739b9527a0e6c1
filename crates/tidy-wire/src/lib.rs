//! Request and response shapes exchanged with the smart-tidy backend, plus
//! their conversion into `tidy_types` domain values.

pub mod chat;
pub mod config;
pub mod history;
pub mod organize;

pub use chat::*;
pub use config::*;
pub use history::*;
pub use organize::*;

use serde::Deserialize;
use serde_json::Value;

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Value,
}

impl ErrorBody {
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            Value::Array(items) => {
                let parts = items
                    .iter()
                    .filter_map(|item| {
                        item.get("msg")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .or_else(|| item.as_str().map(str::to_string))
                    })
                    .collect::<Vec<_>>();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("; "))
                }
            }
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}
