use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid base url: {0}")]
    InvalidUrl(String),

    #[error("stream interrupted: {0}")]
    Stream(String),
}

impl ClientError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Network-level failures that may succeed on retry. Explicit backend
    /// rejections (4xx) are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Stream(_) => true,
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::Decode(_) | ClientError::InvalidUrl(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let server = ClientError::Status {
            status: 503,
            message: "busy".to_string(),
        };
        let missing = ClientError::Status {
            status: 404,
            message: "task not found".to_string(),
        };
        assert!(server.is_transient());
        assert!(!missing.is_transient());
        assert_eq!(missing.status_code(), Some(404));
        assert!(ClientError::Stream("reset".to_string()).is_transient());
    }
}
