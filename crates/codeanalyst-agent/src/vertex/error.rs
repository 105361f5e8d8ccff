use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VertexError {
    #[error("GOOGLE_CLOUD_PROJECT is not set; cannot address the inference platform")]
    MissingProject,

    #[error("failed to obtain access token: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        retryable: bool,
        retry_after: Option<Duration>,
    },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl VertexError {
    pub fn is_retryable(&self) -> bool {
        match self {
            VertexError::Api { retryable, .. } => *retryable,
            VertexError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}
