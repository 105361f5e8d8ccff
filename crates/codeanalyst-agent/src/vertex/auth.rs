//! Access tokens for the inference platform.

use async_trait::async_trait;

use crate::env::EnvSnapshot;

use super::VertexError;

pub const ACCESS_TOKEN_VAR: &str = "GOOGLE_CLOUD_ACCESS_TOKEN";

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, VertexError>;
}

/// Token supplied up front (e.g. by a CI job or a sidecar).
pub struct StaticToken(String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, VertexError> {
        Ok(self.0.clone())
    }
}

/// Token minted on demand by the gcloud CLI from the ambient credentials.
pub struct GcloudToken {
    program: String,
}

impl Default for GcloudToken {
    fn default() -> Self {
        Self {
            program: "gcloud".to_string(),
        }
    }
}

#[async_trait]
impl TokenSource for GcloudToken {
    async fn access_token(&self) -> Result<String, VertexError> {
        let out = tokio::process::Command::new(&self.program)
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|e| VertexError::Auth(format!("failed to run {}: {}", self.program, e)))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(VertexError::Auth(format!(
                "{} exited with {}: {}",
                self.program,
                out.status,
                stderr.trim()
            )));
        }
        let token = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if token.is_empty() {
            return Err(VertexError::Auth(format!("{} printed no token", self.program)));
        }
        Ok(token)
    }
}

/// Prefer an explicit token from the snapshot, else fall back to gcloud.
pub fn token_source_from_env(env: &EnvSnapshot) -> Box<dyn TokenSource> {
    match env.non_empty(ACCESS_TOKEN_VAR) {
        Some(token) => {
            tracing::debug!("using access token from {}", ACCESS_TOKEN_VAR);
            Box::new(StaticToken(token.to_string()))
        }
        None => {
            tracing::debug!("access tokens will be minted with gcloud");
            Box::new(GcloudToken::default())
        }
    }
}
