//! Inference platform coordinates (project and location).

use serde::Serialize;

use crate::env::{EnvSnapshot, GOOGLE_CLOUD_PROJECT, GOOGLE_CLOUD_REGION};

use super::VertexError;

/// Location the platform SDK falls back to when none is configured.
pub const DEFAULT_LOCATION: &str = "us-central1";

/// Initialized platform handle. Construction never fails; a missing project
/// is reported when the first request URL is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VertexPlatform {
    pub project: Option<String>,
    pub location: String,
}

impl VertexPlatform {
    pub fn init(env: &EnvSnapshot) -> Self {
        let project = env.non_empty(GOOGLE_CLOUD_PROJECT).map(str::to_string);
        let location = env
            .non_empty(GOOGLE_CLOUD_REGION)
            .unwrap_or(DEFAULT_LOCATION)
            .to_string();
        tracing::info!(
            "inference platform initialized (project={}, location={})",
            project.as_deref().unwrap_or("<unset>"),
            location
        );
        Self { project, location }
    }

    fn host(&self) -> String {
        if self.location == "global" {
            "aiplatform.googleapis.com".to_string()
        } else {
            format!("{}-aiplatform.googleapis.com", self.location)
        }
    }

    /// URL of a publisher-model method, e.g. `generateContent`.
    pub fn model_url(&self, model: &str, method: &str) -> Result<String, VertexError> {
        let project = self.project.as_deref().ok_or(VertexError::MissingProject)?;
        Ok(format!(
            "https://{host}/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:{method}",
            host = self.host(),
            location = self.location,
        ))
    }
}
