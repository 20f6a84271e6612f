//! REST client for the rendering engine.
//!
//! Wraps job submission, result polling, artifact download, stop and the
//! file store used for templates and working directories.

use async_trait::async_trait;
use reportbridge_core::results::JobResult;
use reportbridge_core::script::JobSpecification;
use reportbridge_core::types::JobId;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::{EngineError, RenderingEngine, SubmitResponse};

/// HTTP client for one rendering engine instance.
pub struct EngineApi {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct StopResponse {
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

impl EngineApi {
    /// Create a client for the engine at `api_url`, e.g. `http://host:40263`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    /// Build `{api_url}/api/v1/{segments...}` with every segment escaped.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, EngineError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| EngineError::InvalidUrl(format!("{}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|_| EngineError::InvalidUrl(self.api_url.clone()))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    /// Return the response unchanged on 2xx, or an [`EngineError::Api`]
    /// carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(EngineError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, EngineError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RenderingEngine for EngineApi {
    async fn submit(
        &self,
        job_id: JobId,
        spec: &JobSpecification,
    ) -> Result<SubmitResponse, EngineError> {
        let response = self
            .client
            .post(self.endpoint(&["jobs", &job_id.to_string()])?)
            .json(spec)
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        tracing::debug!(
            job_id = %job_id,
            success = submitted.success,
            operation_id = ?submitted.operation_id,
            "Submitted job to rendering engine",
        );
        Ok(submitted)
    }

    async fn poll_results(&self, job_id: JobId) -> Result<Vec<JobResult>, EngineError> {
        let response = self
            .client
            .get(self.endpoint(&["jobs", &job_id.to_string(), "results"])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Self::parse_response(response).await
    }

    async fn download_artifact(
        &self,
        job_id: JobId,
        name: &str,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        let response = self
            .client
            .get(self.endpoint(&["jobs", &job_id.to_string(), "files", name])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::ensure_success(response).await?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn stop(&self, job_id: JobId) -> Result<bool, EngineError> {
        let response = self
            .client
            .post(self.endpoint(&["jobs", &job_id.to_string(), "stop"])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let stopped: StopResponse = Self::parse_response(response).await?;
        Ok(stopped.success)
    }

    async fn delete_working_dir(&self, id: &str) -> Result<bool, EngineError> {
        let response = self
            .client
            .delete(self.endpoint(&["files", id])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::ensure_success(response).await?;
        Ok(true)
    }

    async fn upload_artifact(&self, filename: &str, data: Vec<u8>) -> Result<String, EngineError> {
        let part = reqwest::multipart::Part::bytes(data).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.endpoint(&["files"])?)
            .multipart(form)
            .send()
            .await?;

        let uploaded: UploadResponse = Self::parse_response(response).await?;
        tracing::debug!(filename, artifact_id = %uploaded.id, "Uploaded template to rendering engine");
        Ok(uploaded.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_escapes_file_names() {
        let api = EngineApi::new("http://engine:40263/");
        let url = api.endpoint(&["jobs", "abc", "files", "Sales Q1/2024.pdf"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://engine:40263/api/v1/jobs/abc/files/Sales%20Q1%2F2024.pdf"
        );
    }

    #[test]
    fn endpoint_keeps_a_base_path() {
        let api = EngineApi::new("http://gateway/engine");
        let url = api.endpoint(&["files"]).unwrap();
        assert_eq!(url.as_str(), "http://gateway/engine/api/v1/files");
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let api = EngineApi::new("not a url");
        assert!(matches!(api.endpoint(&["files"]), Err(EngineError::InvalidUrl(_))));
    }
}
