//! HTTP client for the distribution service.

use async_trait::async_trait;
use reportbridge_core::results::JobResult;
use reportbridge_core::types::JobId;
use tokio_util::sync::CancellationToken;

use crate::{DistributionError, Distributor};

/// Sends downloaded results to `POST {api_url}/api/v1/distribute`.
pub struct DistributionApi {
    client: reqwest::Client,
    api_url: String,
}

impl DistributionApi {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }

    /// Execute the POST and return the response text on 2xx.
    async fn send(&self, job_id: JobId, results: &[JobResult]) -> Result<String, DistributionError> {
        let body = serde_json::json!({
            "jobId": job_id,
            "results": results,
        });

        let response = self
            .client
            .post(format!("{}/api/v1/distribute", self.api_url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(DistributionError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Distributor for DistributionApi {
    async fn distribute(
        &self,
        job_id: JobId,
        results: &[JobResult],
        cancel: CancellationToken,
    ) -> Result<String, DistributionError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(job_id = %job_id, "Distribution cancelled in flight");
                Err(DistributionError::Cancelled)
            }
            result = self.send(job_id, results) => result,
        }
    }
}
