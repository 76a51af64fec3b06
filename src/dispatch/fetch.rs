use std::sync::Arc;

use crate::dispatch::api::{self, JobApi};
use crate::dispatch::transport::Transport;
use crate::dispatch::{Job, JobResult, JobStatus};
use crate::error::ImgenError;

/// Retrieves and decodes the payload of a completed job.
pub struct ResultFetcher<T> {
    api: JobApi,
    transport: Arc<T>,
}

impl<T: Transport> ResultFetcher<T> {
    pub fn new(api: JobApi, transport: Arc<T>) -> Self {
        Self { api, transport }
    }

    pub async fn fetch(&self, job: &Job) -> Result<JobResult, ImgenError> {
        if job.status() != JobStatus::Completed {
            return Err(ImgenError::FetchFailed {
                job_id: job.id.clone(),
                message: format!("job is {:?}, not completed", job.status()),
            });
        }

        let response = self
            .transport
            .execute(self.api.result_request(job))
            .await
            .map_err(|e| ImgenError::FetchFailed {
                job_id: job.id.clone(),
                message: e.to_string(),
            })?;

        let result = api::parse_result_response(&job.id, &response)?;
        tracing::debug!(
            job_id = job.id,
            seed = result.seed,
            image_bytes = result.image.len(),
            "job result fetched"
        );
        Ok(result)
    }
}
