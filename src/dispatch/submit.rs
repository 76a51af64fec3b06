use std::sync::Arc;

use crate::dispatch::Job;
use crate::dispatch::api::{self, JobApi};
use crate::dispatch::transport::Transport;
use crate::error::ImgenError;
use crate::request::RequestSpec;

/// Sends a validated request to the backend and returns the pending job.
/// Never polls and never retries.
pub struct JobClient<T> {
    api: JobApi,
    transport: Arc<T>,
}

impl<T: Transport> JobClient<T> {
    pub fn new(api: JobApi, transport: Arc<T>) -> Self {
        Self { api, transport }
    }

    pub async fn submit(&self, spec: &RequestSpec) -> Result<Job, ImgenError> {
        let request = self.api.submit_request(spec)?;
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| ImgenError::SubmissionFailed {
                message: e.to_string(),
                status: None,
            })?;

        let id = api::parse_submit_response(&response)?;
        tracing::info!(model = %spec.model(), job_id = id, "job submitted");
        Ok(Job::new(id, spec.model()))
    }
}
