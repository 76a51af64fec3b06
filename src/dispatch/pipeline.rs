use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::dispatch::api::JobApi;
use crate::dispatch::fetch::ResultFetcher;
use crate::dispatch::poll::{FixedRetry, PollLoop};
use crate::dispatch::submit::JobClient;
use crate::dispatch::transport::Transport;
use crate::dispatch::{Job, JobResult};
use crate::error::ImgenError;
use crate::request::RequestSpec;

/// Default slack on top of the poll budget before the supervisory timeout fires.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// Default upper bound on a single backend call, matching the HTTP client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// submit → poll → fetch over one shared transport.
pub struct Pipeline<T> {
    client: JobClient<T>,
    poller: PollLoop<T>,
    fetcher: ResultFetcher<T>,
    grace: Duration,
    request_timeout: Duration,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(api: JobApi, transport: Arc<T>, policy: FixedRetry, grace: Duration) -> Self {
        Self {
            client: JobClient::new(api.clone(), transport.clone()),
            poller: PollLoop::new(api.clone(), transport.clone(), policy),
            fetcher: ResultFetcher::new(api, transport),
            grace,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// How long one backend call may take; must cover the transport's own
    /// per-request timeout.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Outer bound on a whole run: every poll plus its sleep, one submit and
    /// one fetch each at the per-request bound, plus grace. It only fires when
    /// a backend call outlives the transport timeout.
    pub fn supervisory_timeout(&self) -> Duration {
        let policy = self.poller.policy();
        let calls = policy.max_attempts.saturating_add(2);
        policy.delay * policy.max_attempts + self.request_timeout * calls + self.grace
    }

    pub async fn submit(&self, spec: &RequestSpec) -> Result<Job, ImgenError> {
        self.client.submit(spec).await
    }

    /// Waits for `job` and downloads its result. On failure the job id is
    /// abandoned; the backend is expected to collect orphans itself.
    pub async fn poll_and_fetch(&self, job: &mut Job) -> Result<JobResult, ImgenError> {
        let job_id = job.id.clone();
        let polls = AtomicU32::new(0);

        let outcome = tokio::time::timeout(self.supervisory_timeout(), async {
            self.poller.await_completion_counting(job, &polls).await?;
            self.fetcher.fetch(job).await
        })
        .await
        .unwrap_or_else(|_| Err(self.expired(Some(&job_id), &polls)));

        if let Err(ref e) = outcome {
            tracing::warn!(job_id, "abandoning job: {e}");
        }
        outcome
    }

    /// The whole pipeline for one request, submit included, under the
    /// supervisory timeout. Also the re-entry point for regenerate: the same
    /// spec always produces the same submission.
    pub async fn run(&self, spec: &RequestSpec) -> Result<JobResult, ImgenError> {
        let start = Instant::now();
        let submitted = OnceLock::new();
        let polls = AtomicU32::new(0);

        let outcome = tokio::time::timeout(self.supervisory_timeout(), async {
            let mut job = self.submit(spec).await?;
            let _ = submitted.set(job.id.clone());
            self.poller.await_completion_counting(&mut job, &polls).await?;
            self.fetcher.fetch(&job).await
        })
        .await
        .unwrap_or_else(|_| Err(self.expired(submitted.get().map(String::as_str), &polls)));

        match &outcome {
            Ok(result) => tracing::info!(
                model = %spec.model(),
                job_id = submitted.get().map(String::as_str),
                seed = result.seed,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "generation finished"
            ),
            Err(e) => {
                if let Some(job_id) = submitted.get() {
                    tracing::warn!(job_id, "abandoning job: {e}");
                }
            }
        }
        outcome
    }

    fn expired(&self, job_id: Option<&str>, polls: &AtomicU32) -> ImgenError {
        match job_id {
            Some(job_id) => ImgenError::TimedOut {
                job_id: job_id.to_string(),
                attempts: polls.load(Ordering::Relaxed),
            },
            None => ImgenError::SubmissionFailed {
                message: "submission timed out".to_string(),
                status: None,
            },
        }
    }
}
