use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::dispatch::api::{self, JobApi};
use crate::dispatch::transport::Transport;
use crate::dispatch::{Job, JobStatus, PollStatus};
use crate::error::ImgenError;

/// Default number of status queries before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 300;

/// Default pause between status queries that saw a non-terminal state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one attempt inside `FixedRetry::run`.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Ready(T),
    Abort(E),
    Retry,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    Aborted(E),
    Exhausted { attempts: u32 },
}

/// Bounded retry with a fixed delay: at most `max_attempts` calls, a single
/// `delay` between consecutive non-terminal attempts, no delay after the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRetry {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for FixedRetry {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl FixedRetry {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Upper bound on time spent sleeping, excluding the attempts themselves.
    pub fn sleep_budget(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }

    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
    {
        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Attempt::Ready(value) => return Ok(value),
                Attempt::Abort(err) => return Err(RetryError::Aborted(err)),
                Attempt::Retry if attempt < self.max_attempts => {
                    tokio::time::sleep(self.delay).await;
                }
                Attempt::Retry => {}
            }
        }
        Err(RetryError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

/// Polls a submitted job until it completes, fails, errors, or the
/// attempt ceiling is reached.
pub struct PollLoop<T> {
    api: JobApi,
    transport: Arc<T>,
    policy: FixedRetry,
}

impl<T: Transport> PollLoop<T> {
    pub fn new(api: JobApi, transport: Arc<T>, policy: FixedRetry) -> Self {
        Self {
            api,
            transport,
            policy,
        }
    }

    pub fn policy(&self) -> FixedRetry {
        self.policy
    }

    /// Returns `Ok(())` once the backend reports `completed`. A job already
    /// in a terminal status is not polled again.
    pub async fn await_completion(&self, job: &mut Job) -> Result<(), ImgenError> {
        self.await_completion_counting(job, &AtomicU32::new(0)).await
    }

    /// Like `await_completion`, bumping `polls` as each status query starts so
    /// a caller that abandons the future still knows how far it got.
    pub async fn await_completion_counting(
        &self,
        job: &mut Job,
        polls: &AtomicU32,
    ) -> Result<(), ImgenError> {
        match job.status {
            JobStatus::Completed => return Ok(()),
            JobStatus::Failed => {
                return Err(ImgenError::JobFailed {
                    job_id: job.id.clone(),
                });
            }
            JobStatus::Pending => {}
        }

        let start = Instant::now();
        let request = self.api.status_request(job);
        let transport = &*self.transport;
        let job_id = job.id.as_str();

        let outcome = self
            .policy
            .run(|attempt| {
                let request = request.clone();
                polls.fetch_add(1, Ordering::Relaxed);
                async move {
                    let response = match transport.execute(request).await {
                        Ok(response) => response,
                        Err(e) => {
                            return Attempt::Abort(ImgenError::PollFailed {
                                job_id: job_id.to_string(),
                                message: e.to_string(),
                                status: None,
                            });
                        }
                    };
                    match api::parse_status_response(job_id, &response) {
                        Ok(PollStatus::Completed) => Attempt::Ready(()),
                        Ok(PollStatus::Failed) => Attempt::Abort(ImgenError::JobFailed {
                            job_id: job_id.to_string(),
                        }),
                        Ok(PollStatus::Pending(token)) => {
                            tracing::debug!(job_id, attempt, token, "job still pending");
                            Attempt::Retry
                        }
                        Err(e) => Attempt::Abort(e),
                    }
                }
            })
            .await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                job.status = JobStatus::Completed;
                tracing::info!(job_id = job.id, elapsed_ms, "job completed");
                Ok(())
            }
            Err(RetryError::Aborted(err)) => {
                if matches!(err, ImgenError::JobFailed { .. }) {
                    job.status = JobStatus::Failed;
                }
                tracing::warn!(job_id = job.id, elapsed_ms, "polling stopped: {err}");
                Err(err)
            }
            Err(RetryError::Exhausted { attempts }) => {
                tracing::warn!(job_id = job.id, attempts, elapsed_ms, "polling timed out");
                Err(ImgenError::TimedOut {
                    job_id: job.id.clone(),
                    attempts,
                })
            }
        }
    }
}
