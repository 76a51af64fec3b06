use std::fmt;

use thiserror::Error;

use crate::request::ValidationError;

/// Which backend call a failure was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Submit,
    Poll,
    Fetch,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Poll => "poll",
            Self::Fetch => "fetch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ImgenError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("rate limited during {stage}")]
    RateLimited { stage: Stage },

    #[error("backend queue is full")]
    BackendSaturated,

    #[error("submission failed: {message}")]
    SubmissionFailed {
        message: String,
        status: Option<u16>,
    },

    #[error("poll failed for job {job_id}: {message}")]
    PollFailed {
        job_id: String,
        message: String,
        status: Option<u16>,
    },

    #[error("job {job_id} failed on the backend")]
    JobFailed { job_id: String },

    #[error("job {job_id} timed out after {attempts} polls")]
    TimedOut { job_id: String, attempts: u32 },

    #[error("fetch failed for job {job_id}: {message}")]
    FetchFailed { job_id: String, message: String },

    #[error("a request is already running for {user}")]
    ConcurrencyRejected { user: String },

    #[error("control {0} not found")]
    ControlNotFound(String),

    #[error("control {0} is disabled")]
    ControlDisabled(String),

    #[error("control {0} has expired")]
    ControlExpired(String),

    #[error("user {user} may not activate control {control}")]
    NotAuthorized { control: String, user: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl ImgenError {
    /// Job id carried by the variants raised after a successful submission.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::PollFailed { job_id, .. } => Some(job_id),
            Self::JobFailed { job_id } => Some(job_id),
            Self::TimedOut { job_id, .. } => Some(job_id),
            Self::FetchFailed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// True when the same request may succeed if the caller tries again later.
    /// The pipeline itself never retries; this is a hint for the invoker.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::BackendSaturated => true,
            Self::TimedOut { .. } => true,
            Self::ConcurrencyRejected { .. } => true,
            Self::PollFailed { status, .. } | Self::SubmissionFailed { status, .. } => {
                // No status means the transport broke, which is usually transient.
                status.is_none_or(|s| s >= 500)
            }
            Self::Request(_) => true,
            _ => false,
        }
    }

    /// Short sentence suitable for showing to the requesting user.
    /// Never includes job ids, URLs or upstream bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::RateLimited { .. } => "Hit the rate limit. Please try again later.".to_string(),
            Self::BackendSaturated => "Queue is full. Please try again later.".to_string(),
            Self::SubmissionFailed { .. }
            | Self::PollFailed { .. }
            | Self::JobFailed { .. }
            | Self::FetchFailed { .. }
            | Self::Request(_) => "Something went wrong. Please try again later.".to_string(),
            Self::TimedOut { .. } => "Timed out. Please try again later.".to_string(),
            Self::ConcurrencyRejected { .. } => {
                "This command is already running for you.".to_string()
            }
            Self::ControlNotFound(_) => "That button is no longer available.".to_string(),
            Self::ControlDisabled(_) => "That button has already been used.".to_string(),
            Self::ControlExpired(_) => {
                "That button has expired. Please run the command again.".to_string()
            }
            Self::NotAuthorized { .. } => {
                "You are not authorized to interact with this control.".to_string()
            }
            Self::Other(msg) => msg.clone(),
        }
    }
}
