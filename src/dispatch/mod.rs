pub mod api;
pub mod fetch;
pub mod pipeline;
pub mod poll;
pub mod submit;
pub mod transport;

use crate::request::Model;

/// Backend-side lifecycle of a job, as last observed by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One submitted generation request, tracked by the backend-issued id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub model: Model,
    pub(crate) status: JobStatus,
}

impl Job {
    pub fn new(id: impl Into<String>, model: Model) -> Self {
        Self {
            id: id.into(),
            model,
            status: JobStatus::Pending,
        }
    }

    /// Only `PollLoop` moves this forward, and never out of a terminal status.
    pub fn status(&self) -> JobStatus {
        self.status
    }
}

/// Result of a single status query.
#[derive(Debug, PartialEq, Eq)]
pub enum PollStatus {
    /// Any token other than the two terminal ones.
    Pending(String),
    Completed,
    Failed,
}

/// Decoded output of a completed job. The caller owns it from here on.
#[derive(Clone, PartialEq, Eq)]
pub struct JobResult {
    pub seed: i64,
    pub image: Vec<u8>,
}

impl JobResult {
    pub fn seed_label(&self) -> String {
        format!("Seed: {}", self.seed)
    }

    /// File extension guessed from the image's magic bytes (PNG when unknown).
    pub fn image_extension(&self) -> &'static str {
        match self.image.as_slice() {
            [0xFF, 0xD8, 0xFF, ..] => "jpg",
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "webp",
            [b'G', b'I', b'F', b'8', ..] => "gif",
            _ => "png",
        }
    }
}

impl std::fmt::Debug for JobResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobResult")
            .field("seed", &self.seed)
            .field("image_bytes", &self.image.len())
            .finish()
    }
}
