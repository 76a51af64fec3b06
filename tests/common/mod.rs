//! Scripted in-memory backend shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::Notify;

use imgen::control::{ControlEvent, ControlSurface};
use imgen::dispatch::api::JobApi;
use imgen::dispatch::pipeline::Pipeline;
use imgen::dispatch::poll::FixedRetry;
use imgen::dispatch::transport::{BackendRequest, BackendResponse, Transport};
use imgen::error::{ImgenError, Stage};
use imgen::generate::{Generator, TracingProgress};

pub const BASE_URL: &str = "http://backend.test";

/// PNG magic followed by junk; enough for extension sniffing.
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];

/// Ordered log shared between the backend and a control surface.
pub type Timeline = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone)]
pub enum Reply {
    Http(u16, String),
    Unreachable,
}

impl Reply {
    pub fn created(id: &str) -> Self {
        Self::Http(201, id.to_string())
    }

    pub fn pending() -> Self {
        Self::Http(200, "pending".to_string())
    }

    pub fn completed() -> Self {
        Self::Http(200, "completed".to_string())
    }

    pub fn failed() -> Self {
        Self::Http(200, "failed".to_string())
    }

    pub fn image(seed: i64, bytes: &[u8]) -> Self {
        Self::Http(
            200,
            format!(r#"{{"seed": {seed}, "base64": "{}"}}"#, BASE64.encode(bytes)),
        )
    }

    pub fn status(code: u16) -> Self {
        Self::Http(code, String::new())
    }
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    fallback: Option<Reply>,
}

impl Script {
    fn next(&mut self) -> Option<Reply> {
        self.replies.pop_front().or_else(|| self.fallback.clone())
    }
}

#[derive(Default)]
pub struct FakeBackend {
    submit: Mutex<Script>,
    status: Mutex<Script>,
    result: Mutex<Script>,
    log: Mutex<Vec<BackendRequest>>,
    timeline: Option<Timeline>,
    status_gate: Mutex<Option<Arc<Notify>>>,
    latency: Mutex<Duration>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeline(timeline: Timeline) -> Self {
        Self {
            timeline: Some(timeline),
            ..Self::default()
        }
    }

    /// Backend that completes every job on the first poll.
    pub fn happy(seed: i64) -> Self {
        let backend = Self::new();
        backend.repeat(Stage::Submit, Reply::created("job-1"));
        backend.repeat(Stage::Poll, Reply::completed());
        backend.repeat(Stage::Fetch, Reply::image(seed, PNG_BYTES));
        backend
    }

    fn script(&self, stage: Stage) -> &Mutex<Script> {
        match stage {
            Stage::Submit => &self.submit,
            Stage::Poll => &self.status,
            Stage::Fetch => &self.result,
        }
    }

    /// Queue one-shot replies for `stage`, served before the fallback.
    pub fn push(&self, stage: Stage, replies: impl IntoIterator<Item = Reply>) {
        self.script(stage).lock().unwrap().replies.extend(replies);
    }

    /// Reply served whenever the queue for `stage` is empty.
    pub fn repeat(&self, stage: Stage, reply: Reply) {
        self.script(stage).lock().unwrap().fallback = Some(reply);
    }

    /// Every call takes `latency` of (virtual) time before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Status queries block until `release_status`.
    pub fn hold_status(&self) {
        *self.status_gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    /// Lets one held status query through and stops holding new ones.
    pub fn release_status(&self) {
        if let Some(gate) = self.status_gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| stage_of(&r.url) == stage)
            .count()
    }

    pub fn submit_bodies(&self) -> Vec<serde_json::Value> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| stage_of(&r.url) == Stage::Submit)
            .filter_map(|r| r.body.clone())
            .collect()
    }
}

fn stage_of(url: &str) -> Stage {
    if url.contains("/job/submit/") {
        Stage::Submit
    } else if url.contains("/job/status/") {
        Stage::Poll
    } else {
        Stage::Fetch
    }
}

impl Transport for FakeBackend {
    async fn execute(&self, request: BackendRequest) -> Result<BackendResponse, ImgenError> {
        let stage = stage_of(&request.url);
        self.log.lock().unwrap().push(request);
        if let Some(timeline) = &self.timeline {
            timeline.lock().unwrap().push(stage.to_string());
        }

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if stage == Stage::Poll {
            let gate = self.status_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
        }

        let reply = self.script(stage).lock().unwrap().next();
        match reply {
            Some(Reply::Http(status, body)) => Ok(BackendResponse::new(status, body)),
            Some(Reply::Unreachable) | None => {
                Err(ImgenError::Other("connection refused".to_string()))
            }
        }
    }
}

/// Control surface that remembers every event, optionally interleaved with
/// backend calls on a shared timeline.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<ControlEvent>>,
    timeline: Option<Timeline>,
}

impl Recorder {
    pub fn with_timeline(timeline: Timeline) -> Self {
        Self {
            timeline: Some(timeline),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<ControlEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ControlSurface for Recorder {
    fn apply(&self, event: &ControlEvent) {
        self.events.lock().unwrap().push(*event);
        if let Some(timeline) = &self.timeline {
            let label = match event {
                ControlEvent::Attached(_) => "attached",
                ControlEvent::Disabled(_) => "disabled",
                ControlEvent::Enabled(_) => "enabled",
                ControlEvent::Expired(_) => "expired",
            };
            timeline.lock().unwrap().push(label.to_string());
        }
    }
}

pub fn fast_policy() -> FixedRetry {
    FixedRetry::new(5, Duration::from_secs(1))
}

pub fn generator(backend: Arc<FakeBackend>, surface: Arc<Recorder>) -> Generator<FakeBackend> {
    let pipeline = Pipeline::new(
        JobApi::new(BASE_URL),
        backend,
        fast_policy(),
        Duration::from_secs(2),
    )
    .with_request_timeout(Duration::from_secs(1));
    Generator::new(
        pipeline,
        Duration::from_secs(60),
        surface,
        Arc::new(TracingProgress),
    )
}

/// Yield until `cond` holds; panics if it never does.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
