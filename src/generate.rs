use std::sync::Arc;
use std::time::Duration;

use crate::admission::AdmissionGuard;
use crate::control::{ControlBoard, ControlId, ControlSurface};
use crate::dispatch::JobResult;
use crate::dispatch::pipeline::Pipeline;
use crate::dispatch::transport::Transport;
use crate::error::ImgenError;
use crate::request::{Model, RequestSpec};

/// Cosmetic "working on it" indicator around a pipeline run.
pub trait ProgressSurface: Send + Sync {
    fn started(&self, user: &str, spec: &RequestSpec);
    fn finished(&self, user: &str);
}

pub struct TracingProgress;

impl ProgressSurface for TracingProgress {
    fn started(&self, user: &str, spec: &RequestSpec) {
        tracing::info!(user, model = %spec.model(), "generating");
    }

    fn finished(&self, user: &str) {
        tracing::debug!(user, "generation ended");
    }
}

/// A delivered image plus the control that can regenerate it.
#[derive(Debug)]
pub struct Delivery {
    pub model: Model,
    pub result: JobResult,
    pub control: ControlId,
    pub seed_label: String,
}

/// Admission-controlled entry points for fresh requests and regenerations.
pub struct Generator<T> {
    pipeline: Pipeline<T>,
    admission: AdmissionGuard,
    controls: Arc<ControlBoard>,
    progress: Arc<dyn ProgressSurface>,
}

impl<T: Transport> Generator<T> {
    pub fn new(
        pipeline: Pipeline<T>,
        control_ttl: Duration,
        surface: Arc<dyn ControlSurface>,
        progress: Arc<dyn ProgressSurface>,
    ) -> Self {
        Self {
            pipeline,
            admission: AdmissionGuard::new(),
            controls: Arc::new(ControlBoard::new(control_ttl, surface)),
            progress,
        }
    }

    pub fn pipeline(&self) -> &Pipeline<T> {
        &self.pipeline
    }

    pub fn admission(&self) -> &AdmissionGuard {
        &self.admission
    }

    pub fn controls(&self) -> &Arc<ControlBoard> {
        &self.controls
    }

    /// Top-level request from `user`.
    pub async fn generate(&self, user: &str, spec: RequestSpec) -> Result<Delivery, ImgenError> {
        let _token = self.admission.acquire(user)?;
        let spec = Arc::new(spec);
        let result = self.run_pipeline(user, &spec).await?;
        Ok(self.deliver(user, spec, result))
    }

    /// Activation of a regenerate control. The control is disabled before
    /// anything else happens, so a double activation runs one pipeline.
    /// Regenerations count against the same per-user admission slot as
    /// fresh requests.
    pub async fn regenerate(&self, user: &str, control: ControlId) -> Result<Delivery, ImgenError> {
        let spec = self.controls.activate(control, user)?;

        let _token = match self.admission.acquire(user) {
            Ok(token) => token,
            Err(e) => {
                // Nothing ran, so the button stays usable
                self.controls.restore(control);
                return Err(e);
            }
        };

        tracing::info!(user, %control, "regenerating");
        let result = self.run_pipeline(user, &spec).await?;
        Ok(self.deliver(user, spec, result))
    }

    async fn run_pipeline(&self, user: &str, spec: &RequestSpec) -> Result<JobResult, ImgenError> {
        self.progress.started(user, spec);
        let result = self.pipeline.run(spec).await;
        self.progress.finished(user);
        if let Err(ref e) = result {
            tracing::warn!(user, model = %spec.model(), "generation failed: {e}");
        }
        result
    }

    fn deliver(&self, user: &str, spec: Arc<RequestSpec>, result: JobResult) -> Delivery {
        let model = spec.model();
        let control = self.controls.attach(user, spec);
        Delivery {
            model,
            seed_label: result.seed_label(),
            result,
            control,
        }
    }
}
