use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};

use crate::config::Config;
use crate::control::{ControlId, DEFAULT_SWEEP_INTERVAL, TracingSurface};
use crate::dispatch::api::JobApi;
use crate::dispatch::pipeline::Pipeline;
use crate::dispatch::transport::HttpTransport;
use crate::error::ImgenError;
use crate::generate::{Delivery, Generator, TracingProgress};
use crate::persist::persist_image;
use crate::request::{Model, RequestSpec};
use crate::response::{ToolMetadata, ToolResponse};
use crate::tools::generate::{GenerateRequest, RegenerateRequest};
use crate::tools::listmodels::{ListModelsRequest, ListModelsResponse};

const MAX_USER_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct ImgenServer {
    generator: Arc<Generator<HttpTransport>>,
    output_dir: Arc<PathBuf>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ImgenServer {
    /// Spawns the control sweeper, so this must run inside a Tokio runtime.
    pub fn new(config: &Config) -> Self {
        let transport = Arc::new(HttpTransport::new(config.request_timeout()));
        let pipeline = Pipeline::new(
            JobApi::new(config.base_url.clone()),
            transport,
            config.poll_policy(),
            config.grace(),
        )
        .with_request_timeout(config.request_timeout());
        let generator = Generator::new(
            pipeline,
            config.control_ttl(),
            Arc::new(TracingSurface),
            Arc::new(TracingProgress),
        );
        generator.controls().spawn_sweeper(DEFAULT_SWEEP_INTERVAL);
        tracing::info!(
            base_url = %config.base_url,
            output_dir = %config.output_dir.display(),
            "image backend configured"
        );
        Self {
            generator: Arc::new(generator),
            output_dir: Arc::new(config.output_dir.clone()),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "generate",
        description = "Generate an image from a prompt. Trailing flags tune the request: --negative, --cfgscale, --denoisestrength, --seed. Returns the saved image path, the seed used and a regenerate control id. One generation per user at a time."
    )]
    async fn generate(
        &self,
        Parameters(req): Parameters<GenerateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let user = validate_user_id(&req.user_id)?;
        let spec = RequestSpec::parse(&req.model, &req.prompt)
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
        let model = spec.model();
        let start = Instant::now();

        let outcome = self.generator.generate(user, spec).await;
        Ok(self.render("generate", Some(model), outcome, start).await)
    }

    #[tool(
        name = "regenerate",
        description = "Activate a regenerate control from an earlier result: runs the same request again with a fresh image. Only the original requester may activate it, once, within its lifetime."
    )]
    async fn regenerate(
        &self,
        Parameters(req): Parameters<RegenerateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let user = validate_user_id(&req.user_id)?;
        let start = Instant::now();

        let outcome = match req.control_id.parse::<ControlId>() {
            Ok(id) => self.generator.regenerate(user, id).await,
            Err(e) => Err(e),
        };
        let model = outcome.as_ref().ok().map(|d| d.model);
        Ok(self.render("regenerate", model, outcome, start).await)
    }

    #[tool(
        name = "listmodels",
        description = "List the image models accepted by `generate`, optionally filtered by name.",
        annotations(read_only_hint = true)
    )]
    async fn listmodels(
        &self,
        Parameters(req): Parameters<ListModelsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let list = ListModelsResponse::for_query(req.query.as_deref());
        let response = ToolResponse::success(
            list.to_markdown(),
            ToolMetadata {
                tool_name: "listmodels".to_string(),
                ..Default::default()
            },
        );
        Ok(response.into_call_tool_result())
    }
}

impl ImgenServer {
    async fn render(
        &self,
        tool_name: &str,
        model: Option<Model>,
        outcome: Result<Delivery, ImgenError>,
        start: Instant,
    ) -> CallToolResult {
        let mut metadata = ToolMetadata {
            tool_name: tool_name.to_string(),
            model: model.map(|m| m.as_str().to_string()),
            ..Default::default()
        };

        let mut response = match outcome {
            Ok(delivery) => {
                metadata.seed = Some(delivery.result.seed);
                metadata.control_id = Some(delivery.control.to_string());
                match persist_image(&self.output_dir, delivery.model, &delivery.result).await {
                    Ok(path) => {
                        metadata.image_path = Some(path.display().to_string());
                        ToolResponse::success(delivery.seed_label, metadata)
                    }
                    Err(e) => {
                        tracing::warn!("failed to save image: {e}");
                        ToolResponse::error(format!("Failed to save image: {e}"), metadata)
                    }
                }
            }
            Err(e) => ToolResponse::error(e.user_message(), metadata),
        };

        response.metadata.duration_seconds = start.elapsed().as_secs_f64();
        response.into_call_tool_result()
    }
}

fn validate_user_id(user_id: &str) -> Result<&str, McpError> {
    let user = user_id.trim();
    if user.is_empty() {
        return Err(McpError::invalid_params("user_id must not be empty", None));
    }
    if user.len() > MAX_USER_ID_LEN {
        return Err(McpError::invalid_params(
            format!("user_id exceeds {MAX_USER_ID_LEN} bytes"),
            None,
        ));
    }
    Ok(user)
}

#[tool_handler]
impl ServerHandler for ImgenServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "imgen".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "imgen: image generation on a remote job backend.\n\n\
                 1. Call `listmodels` for accepted model names.\n\
                 2. Call `generate` with user_id, model and prompt. Flags go after the prompt, \
                    e.g. `a fox --negative blurry --seed 7`.\n\
                 3. The result carries `control_id`; pass it to `regenerate` within a minute \
                    to run the same request again.\n\n\
                 A user may have one generation in flight; further requests are refused until it ends."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
