use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};

use crate::cascade::{CallContext, Orchestrator};
use crate::config::Config;
use crate::error::CascadeError;
use crate::knowledge::cache::KnowledgeCache;
use crate::knowledge::store::FileBlobStore;
use crate::knowledge::{DigestOptions, KnowledgeProcessor, Material};
use crate::response::{ToolMetadata, ToolResponse};
use crate::tools::digest::DigestRequest;
use crate::tools::generate::GenerateRequest;
use crate::tools::listbackends::{BackendInfo, ListBackendsResponse};
use crate::tools::{validate_prompt, validate_temperature};

#[derive(Clone)]
pub struct CascadeServer {
    orchestrator: Arc<Orchestrator>,
    knowledge: Arc<KnowledgeProcessor>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CascadeServer {
    /// Build the orchestrator, rehydrate the knowledge cache from disk, and
    /// wire the tool router.
    pub async fn from_config(config: Config) -> Result<Self, CascadeError> {
        let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
        let store = Arc::new(FileBlobStore::new(config.knowledge.cache_dir.clone()));
        let cache = Arc::new(KnowledgeCache::load(store, &config.knowledge).await);
        let knowledge = Arc::new(KnowledgeProcessor::new(
            orchestrator.clone(),
            cache,
            config.knowledge.clone(),
        ));
        Ok(Self::new(orchestrator, knowledge))
    }

    pub fn new(orchestrator: Arc<Orchestrator>, knowledge: Arc<KnowledgeProcessor>) -> Self {
        Self {
            orchestrator,
            knowledge,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "generate",
        description = "Generate a reply through the backend cascade. Rate-limited or failing backends are retried or skipped automatically. Set `json: true` for a structured reply.",
        annotations(read_only_hint = true)
    )]
    async fn generate(
        &self,
        Parameters(req): Parameters<GenerateRequest>,
    ) -> Result<CallToolResult, McpError> {
        validate_prompt(&req.prompt).map_err(|msg| McpError::invalid_params(msg, None))?;
        validate_temperature(req.temperature)
            .map_err(|msg| McpError::invalid_params(msg, None))?;

        let start = Instant::now();
        let wants_json = req.wants_json();
        let request = req.into_generation_request();
        let ctx = CallContext::default();

        let outcome = if wants_json {
            self.orchestrator
                .generate_json::<serde_json::Value>(request, &ctx)
                .await
                .and_then(|s| {
                    serde_json::to_string_pretty(&s.value)
                        .map(|json| (json, s.result.backend, true))
                        .map_err(|e| CascadeError::StructuredOutput(e.to_string()))
                })
        } else {
            self.orchestrator
                .generate_with(request, &ctx)
                .await
                .map(|r| (r.content, r.backend, false))
        };

        let response = match outcome {
            Ok((content, backend, is_json)) => {
                let meta = ToolMetadata::new("generate", backend, start.elapsed().as_secs_f64());
                if is_json {
                    ToolResponse::json(content, meta)
                } else {
                    ToolResponse::success(content, meta)
                }
            }
            Err(e) => {
                tracing::warn!("generate failed: {e}");
                ToolResponse::error(
                    e.user_message(),
                    ToolMetadata::new(
                        "generate",
                        e.backend().unwrap_or("none"),
                        start.elapsed().as_secs_f64(),
                    ),
                )
            }
        };

        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "digest",
        description = "Reduce a large set of source documents to one bounded synthesis focused on a topic. Oversized input is summarised in batches and merged; repeated inputs are served from cache.",
        annotations(read_only_hint = true)
    )]
    async fn digest(
        &self,
        Parameters(req): Parameters<DigestRequest>,
    ) -> Result<CallToolResult, McpError> {
        if req.topic.trim().is_empty() {
            return Err(McpError::invalid_params("topic must not be empty", None));
        }

        let start = Instant::now();
        let options = DigestOptions::new(req.topic.clone(), req.intent_or_default());
        let materials: Vec<Material> = req.materials.into_iter().map(Material::from).collect();

        let response = match self.knowledge.digest(&materials, &options).await {
            Ok(synthesis) => ToolResponse::success(
                synthesis,
                ToolMetadata::new("digest", "cascade", start.elapsed().as_secs_f64()),
            ),
            Err(e) => {
                tracing::warn!("digest failed: {e}");
                ToolResponse::error(
                    e.user_message(),
                    ToolMetadata::new(
                        "digest",
                        e.backend().unwrap_or("none"),
                        start.elapsed().as_secs_f64(),
                    ),
                )
            }
        };

        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "listbackends",
        description = "List configured backends with protocol, availability, circuit-breaker state, and capabilities.",
        annotations(read_only_hint = true)
    )]
    async fn listbackends(&self) -> Result<CallToolResult, McpError> {
        let breaker = self.orchestrator.breaker();
        let backends = self
            .orchestrator
            .catalog()
            .list()
            .iter()
            .map(|b| BackendInfo::describe(b.as_ref(), breaker))
            .collect();

        let content = ListBackendsResponse { backends }.to_markdown();
        let response =
            ToolResponse::success(content, ToolMetadata::new("listbackends", "none", 0.0));

        Ok(response.into_call_tool_result())
    }
}

#[tool_handler]
impl ServerHandler for CascadeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "cascade".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Cascade: resilient text generation over several backends.\n\n\
                 - `generate` runs a prompt through the backend cascade. Rate limits are waited \
                   out on the primary, switched away from elsewhere, and retried once more at the end.\n\
                 - `digest` turns many or very large documents into one synthesis you can put in a prompt.\n\
                 - `listbackends` shows which backends are configured, available, or temporarily excluded."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
