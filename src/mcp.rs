use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    chatbot::Chatbot,
    error::{self, Error},
    search::{DEFAULT_SEARCH_LIMIT, SimilarityResult},
    source::AudienceTier,
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, truncate_chars},
};

#[derive(Clone)]
pub struct StorechatMcpServer {
    chatbot: Chatbot,
    tool_router: ToolRouter<Self>,
}

impl StorechatMcpServer {
    pub fn new(chatbot: Chatbot) -> Self {
        Self {
            chatbot,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl StorechatMcpServer {
    #[tool(
        name = "storechat_ask",
        description = "Ask the store assistant a question. Pass the returned sessionId back to continue the conversation."
    )]
    pub async fn storechat_ask(
        &self,
        params: Parameters<AskParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let reply = self
            .chatbot
            .ask(
                &params.query,
                params.session_id.as_deref(),
                params.tier.unwrap_or_default(),
            )
            .await
            .map_err(|e| tool_error("ask failed", e))?;

        let structured = serde_json::to_value(&reply)
            .map_err(|e| mcp_error("failed to serialize answer", e))?;
        let mut result = CallToolResult::success(vec![Content::text(reply.answer)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    #[tool(
        name = "storechat_search",
        description = "Rank indexed store records (products, categories, sales, customers) against a query. Customers only see catalog records."
    )]
    pub async fn storechat_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let tier = params.tier.unwrap_or_default();
        let results = self
            .chatbot
            .search(
                &params.query,
                tier,
                params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            )
            .await
            .map_err(|e| tool_error("search failed", e))?;

        let summary = format_search_summary(&results, &params.query);
        let structured = serde_json::to_value(SearchResponse {
            query: params.query,
            tier,
            result_count: results.len(),
            results,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    #[tool(
        name = "storechat_session",
        description = "Return a chat session and all of its messages, oldest first."
    )]
    pub async fn storechat_session(
        &self,
        params: Parameters<SessionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let id = params.0.session_id;
        let conversation = self
            .chatbot
            .get_session(&id)
            .await
            .map_err(|e| mcp_error("failed to load session", e))?
            .ok_or_else(|| {
                rmcp::ErrorData::invalid_params(
                    format!("session not found: {id}"),
                    None,
                )
            })?;

        let summary = conversation
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let structured = serde_json::to_value(&conversation)
            .map_err(|e| mcp_error("failed to serialize session", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for StorechatMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("storechat", env!("CARGO_PKG_VERSION"))
                    .with_title("storechat MCP"),
            )
            .with_instructions(
                "Use storechat_ask to answer questions about the store, reusing sessionId across turns. Use tier=owner only for the store owner.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AskParams {
    /// The question.
    pub query: String,
    /// Session to continue. Unknown ids start a new session.
    pub session_id: Option<String>,
    /// Audience tier (default: customer).
    pub tier: Option<AudienceTier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Audience tier (default: customer).
    pub tier: Option<AudienceTier>,
    /// Maximum number of results (default: 5).
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    tier: AudienceTier,
    result_count: usize,
    results: Vec<SimilarityResult>,
}

fn format_search_summary(results: &[SimilarityResult], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for r in results {
        lines.push(format!(
            "{:.3} [{}] {}",
            r.score,
            r.source_type,
            truncate_chars(&r.text, DEFAULT_PREVIEW_MAX_CHARS)
        ));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Client mistakes become invalid-params errors; anything else is internal.
fn tool_error(message: &str, error: Error) -> rmcp::ErrorData {
    match error {
        Error::InvalidQuery(reason) => {
            rmcp::ErrorData::invalid_params(reason, None)
        }
        other => mcp_error(message, other),
    }
}

/// Serve the MCP tools over stdio until the client disconnects.
pub async fn run_mcp(chatbot: Chatbot) -> error::Result<()> {
    let server = StorechatMcpServer::new(chatbot);

    let transport = rmcp::transport::stdio();
    let running = server.serve(transport).await.map_err(|e| {
        Error::Config(format!("MCP server initialization failed: {e}"))
    })?;
    running
        .waiting()
        .await
        .map_err(|e| Error::Config(format!("MCP server error: {e}")))?;
    Ok(())
}
