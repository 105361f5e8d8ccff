//! MCP server handler that exposes the analyst agent as a single callable tool.
//!
//! Each `call_tool` opens the agent's toolsets, runs one conversation through
//! the [`AgentRunner`], and shuts the tool servers down again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    CallToolResult, ClientRequest, ListToolsResult, RpcError, TextContent, Tool, ToolInputSchema,
    schema_utils::{NotificationFromClient, RequestFromClient, ResultFromServer},
};
use rust_mcp_sdk::{
    McpServer,
    mcp_server::{ServerHandlerCore, enforce_compatible_protocol_version},
};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::agent::{AgentDefinition, AgentRunner};
use crate::mcp::ToolRouter;
use crate::vertex::ModelBackend;

pub struct AnalystServerHandler {
    agent: Arc<AgentDefinition>,
    runner: AgentRunner,
}

impl AnalystServerHandler {
    pub fn new(
        agent: Arc<AgentDefinition>,
        backend: Arc<dyn ModelBackend>,
        max_turns: usize,
    ) -> Self {
        tracing::debug!(
            "initialized AnalystServerHandler (tool={}, toolsets={}, max_turns={})",
            agent.name,
            agent.tools.len(),
            max_turns
        );
        Self {
            runner: AgentRunner::new(agent.clone(), backend, max_turns),
            agent,
        }
    }

    fn tool_definition(&self) -> Tool {
        let mut props = HashMap::<String, JsonMap<String, JsonValue>>::new();
        let mut question_schema = JsonMap::new();
        question_schema.insert("type".to_string(), JsonValue::String("string".to_string()));
        question_schema.insert(
            "description".to_string(),
            JsonValue::String(
                "Question about the SQL in the configured repository, e.g. how a column is calculated."
                    .to_string(),
            ),
        );
        props.insert("question".to_string(), question_schema);
        Tool {
            annotations: None,
            description: Some(format!("question: string. {}", self.agent.description)),
            input_schema: ToolInputSchema::new(vec!["question".to_string()], Some(props)),
            meta: None,
            name: self.agent.name.clone(),
            output_schema: None,
            title: None,
        }
    }

    async fn answer(&self, question: &str) -> JsonValue {
        let router = match ToolRouter::open_all(&self.agent.tools).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("failed to open toolsets: {:#}", e);
                return json!({ "ok": false, "output": format!("failed to open toolsets: {e:#}") });
            }
        };
        let result = self.runner.ask(question, &router).await;
        router.close().await;
        match result {
            Ok(out) => {
                if out.ok {
                    tracing::info!(
                        "agent answered (turns={}, tool_calls={})",
                        out.turns,
                        out.tool_calls
                    );
                } else {
                    tracing::warn!("agent gave up (turns={}): {}", out.turns, out.output);
                }
                json!({ "ok": out.ok, "output": out.output })
            }
            Err(e) => {
                tracing::error!("agent run failed: {:#}", e);
                json!({ "ok": false, "output": format!("{e:#}") })
            }
        }
    }
}

/// Pull the non-empty `question` string out of the call arguments.
fn question_arg(arguments: Option<&JsonMap<String, JsonValue>>) -> Result<&str, RpcError> {
    match arguments.and_then(|m| m.get("question")).and_then(|v| v.as_str()) {
        Some(q) if !q.trim().is_empty() => Ok(q),
        Some(_) => Err(RpcError::invalid_params().with_message("'question' must not be empty".to_string())),
        None => Err(RpcError::invalid_params()
            .with_message("missing required 'question' string".to_string())),
    }
}

#[async_trait]
impl ServerHandlerCore for AnalystServerHandler {
    async fn handle_request(
        &self,
        request: RequestFromClient,
        runtime: &dyn McpServer,
    ) -> std::result::Result<ResultFromServer, RpcError> {
        let method_name = request.method().to_owned();
        tracing::info!("handle_request: method={}", method_name);
        match request {
            RequestFromClient::ClientRequest(client_request) => match client_request {
                ClientRequest::InitializeRequest(initialize_request) => {
                    tracing::debug!(
                        "initialize_request: client_protocol={}",
                        initialize_request.params.protocol_version
                    );
                    let mut server_info = runtime.server_info().to_owned();
                    if let Some(updated_protocol_version) = enforce_compatible_protocol_version(
                        &initialize_request.params.protocol_version,
                        &server_info.protocol_version,
                    )
                    .map_err(|err| {
                        tracing::error!(
                            "incompatible protocol version (client={}, server={})",
                            initialize_request.params.protocol_version,
                            server_info.protocol_version
                        );
                        RpcError::internal_error().with_message(err.to_string())
                    })? {
                        server_info.protocol_version = updated_protocol_version;
                    }
                    tracing::info!("initialized (protocol={})", server_info.protocol_version);
                    Ok(server_info.into())
                }

                ClientRequest::ListToolsRequest(_) => {
                    tracing::info!("list_tools (count=1)");
                    Ok(ListToolsResult {
                        meta: None,
                        next_cursor: None,
                        tools: vec![self.tool_definition()],
                    }
                    .into())
                }

                ClientRequest::CallToolRequest(request) => {
                    let tool = request.tool_name().to_string();
                    if tool != self.agent.name {
                        tracing::warn!("unknown tool: {}", tool);
                        return Err(RpcError::method_not_found()
                            .with_message(format!("Unknown tool '{}'", tool)));
                    }
                    let question = question_arg(request.params.arguments.as_ref()).inspect_err(|_| {
                        tracing::error!("call_tool rejected: bad 'question' argument (tool={})", tool);
                    })?;
                    tracing::debug!(
                        tool = %tool,
                        question_len = %question.chars().count(),
                        "invoking agent"
                    );
                    let payload = self.answer(question).await;
                    Ok(CallToolResult::text_content(vec![TextContent::from(payload.to_string())]).into())
                }

                _ => {
                    tracing::warn!("method not implemented: {}", method_name);
                    Err(RpcError::method_not_found()
                        .with_message(format!("No handler is implemented for '{method_name}'.")))
                }
            },
            RequestFromClient::CustomRequest(_) => {
                tracing::warn!("custom request not implemented");
                Err(RpcError::method_not_found()
                    .with_message("No handler is implemented for custom requests.".to_string()))
            }
        }
    }

    async fn handle_notification(
        &self,
        notification: NotificationFromClient,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        match &notification {
            NotificationFromClient::ClientNotification(_) => {
                tracing::debug!("handle_notification: client notification")
            }
            NotificationFromClient::CustomNotification(_) => {
                tracing::debug!("handle_notification: custom notification")
            }
        }
        Ok(())
    }

    async fn handle_error(
        &self,
        error: &RpcError,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        tracing::error!(
            "handle_error from client (code={:?}, message={:?})",
            error.code,
            error.message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::codeanalyst_agent;
    use crate::config::AgentSettings;
    use crate::env::EnvSnapshot;
    use crate::mcp::github_toolset;
    use crate::vertex::{GenerateContentRequest, GenerateContentResponse, VertexError};

    struct UnreachableBackend;

    #[async_trait]
    impl ModelBackend for UnreachableBackend {
        async fn generate(
            &self,
            _model: &str,
            _request: &GenerateContentRequest,
        ) -> Result<GenerateContentResponse, VertexError> {
            Err(VertexError::MissingProject)
        }
    }

    fn handler() -> AnalystServerHandler {
        let env = EnvSnapshot::default();
        let settings = AgentSettings::default();
        let agent = codeanalyst_agent(&settings, github_toolset(&env, &settings));
        AnalystServerHandler::new(Arc::new(agent), Arc::new(UnreachableBackend), 4)
    }

    #[test]
    fn tool_schema_requires_question() {
        let tool = handler().tool_definition();
        let val = serde_json::to_value(&tool).expect("serialize tool");
        assert_eq!(val["name"], "codeanalyst_agent");
        let required: Vec<&str> = val["inputSchema"]["required"]
            .as_array()
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(required, vec!["question"]);
        assert_eq!(val["inputSchema"]["properties"]["question"]["type"], "string");
    }

    #[test]
    fn question_argument_is_validated() {
        let mut args = JsonMap::new();
        assert!(question_arg(None).is_err());
        assert!(question_arg(Some(&args)).is_err());

        args.insert("question".into(), json!("   "));
        let err = question_arg(Some(&args)).unwrap_err();
        assert!(err.message.contains("empty"));

        args.insert("question".into(), json!(42));
        assert!(question_arg(Some(&args)).is_err());

        args.insert("question".into(), json!("How is revenue computed in file_1?"));
        assert_eq!(
            question_arg(Some(&args)).unwrap(),
            "How is revenue computed in file_1?"
        );
    }
}
