//! Live stdio sessions against tool servers.
//!
//! A [`ToolSession`] launches one server child process, initializes an MCP
//! client over its stdio, and forwards `tools/list` and `tools/call`. A
//! [`ToolRouter`] fans out across every toolset attached to an agent and routes
//! calls by tool name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rust_mcp_sdk::McpClient;
use rust_mcp_sdk::mcp_client::{ClientHandlerCore, ClientRuntime, client_runtime_core};
use rust_mcp_sdk::schema::schema_utils::{
    NotificationFromServer, RequestFromServer, ResultFromClient,
};
use rust_mcp_sdk::schema::{
    CallToolRequestParams, ClientCapabilities, Implementation, InitializeRequestParams,
    LATEST_PROTOCOL_VERSION, RpcError,
};
use rust_mcp_sdk::{StdioTransport, TransportOptions};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use super::{McpToolset, ToolSpec};

/// Tool calls issued by the model can take much longer than session setup.
const CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Anything that can list tools and execute them by name.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSpec>>;

    /// Execute `name` with `arguments`; the returned value is a JSON object
    /// suitable as a model-facing function response.
    async fn call_tool(&self, name: &str, arguments: JsonMap<String, JsonValue>)
    -> anyhow::Result<JsonValue>;
}

/// One running tool server.
pub struct ToolSession {
    toolset: McpToolset,
    client: Arc<ClientRuntime>,
}

impl ToolSession {
    /// Launch the server and complete the MCP handshake within the
    /// connection timeout.
    pub async fn open(toolset: &McpToolset) -> anyhow::Result<Self> {
        let params = &toolset.connection.server_params;
        let timeout = toolset.connection.timeout;

        let client_details = InitializeRequestParams {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "codeanalyst-agent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
            },
            protocol_version: LATEST_PROTOCOL_VERSION.into(),
        };

        let unset = params.unset_env();
        if !unset.is_empty() {
            tracing::warn!(
                "launching toolset '{}' without: {}",
                toolset.key,
                unset.join(", ")
            );
        }
        tracing::info!(
            "launching toolset '{}': {} {}",
            toolset.key,
            params.command,
            params.args.join(" ")
        );

        let host_names = std::env::vars_os().filter_map(|(name, _)| match name.into_string() {
            Ok(name) => Some(name),
            Err(name) => {
                tracing::debug!("cannot unset non-unicode variable {:?} for the child", name);
                None
            }
        });
        let (program, args) = params.launch_invocation(host_names);
        let transport = StdioTransport::create_with_server_launch(
            &program,
            args,
            Some(params.launch_env()),
            TransportOptions::default(),
        )
        .map_err(|e| anyhow::anyhow!("transport error for '{}': {}", toolset.key, e))?;

        let client = client_runtime_core::create_client(client_details, transport, NoopClientHandler);

        tokio::time::timeout(timeout, client.clone().start())
            .await
            .map_err(|_| anyhow::anyhow!("toolset '{}' start timeout", toolset.key))
            .and_then(|r| {
                r.map_err(|e| anyhow::anyhow!("toolset '{}' start error: {}", toolset.key, e))
            })?;
        tracing::debug!("toolset '{}' initialized", toolset.key);

        Ok(Self {
            toolset: toolset.clone(),
            client,
        })
    }

    pub fn key(&self) -> &str {
        &self.toolset.key
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tokio::time::timeout(self.toolset.connection.timeout, self.client.shut_down())
            .await
            .map_err(|_| anyhow::anyhow!("toolset '{}' shutdown timeout", self.toolset.key))
            .and_then(|r| {
                r.map_err(|e| anyhow::anyhow!("toolset '{}' shutdown error: {}", self.toolset.key, e))
            })
    }
}

#[async_trait]
impl ToolProvider for ToolSession {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSpec>> {
        let resp = tokio::time::timeout(self.toolset.connection.timeout, self.client.list_tools(None))
            .await
            .map_err(|_| anyhow::anyhow!("toolset '{}' list_tools timeout", self.toolset.key))
            .and_then(|r| {
                r.map_err(|e| anyhow::anyhow!("toolset '{}' list_tools error: {}", self.toolset.key, e))
            })?;
        let mut specs = Vec::with_capacity(resp.tools.len());
        for tool in resp.tools {
            if !self.toolset.exposes(&tool.name) {
                tracing::debug!("toolset '{}': filtered out {}", self.toolset.key, tool.name);
                continue;
            }
            let input_schema = serde_json::to_value(&tool.input_schema)
                .with_context(|| format!("input schema of {}", tool.name))?;
            specs.push(ToolSpec {
                name: tool.name,
                description: tool.description,
                input_schema,
            });
        }
        Ok(specs)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: JsonMap<String, JsonValue>,
    ) -> anyhow::Result<JsonValue> {
        let params: CallToolRequestParams =
            serde_json::from_value(json!({ "name": name, "arguments": arguments }))
                .context("building tools/call params")?;
        let result = tokio::time::timeout(CALL_TIMEOUT, self.client.call_tool(params))
            .await
            .map_err(|_| anyhow::anyhow!("tool '{}' timed out", name))
            .and_then(|r| r.map_err(|e| anyhow::anyhow!("tool '{}' failed: {}", name, e)))?;
        let raw = serde_json::to_value(&result).context("encoding tool result")?;
        Ok(flatten_call_result(&raw))
    }
}

/// Reduce a `tools/call` result to `{ "content": <text>, "isError": bool }`.
///
/// Text blocks are joined with newlines; non-text blocks are kept as JSON so
/// nothing the server returned is silently lost.
pub fn flatten_call_result(raw: &JsonValue) -> JsonValue {
    let is_error = raw
        .get("isError")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    let blocks = raw
        .get("content")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default();
    let content = blocks
        .iter()
        .map(|b| match b.get("text").and_then(JsonValue::as_str) {
            Some(t) => t.to_string(),
            None => b.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n");
    json!({ "content": content, "isError": is_error })
}

/// All sessions for one agent invocation, indexed by tool name.
pub struct ToolRouter {
    sessions: Vec<Box<dyn RoutedProvider>>,
    routes: HashMap<String, usize>,
    specs: Vec<ToolSpec>,
}

/// Provider that can also be shut down; implemented by live sessions and by
/// test doubles.
#[async_trait]
pub trait RoutedProvider: ToolProvider {
    fn key(&self) -> &str;
    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl RoutedProvider for ToolSession {
    fn key(&self) -> &str {
        ToolSession::key(self)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.shutdown().await
    }
}

impl ToolRouter {
    /// Launch every toolset; a toolset that fails to open is an error.
    pub async fn open_all(toolsets: &[McpToolset]) -> anyhow::Result<Self> {
        let mut sessions: Vec<Box<dyn RoutedProvider>> = Vec::with_capacity(toolsets.len());
        for ts in toolsets {
            match ToolSession::open(ts).await {
                Ok(session) => sessions.push(Box::new(session)),
                Err(e) => {
                    close_sessions(&sessions).await;
                    return Err(e.context(format!("opening toolset '{}'", ts.key)));
                }
            }
        }
        Self::from_providers(sessions).await
    }

    /// Build the routing table; the first toolset to advertise a name wins.
    /// Every session is closed again if any of them fails to list its tools.
    pub async fn from_providers(sessions: Vec<Box<dyn RoutedProvider>>) -> anyhow::Result<Self> {
        let mut routes = HashMap::new();
        let mut specs = Vec::new();
        for (idx, session) in sessions.iter().enumerate() {
            let tools = match session.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    let key = session.key().to_string();
                    close_sessions(&sessions).await;
                    return Err(e.context(format!("listing tools of toolset '{key}'")));
                }
            };
            tracing::info!(
                "toolset '{}' tools: {}",
                session.key(),
                summarize_tools(&tools, 10)
            );
            for spec in tools {
                if routes.contains_key(&spec.name) {
                    tracing::warn!(
                        "duplicate tool '{}' from toolset '{}' ignored",
                        spec.name,
                        session.key()
                    );
                    continue;
                }
                routes.insert(spec.name.clone(), idx);
                specs.push(spec);
            }
        }
        Ok(Self {
            sessions,
            routes,
            specs,
        })
    }

    /// Shut every session down, logging failures.
    pub async fn close(self) {
        close_sessions(&self.sessions).await;
    }
}

async fn close_sessions(sessions: &[Box<dyn RoutedProvider>]) {
    for session in sessions {
        if let Err(e) = session.close().await {
            tracing::warn!("toolset '{}' close failed: {}", session.key(), e);
        }
    }
}

#[async_trait]
impl ToolProvider for ToolRouter {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSpec>> {
        Ok(self.specs.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: JsonMap<String, JsonValue>,
    ) -> anyhow::Result<JsonValue> {
        let Some(idx) = self.routes.get(name) else {
            return Err(anyhow::anyhow!("unknown tool '{}'", name));
        };
        self.sessions[*idx].call_tool(name, arguments).await
    }
}

fn summarize_tools(tools: &[ToolSpec], max_show: usize) -> String {
    if tools.is_empty() {
        return "<none>".to_string();
    }
    let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    names.sort();
    let shown = names[..names.len().min(max_show)].join(", ");
    if names.len() > max_show {
        format!("{} (+{} more)", shown, names.len() - max_show)
    } else {
        shown
    }
}

#[derive(Clone)]
struct NoopClientHandler;

#[async_trait]
impl ClientHandlerCore for NoopClientHandler {
    async fn handle_request(
        &self,
        _request: RequestFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<ResultFromClient, RpcError> {
        Err(RpcError::method_not_found())
    }

    async fn handle_notification(
        &self,
        _notification: NotificationFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }

    async fn handle_error(
        &self,
        _error: &RpcError,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }
}
