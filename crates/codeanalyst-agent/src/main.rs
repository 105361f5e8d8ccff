mod agent;
mod config;
mod env;
mod handler;
mod mcp;
mod vertex;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use env_flags::env_flags;
use once_cell::sync::OnceCell;
use rust_mcp_sdk::error::SdkResult;
use rust_mcp_sdk::mcp_server::{
    HyperServerOptions, ServerRuntime, hyper_server_core, server_runtime_core,
};
use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, LATEST_PROTOCOL_VERSION, ServerCapabilities,
    ServerCapabilitiesTools,
};
use rust_mcp_sdk::{McpServer, StdioTransport, TransportOptions};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, prelude::*};

use crate::agent::codeanalyst_agent;
use crate::config::{AgentSettings, UserConfig, expand_home, load_user_config};
use crate::env::EnvSnapshot;
use crate::handler::AnalystServerHandler;
use crate::mcp::github_toolset;
use crate::vertex::{GeminiClient, VertexPlatform, token_source_from_env};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Clone, Copy)]
enum LogStyle {
    Json,
    Compact,
    Pretty,
    Full,
}

fn fmt_layer<W>(writer: W, ansi: bool, style: LogStyle) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);
    match style {
        LogStyle::Json => base.json().boxed(),
        LogStyle::Compact => base.compact().boxed(),
        LogStyle::Pretty => base.pretty().boxed(),
        LogStyle::Full => base.boxed(),
    }
}

/// Home directory for logs and `config.toml`. Defaults to `$HOME/.codeanalyst`.
fn codeanalyst_home() -> PathBuf {
    env_flags! {
        /// Home directory (absolute or ~/...). Defaults to $HOME/.codeanalyst
        CODEANALYST_HOME: &str = "";
    }
    if !(*CODEANALYST_HOME).is_empty() {
        expand_home(*CODEANALYST_HOME)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".codeanalyst")
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".codeanalyst")
    }
}

fn init_tracing(home: &Path, user_cfg: Option<&UserConfig>) {
    env_flags! {
        /// Tracing filter, e.g. "info", "debug", or targets format.
        RUST_LOG: &str = "info";
        /// Preferred filter env (alias). If set, overrides RUST_LOG.
        TRACING_FILTER: &str = "";
        /// Pretty formatting for logs (ignored if TRACING_JSON=true).
        TRACING_PRETTY: bool = false;
        /// Compact single-line formatting for logs (ignored if TRACING_JSON=true)
        TRACING_COMPACT: bool = true;
        /// JSON formatting for logs
        TRACING_JSON: bool = false;
        /// If true, also log to file under <CODEANALYST_HOME>/logs or LOG_DIR
        LOG_TO_FILE: bool = true;
        /// Optional explicit log directory. Defaults to <CODEANALYST_HOME>/logs
        LOG_DIR: &str = "";
    }

    let env_set = |k: &str| std::env::var_os(k).is_some();

    let mut rust_log = if !(*TRACING_FILTER).is_empty() {
        (*TRACING_FILTER).to_string()
    } else {
        (*RUST_LOG).to_string()
    };
    let mut tracing_json = *TRACING_JSON;
    let mut tracing_compact = *TRACING_COMPACT;
    let mut tracing_pretty = *TRACING_PRETTY;
    let mut log_to_file = *LOG_TO_FILE;
    let mut log_dir: Option<PathBuf> = if !(*LOG_DIR).is_empty() {
        Some(expand_home(*LOG_DIR))
    } else {
        None
    };

    if let Some(cfg) = user_cfg.and_then(|c| c.logging.as_ref()) {
        if !(env_set("TRACING_FILTER") || env_set("RUST_LOG"))
            && let Some(level) = cfg.level.as_ref()
        {
            rust_log = level.clone();
        }
        if !env_set("TRACING_JSON")
            && let Some(v) = cfg.json
        {
            tracing_json = v;
        }
        if !env_set("TRACING_COMPACT")
            && let Some(v) = cfg.compact
        {
            tracing_compact = v;
        }
        if !env_set("TRACING_PRETTY")
            && let Some(v) = cfg.pretty
        {
            tracing_pretty = v;
        }
        if !env_set("LOG_TO_FILE")
            && let Some(v) = cfg.to_file
        {
            log_to_file = v;
        }
        if !env_set("LOG_DIR")
            && let Some(dir) = cfg.dir.as_ref()
        {
            log_dir = Some(expand_home(dir));
        }
    }

    let filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));
    let style = if tracing_json {
        LogStyle::Json
    } else if tracing_compact {
        LogStyle::Compact
    } else if tracing_pretty {
        LogStyle::Pretty
    } else {
        LogStyle::Full
    };

    static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

    // Always write logs to stderr to avoid contaminating stdio JSON-RPC.
    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(std::io::stderr, true, style)];
    let mut dir_error = None;
    if log_to_file {
        let dir = log_dir.unwrap_or_else(|| home.join("logs"));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "codeanalyst-mcp.log");
                let (nb, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                layers.push(fmt_layer(nb, false, style));
            }
            Err(e) => dir_error = Some((dir, e)),
        }
    }

    if let Err(e) = tracing_subscriber::registry().with(layers).with(filter).try_init() {
        tracing::debug!("tracing already set: {:?}", e);
    }
    if let Some((dir, e)) = dir_error {
        tracing::warn!("failed to create log dir {}: {}", dir.display(), e);
    }
}

/// Print the missing-cloud-id diagnostics. stdout belongs to JSON-RPC when
/// serving over stdio, so they go to `err` in that case.
fn report_startup<O: Write, E: Write>(
    env: &EnvSnapshot,
    serve_stdio: bool,
    out: &mut O,
    err: &mut E,
) -> Vec<&'static str> {
    let missing = if serve_stdio {
        env.report_missing_cloud_ids(err)
    } else {
        env.report_missing_cloud_ids(out)
    };
    if !missing.is_empty() {
        tracing::warn!("missing cloud settings: {}", missing.join(", "));
    }
    missing
}

#[tokio::main]
async fn main() -> SdkResult<()> {
    env_flags! {
        /// Transport: "stdio" (default) or "http"
        TRANSPORT: &str = "stdio";
        /// Host for HTTP transport
        HOST: &str = "127.0.0.1";
        /// Port for HTTP transport
        PORT: u16 = 8081;
        /// Ping interval for HTTP SSE
        PING_SECS: u64 = 5;
        /// Enable JSON response mode for HTTP
        HTTP_JSON: bool = false;
        /// Explicit .env file. If empty, the nearest .env above the current directory is used.
        DOTENV_PATH: &str = "";
        /// Print the agent definition as JSON and exit.
        DESCRIBE_AGENT: bool = false;
    }

    let home = codeanalyst_home();
    let (user_cfg, cfg_error) = match load_user_config(&home) {
        Ok(cfg) => (cfg, None),
        Err(e) => (None, Some(e)),
    };
    init_tracing(&home, user_cfg.as_ref());
    if let Some(e) = cfg_error {
        tracing::warn!("ignoring unreadable {}/config.toml: {:#}", home.display(), e);
    }

    let describe = *DESCRIBE_AGENT;
    tracing::info!(
        "starting codeanalyst-mcp (transport={}, describe={})",
        *TRANSPORT,
        describe
    );
    tracing::info!("codeanalyst_home={}", home.display());

    let env = if (*DOTENV_PATH).is_empty() {
        EnvSnapshot::load(None)
    } else {
        EnvSnapshot::load(Some(Path::new(*DOTENV_PATH)))
    };
    match env.source() {
        Some(path) => tracing::info!("loaded .env from {}", path.display()),
        None => tracing::info!("no .env file found; using process environment only"),
    }

    let serve_stdio = !describe && *TRANSPORT == "stdio";
    report_startup(
        &env,
        serve_stdio,
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    );

    let settings = AgentSettings::resolve(&env, user_cfg.as_ref());
    tracing::info!(
        "agent settings: model={}, max_turns={}, tool_timeout={:?}, repo={}/{}@{}",
        settings.model,
        settings.max_turns,
        settings.tool_timeout,
        settings.github.owner,
        settings.github.repo,
        settings.github.branch
    );
    let toolset = github_toolset(&env, &settings);
    let platform = VertexPlatform::init(&env);
    let agent = Arc::new(codeanalyst_agent(&settings, toolset));

    if describe {
        match serde_json::to_string_pretty(agent.as_ref()) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                tracing::error!("failed to serialize agent definition: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let backend = Arc::new(GeminiClient::new(platform, token_source_from_env(&env)));

    let server_details = InitializeResult {
        server_info: Implementation {
            name: "codeanalyst-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Code Analyst MCP Server".to_string()),
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            ..Default::default()
        },
        meta: None,
        instructions: Some(format!(
            "Call {} with {{ question }} to ask about SQL logic in {}/{}.",
            agent.name, settings.github.owner, settings.github.repo
        )),
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    };

    let handler = AnalystServerHandler::new(agent, backend, settings.max_turns);

    if serve_stdio {
        let transport = StdioTransport::new(TransportOptions::default())?;
        let server: ServerRuntime =
            server_runtime_core::create_server(server_details, transport, handler);
        tracing::info!("starting stdio server");
        if let Err(e) = server.start().await {
            let msg = match e.rpc_error_message() {
                Some(m) => m.to_string(),
                None => e.to_string(),
            };
            tracing::error!("server runtime error: {}", msg);
        }
    } else {
        let host = (*HOST).to_string();
        let port = *PORT;
        let ping = Duration::from_secs(*PING_SECS);
        let server = hyper_server_core::create_server(
            server_details,
            handler,
            HyperServerOptions {
                host: host.clone(),
                port,
                ping_interval: ping,
                enable_json_response: Some(*HTTP_JSON),
                ..Default::default()
            },
        );
        tracing::info!(
            "http server configured; starting listener on {}:{} (json={}, ping_secs={})",
            host,
            port,
            *HTTP_JSON,
            *PING_SECS
        );
        if let Err(e) = server.start().await {
            let msg = match e.rpc_error_message() {
                Some(m) => m.to_string(),
                None => e.to_string(),
            };
            tracing::error!("hyper server error: {}", msg);
        }
    }
    tracing::info!("server stopped");
    Ok(())
}
