//! Connector for the GitHub repository tool server.

use std::collections::BTreeMap;

use crate::config::AgentSettings;
use crate::env::EnvSnapshot;

use super::{McpToolset, StdioConnectionParams, StdioServerParameters};

pub const GITHUB_TOOLSET_KEY: &str = "github";
pub const GITHUB_SERVER_COMMAND: &str = "npx";
pub const GITHUB_SERVER_PACKAGE: &str = "@modelcontextprotocol/server-github";
pub const GITHUB_TOKEN_VAR: &str = "GITHUB_PERSONAL_ACCESS_TOKEN";

/// Variables forwarded to the child. `PATH` lets the launcher resolve `npx`;
/// Windows additionally needs `SystemRoot` for node to start.
#[cfg(not(windows))]
pub const FORWARDED_ENV: &[&str] = &[GITHUB_TOKEN_VAR, "PATH"];
#[cfg(windows)]
pub const FORWARDED_ENV: &[&str] = &[GITHUB_TOKEN_VAR, "PATH", "SystemRoot"];

/// Describe how to launch the GitHub MCP server.
///
/// Every name in [`FORWARDED_ENV`] is declared whether or not the snapshot
/// has a value for it. The token is neither validated nor probed here.
pub fn github_toolset(env: &EnvSnapshot, settings: &AgentSettings) -> McpToolset {
    let forwarded: BTreeMap<String, Option<String>> = FORWARDED_ENV
        .iter()
        .map(|name| (name.to_string(), env.get(name).map(str::to_string)))
        .collect();

    let server_params = StdioServerParameters {
        command: GITHUB_SERVER_COMMAND.to_string(),
        args: vec!["-y".to_string(), GITHUB_SERVER_PACKAGE.to_string()],
        env: forwarded,
    };
    let unset = server_params.unset_env();
    if !unset.is_empty() {
        tracing::debug!("github toolset: unset forwarded vars: {}", unset.join(", "));
    }

    McpToolset {
        key: GITHUB_TOOLSET_KEY.to_string(),
        connection: StdioConnectionParams {
            server_params,
            timeout: settings.tool_timeout,
        },
        tool_filter: settings.tool_filter.clone(),
    }
}
