//! The agent record handed to the runtime.

use serde::Serialize;

use crate::config::AgentSettings;
use crate::mcp::McpToolset;

use super::instruction::sql_analyst_instruction;

pub const AGENT_NAME: &str = "codeanalyst_agent";
pub const AGENT_DESCRIPTION: &str = "You are a code analyst assistant that helps users analyze and understand code. You can read files, answer questions about code, and provide insights based on the content of the files.";

/// Model, identity, instruction, and tools of one agent. Built once at
/// startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentDefinition {
    pub model: String,
    pub name: String,
    pub description: String,
    pub instruction: String,
    pub tools: Vec<McpToolset>,
}

/// Build the SQL-analysis agent wired to the repository toolset.
pub fn codeanalyst_agent(settings: &AgentSettings, toolset: McpToolset) -> AgentDefinition {
    AgentDefinition {
        model: settings.model.clone(),
        name: AGENT_NAME.to_string(),
        description: AGENT_DESCRIPTION.to_string(),
        instruction: sql_analyst_instruction(&settings.github),
        tools: vec![toolset],
    }
}
