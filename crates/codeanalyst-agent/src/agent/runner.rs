//! Conversation loop that drives one question through the model and tools.
//!
//! The model decides which tools to call and in what order; the loop only
//! executes the function calls it emits, feeds the results back, and stops on
//! the first turn that produces no function calls or after `max_turns`.

use std::sync::Arc;

use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;

use crate::mcp::ToolProvider;
use crate::vertex::{
    Content, FunctionCall, FunctionResponse, GenerateContentRequest, ModelBackend,
    ToolDeclarations, declaration_for,
};

use super::AgentDefinition;

/// Result of answering one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRunOutput {
    /// True when the model produced a final answer.
    pub ok: bool,
    /// Final answer, or a description of why the run stopped.
    pub output: String,
    /// Model round trips performed.
    pub turns: usize,
    /// Tool calls executed on the model's behalf.
    pub tool_calls: usize,
}

pub struct AgentRunner {
    agent: Arc<AgentDefinition>,
    backend: Arc<dyn ModelBackend>,
    max_turns: usize,
}

impl AgentRunner {
    pub fn new(
        agent: Arc<AgentDefinition>,
        backend: Arc<dyn ModelBackend>,
        max_turns: usize,
    ) -> Self {
        Self {
            agent,
            backend,
            max_turns,
        }
    }

    pub async fn ask(
        &self,
        question: &str,
        tools: &dyn ToolProvider,
    ) -> anyhow::Result<AgentRunOutput> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("agent_run", %run_id, agent = %self.agent.name);
        self.run(question, tools).instrument(span).await
    }

    async fn run(
        &self,
        question: &str,
        tools: &dyn ToolProvider,
    ) -> anyhow::Result<AgentRunOutput> {
        tracing::info!("question received (chars={})", question.chars().count());

        let declarations: Vec<_> = tools.list_tools().await?.iter().map(declaration_for).collect();
        tracing::debug!("declared {} function(s) to the model", declarations.len());

        let mut request = GenerateContentRequest {
            contents: vec![Content::user_text(question)],
            system_instruction: Some(Content::system(self.agent.instruction.clone())),
            tools: if declarations.is_empty() {
                Vec::new()
            } else {
                vec![ToolDeclarations {
                    function_declarations: declarations,
                }]
            },
        };

        let mut tool_calls = 0;
        for turn in 1..=self.max_turns {
            let response = match self.backend.generate(&self.agent.model, &request).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("model call failed on turn {}: {}", turn, e);
                    return Ok(AgentRunOutput {
                        ok: false,
                        output: format!("model call failed: {e}"),
                        turns: turn,
                        tool_calls,
                    });
                }
            };

            let Some(content) = response.first_content().cloned() else {
                let reason = response.finish_reason().unwrap_or("unknown");
                tracing::warn!("model returned no content (finish_reason={})", reason);
                return Ok(AgentRunOutput {
                    ok: false,
                    output: format!("model returned no content (finish_reason={reason})"),
                    turns: turn,
                    tool_calls,
                });
            };

            let calls: Vec<FunctionCall> = content
                .parts
                .iter()
                .filter_map(|p| p.function_call.clone())
                .collect();

            if calls.is_empty() {
                let answer = content
                    .parts
                    .iter()
                    .filter(|p| p.thought != Some(true))
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("");
                if answer.trim().is_empty() {
                    let reason = response.finish_reason().unwrap_or("unknown");
                    tracing::warn!("model returned no answer text (finish_reason={})", reason);
                    return Ok(AgentRunOutput {
                        ok: false,
                        output: format!("model returned no answer text (finish_reason={reason})"),
                        turns: turn,
                        tool_calls,
                    });
                }
                tracing::info!(
                    "answer ready: turns={}, tool_calls={}, chars={}",
                    turn,
                    tool_calls,
                    answer.len()
                );
                return Ok(AgentRunOutput {
                    ok: true,
                    output: answer,
                    turns: turn,
                    tool_calls,
                });
            }

            // no model turn follows the last one, so its calls would go unread
            if turn == self.max_turns {
                let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
                tracing::warn!(
                    "turn limit reached; skipping {} requested call(s): {}",
                    names.len(),
                    names.join(", ")
                );
                break;
            }

            request.contents.push(Content {
                role: Some(content.role.unwrap_or_else(|| "model".to_string())),
                parts: content.parts,
            });

            let mut responses = Vec::with_capacity(calls.len());
            for call in calls {
                tool_calls += 1;
                tracing::info!("turn {}: calling tool {}", turn, call.name);
                let response = match tools.call_tool(&call.name, call.args).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("tool {} failed: {:#}", call.name, e);
                        json!({ "error": format!("{e:#}") })
                    }
                };
                responses.push(FunctionResponse {
                    name: call.name,
                    response,
                });
            }
            request.contents.push(Content::function_responses(responses));
        }

        tracing::warn!("no final answer after {} turns", self.max_turns);
        Ok(AgentRunOutput {
            ok: false,
            output: format!(
                "stopped after {} turns without a final answer",
                self.max_turns
            ),
            turns: self.max_turns,
            tool_calls,
        })
    }
}
