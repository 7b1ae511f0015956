// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `tool.agent` — delegate a prompt to another registered adapter through
//! the [`AgentInvoker`] callback.  Payload is `{"agent", "prompt"}` or the
//! two-line form `<agent-id>\n<prompt…>`.

use std::sync::Arc;

use serde::Deserialize;

use crate::clients::AgentInvoker;
use crate::runtime::{BlockTool, ToolContext};
use crate::ToolError;

pub struct AgentTool {
    pub invoker: Arc<dyn AgentInvoker>,
}

#[derive(Debug, Deserialize)]
struct AgentRequest {
    agent: String,
    prompt: String,
}

fn parse_payload(payload: &str) -> Result<AgentRequest, ToolError> {
    let trimmed = payload.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed)
            .map_err(|e| ToolError::Failed(format!("bad agent payload: {e}")));
    }
    let (agent, prompt) = trimmed
        .split_once('\n')
        .ok_or_else(|| ToolError::Failed("agent payload needs '<agent>\\n<prompt>'".into()))?;
    let request = AgentRequest {
        agent: agent.trim().to_string(),
        prompt: prompt.trim().to_string(),
    };
    if request.agent.is_empty() || request.prompt.is_empty() {
        return Err(ToolError::Failed("agent and prompt are both required".into()));
    }
    Ok(request)
}

#[async_trait::async_trait]
impl BlockTool for AgentTool {
    fn name(&self) -> &str {
        "agent"
    }

    async fn execute(&self, payload: &str, _ctx: &ToolContext) -> Result<String, ToolError> {
        let request = parse_payload(payload)?;
        self.invoker
            .invoke(&request.agent, &request.prompt)
            .await
            .map_err(|e| ToolError::Failed(format!("agent {}: {e}", request.agent)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
