// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `tool.search` — web search through the external search client.
//! Payload is a plain query or a [`SearchRequest`] JSON object.

use std::sync::Arc;

use crate::clients::{SearchClient, SearchRequest};
use crate::runtime::{BlockTool, ToolContext};
use crate::ToolError;

pub struct SearchTool {
    pub client: Arc<dyn SearchClient>,
}

fn parse_payload(payload: &str) -> Result<SearchRequest, ToolError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(ToolError::Failed("search payload is empty".into()));
    }
    if trimmed.starts_with('{') {
        let request: SearchRequest = serde_json::from_str(trimmed)
            .map_err(|e| ToolError::Failed(format!("bad search object: {e}")))?;
        if request.query.trim().is_empty() {
            return Err(ToolError::Failed("search query is required".into()));
        }
        return Ok(request);
    }
    Ok(SearchRequest::plain(trimmed))
}

#[async_trait::async_trait]
impl BlockTool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn parallelizable(&self) -> bool {
        true
    }

    async fn execute(&self, payload: &str, _ctx: &ToolContext) -> Result<String, ToolError> {
        let request = parse_payload(payload)?;
        let hits = self
            .client
            .search(&request)
            .await
            .map_err(|e| ToolError::Failed(format!("search error: {e}")))?;

        if hits.is_empty() {
            return Ok(format!("(no results for {:?})", request.query));
        }

        let mut out = String::new();
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!(
                "{}. {}\n   {}\n   {}\n",
                i + 1,
                hit.title,
                hit.url,
                hit.snippet
            ));
        }
        out.push_str(&format!("— {} results for {:?}", hits.len(), request.query));
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
