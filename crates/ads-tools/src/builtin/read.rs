// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `tool.read` — fenced file reads under the directory allow-list.
//!
//! Payload forms: a bare path, an array of paths, or
//! `{"path"|"paths", "startLine"?, "endLine"?, "maxBytes"?}`.

use serde::Deserialize;

use crate::runtime::{BlockTool, ToolContext};
use crate::ToolError;

pub struct ReadTool {
    pub enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ReadObject {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default, rename = "startLine")]
    start_line: Option<usize>,
    #[serde(default, rename = "endLine")]
    end_line: Option<usize>,
    #[serde(default, rename = "maxBytes")]
    max_bytes: Option<usize>,
}

#[derive(Debug)]
struct ReadRequest {
    paths: Vec<String>,
    start_line: Option<usize>,
    end_line: Option<usize>,
    max_bytes: Option<usize>,
}

fn parse_payload(payload: &str) -> Result<ReadRequest, ToolError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(ToolError::Failed("read payload is empty".into()));
    }
    if trimmed.starts_with('[') {
        let paths: Vec<String> = serde_json::from_str(trimmed)
            .map_err(|e| ToolError::Failed(format!("bad path array: {e}")))?;
        return Ok(ReadRequest {
            paths,
            start_line: None,
            end_line: None,
            max_bytes: None,
        });
    }
    if trimmed.starts_with('{') {
        let obj: ReadObject = serde_json::from_str(trimmed)
            .map_err(|e| ToolError::Failed(format!("bad read object: {e}")))?;
        let mut paths = obj.paths;
        if let Some(p) = obj.path {
            paths.insert(0, p);
        }
        if paths.is_empty() {
            return Err(ToolError::Failed("read object names no path".into()));
        }
        return Ok(ReadRequest {
            paths,
            start_line: obj.start_line,
            end_line: obj.end_line,
            max_bytes: obj.max_bytes,
        });
    }
    Ok(ReadRequest {
        paths: vec![trimmed.to_string()],
        start_line: None,
        end_line: None,
        max_bytes: None,
    })
}

#[async_trait::async_trait]
impl BlockTool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn parallelizable(&self) -> bool {
        true
    }

    async fn execute(&self, payload: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        if !self.enabled {
            return Err(ToolError::Disabled("read".into()));
        }
        let request = parse_payload(payload)?;
        let budget = request
            .max_bytes
            .unwrap_or(ctx.policy.limits.max_read_bytes)
            .min(ctx.policy.limits.max_read_bytes);

        let mut sections = Vec::with_capacity(request.paths.len());
        for raw_path in &request.paths {
            let resolved = ctx.policy.resolve_path(&ctx.base_dir, raw_path)?;
            let bytes = tokio::fs::read(&resolved)
                .await
                .map_err(|e| ToolError::Failed(format!("read {raw_path}: {e}")))?;

            if bytes.contains(&0) {
                return Err(ToolError::Policy(format!("binary refused: {raw_path}")));
            }
            let full = String::from_utf8_lossy(&bytes);

            let (content, ranged) = slice_lines(&full, request.start_line, request.end_line);
            let (content, truncated) = cap_bytes(&content, budget);

            let header = match (request.start_line, request.end_line) {
                (Some(a), Some(b)) if ranged => format!("📄 {raw_path}:{a}-{b}"),
                (Some(a), None) if ranged => format!("📄 {raw_path}:{a}-"),
                _ => format!("📄 {raw_path}"),
            };
            let nl = if content.ends_with('\n') || content.is_empty() { "" } else { "\n" };
            let marker = if truncated { "…(truncated)\n" } else { "" };
            sections.push(format!("{header}\n```\n{content}{nl}{marker}```"));
        }
        Ok(sections.join("\n\n"))
    }
}

/// Extract an inclusive 1-based line range.  Returns whether a range was
/// actually applied.
fn slice_lines(content: &str, start: Option<usize>, end: Option<usize>) -> (String, bool) {
    if start.is_none() && end.is_none() {
        return (content.to_string(), false);
    }
    let start = start.unwrap_or(1).max(1);
    let lines: Vec<&str> = content.lines().collect();
    let end = end.unwrap_or(lines.len()).min(lines.len());
    if start > end {
        return (String::new(), true);
    }
    let mut out = lines[start - 1..end].join("\n");
    out.push('\n');
    (out, true)
}

fn cap_bytes(content: &str, budget: usize) -> (String, bool) {
    if content.len() <= budget {
        return (content.to_string(), false);
    }
    let mut end = budget;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    let mut head = content[..end].to_string();
    if !head.ends_with('\n') {
        head.push('\n');
    }
    (head, true)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
