// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `tool.grep` — regex search across workspace files.
//!
//! Payload is `<pattern>` or `<pattern> <path>` or
//! `{"pattern", "path"?, "maxMatches"?}`.  Binary files (NUL byte in the
//! first block) and `.git` are skipped.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::runtime::{BlockTool, ToolContext};
use crate::ToolError;

const DEFAULT_MAX_MATCHES: usize = 100;

/// Files larger than this are skipped outright.
const MAX_FILE_BYTES: u64 = 4 * 1024 * 1024;

pub struct GrepTool {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
struct GrepObject {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, rename = "maxMatches")]
    max_matches: Option<usize>,
}

fn parse_payload(payload: &str) -> Result<GrepObject, ToolError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(ToolError::Failed("grep payload is empty".into()));
    }
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed)
            .map_err(|e| ToolError::Failed(format!("bad grep object: {e}")));
    }
    // "<pattern>" or "<pattern> <path>" — pattern may not contain spaces in
    // the plain form; quote via the JSON form when it does.
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let pattern = parts.next().unwrap_or_default().to_string();
    let path = parts.next().map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
    Ok(GrepObject {
        pattern,
        path,
        max_matches: None,
    })
}

#[async_trait::async_trait]
impl BlockTool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn parallelizable(&self) -> bool {
        true
    }

    async fn execute(&self, payload: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        if !self.enabled {
            return Err(ToolError::Disabled("grep".into()));
        }
        let request = parse_payload(payload)?;
        let regex = Regex::new(&request.pattern)
            .map_err(|e| ToolError::Failed(format!("bad pattern: {e}")))?;
        let max_matches = request.max_matches.unwrap_or(DEFAULT_MAX_MATCHES);

        let root = match &request.path {
            Some(p) => ctx.policy.resolve_path(&ctx.base_dir, p)?,
            None => ctx.base_dir.clone(),
        };

        let mut matches = Vec::new();
        'files: for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if entry
                .metadata()
                .map(|m| m.len() > MAX_FILE_BYTES)
                .unwrap_or(true)
            {
                continue;
            }
            let Ok(content) = std::fs::read(entry.path()) else {
                continue;
            };
            if content.iter().take(8192).any(|b| *b == 0) {
                continue;
            }
            let text = String::from_utf8_lossy(&content);
            let display = relative_display(entry.path(), &root);
            for (line_no, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!("{display}:{}: {}", line_no + 1, line.trim_end()));
                    if matches.len() >= max_matches {
                        break 'files;
                    }
                }
            }
        }

        if matches.is_empty() {
            Ok(format!("(no matches for {:?})", request.pattern))
        } else {
            let capped = if matches.len() >= max_matches {
                format!("\n…(capped at {max_matches} matches)")
            } else {
                String::new()
            };
            Ok(format!("{}{capped}", matches.join("\n")))
        }
    }
}

fn relative_display(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ads_config::ToolLimits;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::policy::ToolPolicy;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext {
            base_dir: dir.to_path_buf(),
            policy: Arc::new(ToolPolicy::new(
                ToolLimits::default(),
                vec![dir.to_path_buf()],
            )),
            cancel: CancellationToken::new(),
        }
    }

    fn tool() -> GrepTool {
        GrepTool { enabled: true }
    }

    #[tokio::test]
    async fn finds_matching_lines_with_locations() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntarget here\nthree\n").unwrap();
        let out = tool().execute("target", &ctx(dir.path())).await.unwrap();
        assert!(out.contains("a.txt:2: target here"));
    }

    #[tokio::test]
    async fn no_matches_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "nothing\n").unwrap();
        let out = tool().execute("absent", &ctx(dir.path())).await.unwrap();
        assert!(out.contains("no matches"));
    }

    #[tokio::test]
    async fn json_payload_limits_matches() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (0..50).map(|i| format!("hit {i}\n")).collect();
        std::fs::write(dir.path().join("many.txt"), body).unwrap();
        let out = tool()
            .execute(r#"{"pattern":"hit","maxMatches":5}"#, &ctx(dir.path()))
            .await
            .unwrap();
        assert!(out.contains("capped at 5"));
        assert_eq!(out.matches("many.txt").count(), 5);
    }

    #[tokio::test]
    async fn binary_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin.dat"), b"target\0binary").unwrap();
        std::fs::write(dir.path().join("ok.txt"), "target text\n").unwrap();
        let out = tool().execute("target", &ctx(dir.path())).await.unwrap();
        assert!(out.contains("ok.txt"));
        assert!(!out.contains("bin.dat"));
    }

    #[tokio::test]
    async fn invalid_regex_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool().execute("([", &ctx(dir.path())).await.unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }

    #[tokio::test]
    async fn scoped_path_restricts_search() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("top.txt"), "needle\n").unwrap();
        std::fs::write(dir.path().join("sub/inner.txt"), "needle\n").unwrap();
        let out = tool().execute("needle sub", &ctx(dir.path())).await.unwrap();
        assert!(out.contains("inner.txt"));
        assert!(!out.contains("top.txt"));
    }
}
