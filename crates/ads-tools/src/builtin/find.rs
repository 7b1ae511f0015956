// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `tool.find` — locate files by name glob under the session directory.
//! Only `*` and `?` are supported in patterns.

use regex::Regex;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::runtime::{BlockTool, ToolContext};
use crate::ToolError;

const DEFAULT_MAX_RESULTS: usize = 200;

pub struct FindTool {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
struct FindObject {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, rename = "maxResults")]
    max_results: Option<usize>,
}

fn parse_payload(payload: &str) -> Result<FindObject, ToolError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(ToolError::Failed("find payload is empty".into()));
    }
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed)
            .map_err(|e| ToolError::Failed(format!("bad find object: {e}")));
    }
    Ok(FindObject {
        pattern: trimmed.to_string(),
        path: None,
        max_results: None,
    })
}

/// Convert a filename glob to an anchored regex.  Only `*` and `?` carry
/// meaning; everything else is escaped.
fn glob_to_regex(pattern: &str) -> Result<Regex, ToolError> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| ToolError::Failed(format!("bad pattern: {e}")))
}

#[async_trait::async_trait]
impl BlockTool for FindTool {
    fn name(&self) -> &str {
        "find"
    }

    fn parallelizable(&self) -> bool {
        true
    }

    async fn execute(&self, payload: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        if !self.enabled {
            return Err(ToolError::Disabled("find".into()));
        }
        let request = parse_payload(payload)?;
        let regex = glob_to_regex(&request.pattern)?;
        let max_results = request.max_results.unwrap_or(DEFAULT_MAX_RESULTS);

        let root = match &request.path {
            Some(p) => ctx.policy.resolve_path(&ctx.base_dir, p)?,
            None => ctx.base_dir.clone(),
        };

        let mut hits = Vec::new();
        for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if regex.is_match(&name) {
                hits.push(
                    entry
                        .path()
                        .strip_prefix(&root)
                        .unwrap_or(entry.path())
                        .display()
                        .to_string(),
                );
                if hits.len() >= max_results {
                    break;
                }
            }
        }
        hits.sort();

        if hits.is_empty() {
            Ok(format!("(no files match {:?})", request.pattern))
        } else {
            Ok(hits.join("\n"))
        }
    }
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

    fn tool() -> FindTool {
        FindTool { enabled: true }
    }

    #[tokio::test]
    async fn glob_star_matches_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "").unwrap();
        std::fs::write(dir.path().join("notes.md"), "").unwrap();
        let out = tool().execute("*.rs", &ctx(dir.path())).await.unwrap();
        assert!(out.contains("main.rs"));
        assert!(!out.contains("notes.md"));
    }

    #[tokio::test]
    async fn question_mark_matches_single_char() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a1.txt"), "").unwrap();
        std::fs::write(dir.path().join("a12.txt"), "").unwrap();
        let out = tool().execute("a?.txt", &ctx(dir.path())).await.unwrap();
        assert!(out.contains("a1.txt"));
        assert!(!out.contains("a12.txt"));
    }

    #[tokio::test]
    async fn nested_files_are_found_with_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/deep")).unwrap();
        std::fs::write(dir.path().join("src/deep/mod.rs"), "").unwrap();
        let out = tool().execute("mod.rs", &ctx(dir.path())).await.unwrap();
        assert!(out.contains("src/deep/mod.rs"));
    }

    #[tokio::test]
    async fn no_match_reports_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool().execute("*.zig", &ctx(dir.path())).await.unwrap();
        assert!(out.contains("no files match"));
    }

    #[tokio::test]
    async fn json_payload_caps_results() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            std::fs::write(dir.path().join(format!("f{i}.log")), "").unwrap();
        }
        let out = tool()
            .execute(r#"{"pattern":"*.log","maxResults":3}"#, &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.lines().count(), 3);
    }
}
