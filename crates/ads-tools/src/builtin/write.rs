// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `tool.write` — UTF-8 file writes under the allow-list, capped by the
//! configured write budget.

use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::runtime::{BlockTool, ToolContext};
use crate::ToolError;

pub struct WriteTool {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
struct WriteRequest {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

#[async_trait::async_trait]
impl BlockTool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    async fn execute(&self, payload: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        if !self.enabled {
            return Err(ToolError::Disabled("write".into()));
        }
        let request: WriteRequest = serde_json::from_str(payload.trim())
            .map_err(|e| ToolError::Failed(format!("bad write payload: {e}")))?;

        let size = request.content.len();
        let cap = ctx.policy.limits.max_write_bytes;
        if size > cap {
            return Err(ToolError::Policy(format!(
                "write of {size} bytes exceeds cap of {cap} bytes"
            )));
        }

        let resolved = ctx.policy.resolve_path(&ctx.base_dir, &request.path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Failed(format!("mkdir {}: {e}", parent.display())))?;
        }

        if request.append {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .await
                .map_err(|e| ToolError::Failed(format!("open {}: {e}", request.path)))?;
            file.write_all(request.content.as_bytes())
                .await
                .map_err(|e| ToolError::Failed(format!("append {}: {e}", request.path)))?;
            file.flush()
                .await
                .map_err(|e| ToolError::Failed(format!("append {}: {e}", request.path)))?;
            Ok(format!("💾 appended {size} bytes to {}", request.path))
        } else {
            tokio::fs::write(&resolved, request.content.as_bytes())
                .await
                .map_err(|e| ToolError::Failed(format!("write {}: {e}", request.path)))?;
            Ok(format!("💾 wrote {size} bytes to {}", request.path))
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

    fn ctx_for(dir: &std::path::Path, limits: ToolLimits) -> ToolContext {
        ToolContext {
            base_dir: dir.to_path_buf(),
            policy: Arc::new(ToolPolicy::new(limits, vec![dir.to_path_buf()])),
            cancel: CancellationToken::new(),
        }
    }

    fn tool() -> WriteTool {
        WriteTool { enabled: true }
    }

    #[tokio::test]
    async fn writes_utf8_and_reports_byte_count() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool()
            .execute(
                r#"{"path":"out.txt","content":"héllo"}"#,
                &ctx_for(dir.path(), ToolLimits::default()),
            )
            .await
            .unwrap();
        assert_eq!(out, "💾 wrote 6 bytes to out.txt");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "héllo"
        );
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        tool()
            .execute(
                r#"{"path":"deep/nested/file.txt","content":"x"}"#,
                &ctx_for(dir.path(), ToolLimits::default()),
            )
            .await
            .unwrap();
        assert!(dir.path().join("deep/nested/file.txt").exists());
    }

    #[tokio::test]
    async fn append_extends_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for(dir.path(), ToolLimits::default());
        tool()
            .execute(r#"{"path":"log.txt","content":"a"}"#, &ctx)
            .await
            .unwrap();
        let out = tool()
            .execute(r#"{"path":"log.txt","content":"b","append":true}"#, &ctx)
            .await
            .unwrap();
        assert!(out.starts_with("💾 appended"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("log.txt")).unwrap(),
            "ab"
        );
    }

    #[tokio::test]
    async fn oversized_write_names_both_byte_counts() {
        let dir = tempfile::tempdir().unwrap();
        let limits = ToolLimits {
            max_write_bytes: 8,
            ..ToolLimits::default()
        };
        let err = tool()
            .execute(
                r#"{"path":"big.txt","content":"0123456789"}"#,
                &ctx_for(dir.path(), limits),
            )
            .await
            .unwrap_err();
        match err {
            ToolError::Policy(msg) => {
                assert!(msg.contains("10 bytes"));
                assert!(msg.contains("8 bytes"));
            }
            other => panic!("expected policy error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn path_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool()
            .execute(
                r#"{"path":"../evil.txt","content":"x"}"#,
                &ctx_for(dir.path(), ToolLimits::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Policy(_)));
    }

    #[tokio::test]
    async fn disabled_write_reports_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let err = WriteTool { enabled: false }
            .execute(
                r#"{"path":"x","content":"y"}"#,
                &ctx_for(dir.path(), ToolLimits::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Disabled(_)));
    }

    #[tokio::test]
    async fn non_json_payload_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool()
            .execute("just text", &ctx_for(dir.path(), ToolLimits::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }
}
