// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `tool.apply_patch` — apply a unified diff via `git apply`.
//!
//! Referenced paths are extracted from the diff headers and screened before
//! anything touches the working tree: absolute paths, `..` segments, NUL
//! bytes and allow-list escapes are all rejected.  The child runs from the
//! git root with a `--directory` prefix when the session cwd is nested.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::runtime::{BlockTool, ToolContext};
use crate::ToolError;

pub struct ApplyPatchTool {
    pub enabled: bool,
}

#[async_trait::async_trait]
impl BlockTool for ApplyPatchTool {
    fn name(&self) -> &str {
        "apply_patch"
    }

    async fn execute(&self, payload: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        if !self.enabled {
            return Err(ToolError::Disabled("apply_patch".into()));
        }
        let cap = ctx.policy.limits.max_patch_bytes;
        if payload.len() > cap {
            return Err(ToolError::Policy(format!(
                "patch of {} bytes exceeds cap of {cap} bytes",
                payload.len()
            )));
        }

        let files = referenced_paths(payload);
        if files.is_empty() {
            return Err(ToolError::Failed("patch references no files".into()));
        }
        for file in &files {
            screen_patch_path(file)?;
            let resolved = ctx.policy.resolve_path(&ctx.base_dir, file)?;
            ctx.policy.ensure_allowed(&resolved)?;
        }

        let git_root = find_git_root(&ctx.base_dir).unwrap_or_else(|| ctx.base_dir.clone());
        let directory = ctx
            .base_dir
            .strip_prefix(&git_root)
            .ok()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);

        let mut cmd = Command::new("git");
        cmd.arg("apply").arg("--whitespace=nowarn");
        if let Some(prefix) = &directory {
            cmd.arg(format!("--directory={}", prefix.display()));
        }
        cmd.arg("-")
            .current_dir(&git_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(files = files.len(), root = %git_root.display(), "apply_patch");
        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::Failed(format!("spawn git apply: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Failed("git apply stdin unavailable".into()))?;
        let patch = payload.to_string();
        let write = async move {
            stdin.write_all(patch.as_bytes()).await?;
            stdin.shutdown().await
        };

        let output = tokio::select! {
            // Dropping the apply future kills the child via kill_on_drop.
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Cancelled);
            }
            result = async {
                write.await.map_err(|e| ToolError::Failed(format!("write patch: {e}")))?;
                child
                    .wait_with_output()
                    .await
                    .map_err(|e| ToolError::Failed(format!("wait on git apply: {e}")))
            } => result?,
        };

        if output.status.success() {
            Ok(format!("✅ applied patch: {}", files.join(", ")))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ToolError::Failed(stderr.trim().to_string()))
        }
    }
}

/// Paths named by the unified-diff headers, `a/`–`b/` prefixes stripped,
/// deduplicated in first-seen order.
fn referenced_paths(patch: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in patch.lines() {
        let candidate = if let Some(rest) = line.strip_prefix("+++ ") {
            Some(rest)
        } else if let Some(rest) = line.strip_prefix("--- ") {
            Some(rest)
        } else {
            None
        };
        let Some(raw) = candidate else { continue };
        let raw = raw.trim();
        if raw == "/dev/null" {
            continue;
        }
        let path = raw
            .strip_prefix("a/")
            .or_else(|| raw.strip_prefix("b/"))
            .unwrap_or(raw)
            .to_string();
        if !path.is_empty() && !out.contains(&path) {
            out.push(path);
        }
    }
    out
}

fn screen_patch_path(path: &str) -> Result<(), ToolError> {
    if path.contains('\0') {
        return Err(ToolError::Policy(format!("patch path contains NUL: {path:?}")));
    }
    if Path::new(path).is_absolute() {
        return Err(ToolError::Policy(format!("patch path is absolute: {path}")));
    }
    if Path::new(path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ToolError::Policy(format!("patch path escapes with ..: {path}")));
    }
    Ok(())
}

fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return Some(dir);
        }
        dir = dir.parent()?.to_path_buf();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
