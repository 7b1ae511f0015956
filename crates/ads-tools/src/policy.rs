// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool policy: directory allow-lists, byte budgets and enable flags.
//!
//! Paths are normalized lexically (no filesystem access) before checking
//! them against the allow-list, so a missing file still gets a correct
//! policy verdict and `..` segments cannot escape.

use std::path::{Component, Path, PathBuf};

use ads_config::ToolLimits;

use crate::ToolError;

#[derive(Debug, Clone)]
pub struct ToolPolicy {
    pub limits: ToolLimits,
    allowed_dirs: Vec<PathBuf>,
}

impl ToolPolicy {
    pub fn new(limits: ToolLimits, allowed_dirs: Vec<PathBuf>) -> Self {
        Self {
            limits,
            allowed_dirs: allowed_dirs.iter().map(|d| normalize_path(d)).collect(),
        }
    }

    pub fn allowed_dirs(&self) -> &[PathBuf] {
        &self.allowed_dirs
    }

    /// Resolve `raw` against `base` and verify it stays inside the
    /// allow-list.  Rejects NUL bytes outright.
    pub fn resolve_path(&self, base: &Path, raw: &str) -> Result<PathBuf, ToolError> {
        if raw.contains('\0') {
            return Err(ToolError::Policy("path contains NUL byte".into()));
        }
        let candidate = {
            let p = Path::new(raw);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        let normalized = normalize_path(&candidate);
        self.ensure_allowed(&normalized)?;
        Ok(normalized)
    }

    /// Verify an already-normalized path is under one of the allowed dirs.
    pub fn ensure_allowed(&self, path: &Path) -> Result<(), ToolError> {
        if self.allowed_dirs.iter().any(|dir| path.starts_with(dir)) {
            Ok(())
        } else {
            Err(ToolError::Policy(format!(
                "path {} is outside the allowed directories",
                path.display()
            )))
        }
    }

    /// Screen an executable basename against the configured allow-list.
    /// A `None` allow-list disables the check.
    pub fn check_exec_basename(&self, program: &str) -> Result<(), ToolError> {
        let Some(allow) = &self.limits.exec_allowlist else {
            return Ok(());
        };
        let basename = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);
        if allow.iter().any(|a| a == basename) {
            Ok(())
        } else {
            Err(ToolError::Policy(format!(
                "executable {basename:?} is not in the exec allow-list"
            )))
        }
    }
}

/// Resolve `.` and `..` segments lexically.  `..` at the root is dropped,
/// so the result can never climb above the filesystem root.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
