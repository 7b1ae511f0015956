// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use crate::paths::{find_workspace_root, WorkspacePaths};

/// Sentinel values that disable the exec basename allow-list.
const ALLOWLIST_WILDCARDS: &[&str] = &["*", "all"];

/// Complete server configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub web: WebConfig,
    pub tools: ToolLimits,
    /// Directories the file tools and `/cd` may operate in.
    /// Defaults to the detected workspace root.
    pub allowed_dirs: Vec<PathBuf>,
    /// Workspace root override for routed commands (`AD_WORKSPACE`).
    pub command_workspace: Option<PathBuf>,
    /// Workspace-local state layout (`.ads/`).
    pub paths: WorkspacePaths,
}

/// WebSocket/HTTP gateway settings.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// `ADS_WEB_HOST`, default `0.0.0.0`.
    pub host: String,
    /// `ADS_WEB_PORT`, default 8787.
    pub port: u16,
    /// `ADS_WEB_TOKEN`; empty disables authentication.
    pub token: Option<String>,
    /// `ADS_WEB_MAX_CLIENTS`, default 1.
    pub max_clients: usize,
    /// `ADS_WEB_IDLE_MINUTES`; 0 disables the idle close.
    pub idle_minutes: u64,
}

/// Tool enablement flags and byte budgets.
#[derive(Debug, Clone)]
pub struct ToolLimits {
    pub exec_enabled: bool,
    pub file_tools_enabled: bool,
    pub apply_patch_enabled: bool,
    /// Executable basenames allowed for `exec`.  `None` disables the check
    /// (unset, `*`, or `all`).
    pub exec_allowlist: Option<Vec<String>>,
    /// `AGENT_FILE_TOOL_MAX_BYTES`, default 200 KiB.
    pub max_read_bytes: usize,
    /// `AGENT_FILE_TOOL_MAX_WRITE_BYTES`, default 1 MiB.
    pub max_write_bytes: usize,
    /// `AGENT_APPLY_PATCH_MAX_BYTES`, default 512 KiB.
    pub max_patch_bytes: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            exec_enabled: true,
            file_tools_enabled: true,
            apply_patch_enabled: true,
            exec_allowlist: None,
            max_read_bytes: 200 * 1024,
            max_write_bytes: 1024 * 1024,
            max_patch_bytes: 512 * 1024,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            token: None,
            max_clients: 1,
            idle_minutes: 0,
        }
    }
}

impl Config {
    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Tests pass a closure over a `HashMap`; production passes
    /// `std::env::var`.  Malformed numeric values fall back to defaults
    /// rather than failing startup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let workspace = find_workspace_root(&std::env::current_dir().unwrap_or_default());

        let web = WebConfig {
            host: lookup("ADS_WEB_HOST")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "ADS_WEB_PORT", 8787),
            token: lookup("ADS_WEB_TOKEN").filter(|v| !v.is_empty()),
            max_clients: parse_or(&lookup, "ADS_WEB_MAX_CLIENTS", 1),
            idle_minutes: parse_or(&lookup, "ADS_WEB_IDLE_MINUTES", 0),
        };

        let tools = ToolLimits {
            exec_enabled: parse_flag(&lookup, "ENABLE_AGENT_EXEC_TOOL", true),
            file_tools_enabled: parse_flag(&lookup, "ENABLE_AGENT_FILE_TOOLS", true),
            apply_patch_enabled: parse_flag(&lookup, "ENABLE_AGENT_APPLY_PATCH", true),
            exec_allowlist: parse_allowlist(lookup("AGENT_EXEC_TOOL_ALLOWLIST")),
            max_read_bytes: parse_or(&lookup, "AGENT_FILE_TOOL_MAX_BYTES", 200 * 1024),
            max_write_bytes: parse_or(&lookup, "AGENT_FILE_TOOL_MAX_WRITE_BYTES", 1024 * 1024),
            max_patch_bytes: parse_or(&lookup, "AGENT_APPLY_PATCH_MAX_BYTES", 512 * 1024),
        };

        let allowed_dirs = lookup("ALLOWED_DIRS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![workspace.clone()]);

        let command_workspace = lookup("AD_WORKSPACE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            web,
            tools,
            allowed_dirs,
            command_workspace,
            paths: WorkspacePaths::new(&workspace),
        }
    }

    /// Bind address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.web.host, self.web.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Boolean flags accept `1/0`, `true/false`, `yes/no` (case-insensitive).
fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
    }
}

fn parse_allowlist(raw: Option<String>) -> Option<Vec<String>> {
    let raw = raw?;
    let entries: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if entries.is_empty() {
        return None;
    }
    if entries
        .iter()
        .any(|e| ALLOWLIST_WILDCARDS.contains(&e.to_ascii_lowercase().as_str()))
    {
        return None;
    }
    Some(entries)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn defaults_match_documented_values() {
        let c = config_with(&[]);
        assert_eq!(c.web.host, "0.0.0.0");
        assert_eq!(c.web.port, 8787);
        assert_eq!(c.web.max_clients, 1);
        assert_eq!(c.web.idle_minutes, 0);
        assert!(c.web.token.is_none());
        assert!(c.tools.exec_enabled);
        assert!(c.tools.file_tools_enabled);
        assert!(c.tools.apply_patch_enabled);
        assert_eq!(c.tools.max_read_bytes, 200 * 1024);
        assert_eq!(c.tools.max_write_bytes, 1024 * 1024);
        assert_eq!(c.tools.max_patch_bytes, 512 * 1024);
    }

    #[test]
    fn empty_token_disables_auth() {
        let c = config_with(&[("ADS_WEB_TOKEN", "")]);
        assert!(c.web.token.is_none());
    }

    #[test]
    fn nonempty_token_enables_auth() {
        let c = config_with(&[("ADS_WEB_TOKEN", "secret")]);
        assert_eq!(c.web.token.as_deref(), Some("secret"));
    }

    #[test]
    fn garbage_port_falls_back_to_default() {
        let c = config_with(&[("ADS_WEB_PORT", "not-a-port")]);
        assert_eq!(c.web.port, 8787);
    }

    // ── Flags ─────────────────────────────────────────────────────────────────

    #[test]
    fn exec_tool_can_be_disabled() {
        let c = config_with(&[("ENABLE_AGENT_EXEC_TOOL", "false")]);
        assert!(!c.tools.exec_enabled);
    }

    #[test]
    fn flag_accepts_numeric_forms() {
        let c = config_with(&[("ENABLE_AGENT_FILE_TOOLS", "0")]);
        assert!(!c.tools.file_tools_enabled);
        let c = config_with(&[("ENABLE_AGENT_FILE_TOOLS", "1")]);
        assert!(c.tools.file_tools_enabled);
    }

    // ── Allow-list ────────────────────────────────────────────────────────────

    #[test]
    fn allowlist_parses_comma_separated_basenames() {
        let c = config_with(&[("AGENT_EXEC_TOOL_ALLOWLIST", "git, ls ,cargo")]);
        assert_eq!(
            c.tools.exec_allowlist,
            Some(vec!["git".into(), "ls".into(), "cargo".into()])
        );
    }

    #[test]
    fn allowlist_star_disables_check() {
        let c = config_with(&[("AGENT_EXEC_TOOL_ALLOWLIST", "*")]);
        assert!(c.tools.exec_allowlist.is_none());
    }

    #[test]
    fn allowlist_all_disables_check() {
        let c = config_with(&[("AGENT_EXEC_TOOL_ALLOWLIST", "git,ALL")]);
        assert!(c.tools.exec_allowlist.is_none());
    }

    #[test]
    fn absent_allowlist_disables_check() {
        let c = config_with(&[]);
        assert!(c.tools.exec_allowlist.is_none());
    }

    // ── Directories ───────────────────────────────────────────────────────────

    #[test]
    fn allowed_dirs_splits_on_commas() {
        let c = config_with(&[("ALLOWED_DIRS", "/a,/b/c")]);
        assert_eq!(
            c.allowed_dirs,
            vec![PathBuf::from("/a"), PathBuf::from("/b/c")]
        );
    }

    #[test]
    fn allowed_dirs_defaults_to_workspace() {
        let c = config_with(&[]);
        assert_eq!(c.allowed_dirs.len(), 1);
    }

    #[test]
    fn command_workspace_override() {
        let c = config_with(&[("AD_WORKSPACE", "/elsewhere")]);
        assert_eq!(c.command_workspace, Some(PathBuf::from("/elsewhere")));
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let c = config_with(&[("ADS_WEB_HOST", "127.0.0.1"), ("ADS_WEB_PORT", "9000")]);
        assert_eq!(c.bind_addr(), "127.0.0.1:9000");
    }
}
