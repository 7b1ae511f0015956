// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Slash-command router.
//!
//! Grammar: `/<verb>(\s+<token>)*` with `--key[=value]` long options; a
//! bare long option means `"true"`.  Single- and double-quoted tokens are
//! preserved.  The `ads.` prefix is the namespaced legacy form of every
//! verb and is rewritten to its canonical spelling before dispatch.
//!
//! Handlers are opaque collaborators: the default [`ProcessBackend`]
//! shells out to the workspace CLI (`ad`) so init/branch/review/etc. stay
//! external to the core.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use ads_tools::split_command_line;
use async_trait::async_trait;
use tracing::debug;

use crate::error::GatewayError;

/// The dispatchable verb whitelist.
pub const COMMAND_VERBS: &[&str] = &[
    "init",
    "branch",
    "checkout",
    "status",
    "log",
    "new",
    "commit",
    "rules",
    "workspace",
    "sync",
    "review",
    "skill.init",
    "skill.validate",
    "help",
];

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: String,
    pub positional: Vec<String>,
    pub params: HashMap<String, String>,
}

/// Parse `/verb args… --key=value…` into its parts.  The `ads.` namespace
/// prefix is stripped from the verb.
pub fn parse_command(line: &str) -> Result<ParsedCommand, GatewayError> {
    let trimmed = line.trim();
    let body = trimmed
        .strip_prefix('/')
        .ok_or_else(|| GatewayError::Validation("commands must start with '/'".into()))?;

    let tokens = split_command_line(body)
        .map_err(|e| GatewayError::Validation(format!("bad command syntax: {e}")))?;
    let mut tokens = tokens.into_iter();
    let verb = tokens
        .next()
        .ok_or_else(|| GatewayError::Validation("empty command".into()))?;
    let command = verb.strip_prefix("ads.").unwrap_or(&verb).to_string();

    let mut positional = Vec::new();
    let mut params = HashMap::new();
    for token in tokens {
        if let Some(option) = token.strip_prefix("--") {
            match option.split_once('=') {
                Some((key, value)) => {
                    params.insert(key.to_string(), value.to_string());
                }
                None => {
                    params.insert(option.to_string(), "true".to_string());
                }
            }
        } else {
            positional.push(token);
        }
    }

    Ok(ParsedCommand {
        command,
        positional,
        params,
    })
}

/// Result of one dispatched command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub ok: bool,
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
        }
    }

    pub fn err(output: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: output.into(),
        }
    }
}

/// An opaque workspace command handler.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(&self, command: &ParsedCommand, workspace: &Path)
        -> anyhow::Result<CommandOutput>;
}

/// Dispatch table over the verb whitelist.
pub struct CommandRouter {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Route every whitelisted verb to one backend.
    pub fn with_backend(backend: Arc<dyn CommandHandler>) -> Self {
        let mut router = Self::new();
        for verb in COMMAND_VERBS {
            router.handlers.insert(verb.to_string(), backend.clone());
        }
        router
    }

    pub fn register(&mut self, verb: &str, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(verb.to_string(), handler);
    }

    /// Parse and dispatch.  Unknown verbs are an error output, not a
    /// transport failure.
    pub async fn dispatch(&self, line: &str, workspace: &Path) -> CommandOutput {
        let parsed = match parse_command(line) {
            Ok(parsed) => parsed,
            Err(e) => return CommandOutput::err(e.to_string()),
        };
        let Some(handler) = self.handlers.get(&parsed.command) else {
            return CommandOutput::err(format!("Unknown command: {}", parsed.command));
        };
        debug!(command = %parsed.command, "dispatching workspace command");
        match handler.run(&parsed, workspace).await {
            Ok(output) => reformat_json_error(output),
            Err(e) => CommandOutput::err(e.to_string()),
        }
    }
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler outputs that are JSON with an `error` field become error lines.
fn reformat_json_error(output: CommandOutput) -> CommandOutput {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(output.output.trim()) {
        if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
            return CommandOutput::err(format!("error: {message}"));
        }
    }
    output
}

// ─── Process backend ─────────────────────────────────────────────────────────

/// Default backend: invoke the external workspace CLI.
pub struct ProcessBackend {
    program: String,
    /// `AD_WORKSPACE` override for routed commands.
    workspace_override: Option<PathBuf>,
}

impl ProcessBackend {
    pub fn new(program: impl Into<String>, workspace_override: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            workspace_override,
        }
    }
}

#[async_trait]
impl CommandHandler for ProcessBackend {
    async fn run(
        &self,
        command: &ParsedCommand,
        workspace: &Path,
    ) -> anyhow::Result<CommandOutput> {
        let dir = self
            .workspace_override
            .as_deref()
            .unwrap_or(workspace);

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg(&command.command)
            .args(&command.positional)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &command.params {
            if value == "true" {
                cmd.arg(format!("--{key}"));
            } else {
                cmd.arg(format!("--{key}={value}"));
            }
        }

        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        if output.status.success() {
            Ok(CommandOutput::ok(stdout))
        } else {
            Ok(CommandOutput::err(if stderr.is_empty() {
                stdout
            } else {
                stderr
            }))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_and_positionals_parse() {
        let parsed = parse_command("/checkout feature/login").unwrap();
        assert_eq!(parsed.command, "checkout");
        assert_eq!(parsed.positional, vec!["feature/login"]);
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn long_options_with_and_without_values() {
        let parsed = parse_command("/new task --title=\"Fix login\" --urgent").unwrap();
        assert_eq!(parsed.command, "new");
        assert_eq!(parsed.positional, vec!["task"]);
        assert_eq!(parsed.params.get("title").unwrap(), "Fix login");
        assert_eq!(parsed.params.get("urgent").unwrap(), "true");
    }

    #[test]
    fn quoted_tokens_are_preserved() {
        let parsed = parse_command("/commit 'two words' plain").unwrap();
        assert_eq!(parsed.positional, vec!["two words", "plain"]);
    }

    #[test]
    fn ads_prefix_is_canonicalized() {
        let parsed = parse_command("/ads.review --show").unwrap();
        assert_eq!(parsed.command, "review");
        assert_eq!(parsed.params.get("show").unwrap(), "true");
    }

    #[test]
    fn dotted_verbs_are_whole_tokens() {
        let parsed = parse_command("/skill.validate my-skill").unwrap();
        assert_eq!(parsed.command, "skill.validate");
        assert_eq!(parsed.positional, vec!["my-skill"]);
    }

    #[test]
    fn missing_slash_is_rejected() {
        assert!(parse_command("status").is_err());
        assert!(parse_command("/").is_err());
    }

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn run(
            &self,
            command: &ParsedCommand,
            _workspace: &Path,
        ) -> anyhow::Result<CommandOutput> {
            Ok(CommandOutput::ok(format!(
                "{} {:?}",
                command.command, command.positional
            )))
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_registered_handler() {
        let router = CommandRouter::with_backend(Arc::new(EchoHandler));
        let out = router.dispatch("/status", Path::new("/ws")).await;
        assert!(out.ok);
        assert!(out.output.starts_with("status"));
    }

    #[tokio::test]
    async fn unknown_verb_is_an_error_output() {
        let router = CommandRouter::with_backend(Arc::new(EchoHandler));
        let out = router.dispatch("/frobnicate", Path::new("/ws")).await;
        assert!(!out.ok);
        assert!(out.output.contains("Unknown command: frobnicate"));
    }

    #[tokio::test]
    async fn json_error_outputs_are_reformatted() {
        struct JsonErrHandler;
        #[async_trait]
        impl CommandHandler for JsonErrHandler {
            async fn run(
                &self,
                _command: &ParsedCommand,
                _workspace: &Path,
            ) -> anyhow::Result<CommandOutput> {
                Ok(CommandOutput::ok(r#"{"error": "branch not found"}"#))
            }
        }
        let router = CommandRouter::with_backend(Arc::new(JsonErrHandler));
        let out = router.dispatch("/checkout ghost", Path::new("/ws")).await;
        assert!(!out.ok);
        assert_eq!(out.output, "error: branch not found");
    }

    #[tokio::test]
    async fn non_error_json_passes_through() {
        struct JsonOkHandler;
        #[async_trait]
        impl CommandHandler for JsonOkHandler {
            async fn run(
                &self,
                _command: &ParsedCommand,
                _workspace: &Path,
            ) -> anyhow::Result<CommandOutput> {
                Ok(CommandOutput::ok(r#"{"branch": "main"}"#))
            }
        }
        let router = CommandRouter::with_backend(Arc::new(JsonOkHandler));
        let out = router.dispatch("/status", Path::new("/ws")).await;
        assert!(out.ok);
        assert!(out.output.contains("main"));
    }

    #[tokio::test]
    async fn every_whitelisted_verb_is_routable() {
        let router = CommandRouter::with_backend(Arc::new(EchoHandler));
        for verb in COMMAND_VERBS {
            let out = router.dispatch(&format!("/{verb}"), Path::new("/ws")).await;
            assert!(out.ok, "verb {verb} should dispatch");
        }
    }
}
