// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `tool.exec` — run a child process with the shell disabled.
//!
//! Payload is either a command line (split with shell-style quoting) or
//! `{"cmd", "args"?, "timeoutMs"?}`.  The executable basename is screened
//! against the configured allow-list, the child is killed with SIGKILL on
//! timeout or cancellation, and each captured stream is capped.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::runtime::{BlockTool, ToolContext};
use crate::shellwords::split_command_line;
use crate::ToolError;

/// Default per-invocation timeout: five minutes.
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Per-stream capture budget.
const STREAM_CAP_BYTES: usize = 20_000;

pub struct ExecTool {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ExecObject {
    cmd: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default, rename = "timeoutMs")]
    timeout_ms: Option<u64>,
}

#[derive(Debug)]
struct ExecRequest {
    program: String,
    args: Vec<String>,
    timeout_ms: u64,
}

fn parse_payload(payload: &str) -> Result<ExecRequest, ToolError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(ToolError::Failed("exec payload is empty".into()));
    }
    if trimmed.starts_with('{') {
        let obj: ExecObject = serde_json::from_str(trimmed)
            .map_err(|e| ToolError::Failed(format!("bad exec object: {e}")))?;
        return Ok(ExecRequest {
            program: obj.cmd,
            args: obj.args,
            timeout_ms: obj.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        });
    }
    let mut words = split_command_line(trimmed)?;
    if words.is_empty() {
        return Err(ToolError::Failed("exec payload names no command".into()));
    }
    let program = words.remove(0);
    Ok(ExecRequest {
        program,
        args: words,
        timeout_ms: DEFAULT_TIMEOUT_MS,
    })
}

#[async_trait::async_trait]
impl BlockTool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    async fn execute(&self, payload: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        if !self.enabled {
            return Err(ToolError::Disabled("exec".into()));
        }
        let request = parse_payload(payload)?;
        ctx.policy.check_exec_basename(&request.program)?;

        let cmd_display = display_line(&request.program, &request.args);
        debug!(cmd = %cmd_display, timeout_ms = request.timeout_ms, "exec tool");

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&ctx.base_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = cmd
            .spawn()
            .map_err(|e| ToolError::Failed(format!("spawn {}: {e}", request.program)))?;

        let result = wait_with_timeout(child, request.timeout_ms, &ctx.cancel).await;
        let elapsed = started.elapsed().as_millis();

        let mut out = format!("$ {cmd_display}\n");
        match result {
            // A timed-out command is still a substitutable tool output, not
            // an aborted turn: the model gets the marker and recovers.
            Err(ToolError::Timeout { ms }) => {
                out.push_str(&format!("⏱️ timeout after {ms}ms\n"));
                out.push_str(&format!("exit=null signal=SIGKILL elapsed={elapsed}ms\n"));
            }
            Err(other) => return Err(other),
            Ok(output) => {
                let (exit, signal) = exit_parts(&output.status);
                out.push_str(&format!("exit={exit} signal={signal} elapsed={elapsed}ms\n"));
                let stdout = cap_stream(&output.stdout);
                let stderr = cap_stream(&output.stderr);
                if !stdout.is_empty() {
                    out.push_str(&format!("```stdout\n{stdout}```\n"));
                }
                if !stderr.is_empty() {
                    out.push_str(&format!("```stderr\n{stderr}```\n"));
                }
            }
        }
        Ok(out.trim_end_matches('\n').to_string())
    }
}

/// Wait for the child under the per-invocation budget.  Expiry surfaces
/// [`ToolError::Timeout`]; dropping the wait future kills the child via
/// `kill_on_drop` (SIGKILL) both on timeout and on cancellation.
async fn wait_with_timeout(
    child: Child,
    timeout_ms: u64,
    cancel: &CancellationToken,
) -> Result<std::process::Output, ToolError> {
    let timeout = Duration::from_millis(timeout_ms);
    tokio::select! {
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ToolError::Failed(format!("wait on child: {e}"))),
            Err(_) => Err(ToolError::Timeout { ms: timeout_ms }),
        },
    }
}

fn display_line(program: &str, args: &[String]) -> String {
    let mut parts = vec![quote_word(program)];
    parts.extend(args.iter().map(|a| quote_word(a)));
    parts.join(" ")
}

fn quote_word(word: &str) -> String {
    if word.is_empty() || word.chars().any(char::is_whitespace) {
        format!("{word:?}")
    } else {
        word.to_string()
    }
}

fn exit_parts(status: &std::process::ExitStatus) -> (String, String) {
    match status.code() {
        Some(code) => (code.to_string(), "null".to_string()),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                let signal = status
                    .signal()
                    .map(signal_name)
                    .unwrap_or_else(|| "unknown".to_string());
                ("null".to_string(), signal)
            }
            #[cfg(not(unix))]
            {
                ("null".to_string(), "unknown".to_string())
            }
        }
    }
}

#[cfg(unix)]
fn signal_name(sig: i32) -> String {
    match sig {
        libc::SIGKILL => "SIGKILL".to_string(),
        libc::SIGTERM => "SIGTERM".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        libc::SIGSEGV => "SIGSEGV".to_string(),
        other => format!("SIG{other}"),
    }
}

fn cap_stream(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= STREAM_CAP_BYTES {
        return text.into_owned();
    }
    let mut end = STREAM_CAP_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n…(truncated)\n", &text[..end])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
