// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Process-backed adapters for the codex, claude and gemini CLIs.
//!
//! The concrete wire protocols belong to the backends; each adapter only
//! needs a line decoder that reduces the backend's JSON-lines output to
//! [`AdapterEvent`] phases.  Everything else — spawning, streaming,
//! cancellation, thread bookkeeping — is shared.

use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::adapter::{
    Adapter, AdapterError, AdapterStatus, AgentInput, EventStream, SendOptions,
};
use crate::events::{AdapterEvent, CommandReport, EventPhase, PlanItem};

/// What a backend line decodes to.
enum Decoded {
    Event(AdapterEvent),
    /// The backend announced its thread id.
    Thread(String),
    Skip,
}

type LineDecoder = fn(&str) -> Decoded;

/// One spawned-CLI adapter.  Construct via [`CliAdapter::codex`],
/// [`CliAdapter::claude`] or [`CliAdapter::gemini`].
pub struct CliAdapter {
    id: String,
    name: String,
    program: String,
    base_args: Vec<String>,
    decoder: LineDecoder,
    thread: Mutex<Option<String>>,
}

impl CliAdapter {
    pub fn codex() -> Self {
        Self::new("codex", "Codex", "codex", &["exec", "--json"], decode_codex_line)
    }

    pub fn claude() -> Self {
        Self::new(
            "claude",
            "Claude",
            "claude",
            &["-p", "--output-format", "stream-json"],
            decode_claude_line,
        )
    }

    pub fn gemini() -> Self {
        Self::new("gemini", "Gemini", "gemini", &["--output-format", "json-stream"], decode_gemini_line)
    }

    fn new(id: &str, name: &str, program: &str, base_args: &[&str], decoder: LineDecoder) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            program: program.to_string(),
            base_args: base_args.iter().map(|s| s.to_string()).collect(),
            decoder,
            thread: Mutex::new(None),
        }
    }

    fn remembered_thread(&self) -> Option<String> {
        self.thread.lock().ok().and_then(|t| t.clone())
    }

    fn remember_thread(&self, id: &str) {
        if let Ok(mut t) = self.thread.lock() {
            *t = Some(id.to_string());
        }
    }
}

#[async_trait]
impl Adapter for CliAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> AdapterStatus {
        match program_on_path(&self.program) {
            true => AdapterStatus::ready(),
            false => AdapterStatus::not_ready(format!("{} not found on PATH", self.program)),
        }
    }

    async fn resume_thread(&self, thread_id: &str) -> Result<(), AdapterError> {
        self.remember_thread(thread_id);
        Ok(())
    }

    fn thread_id(&self) -> Option<String> {
        self.remembered_thread()
    }

    async fn send(
        &self,
        input: AgentInput,
        options: SendOptions,
    ) -> Result<EventStream, AdapterError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args);
        if let Some(model) = &options.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(thread) = options.thread_id.clone().or_else(|| self.remembered_thread()) {
            cmd.arg("--resume").arg(thread);
        }
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }
        for image in input.image_paths() {
            cmd.arg("--image").arg(image);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        debug!(agent = %self.id, "spawning backend CLI");
        let mut child = cmd
            .spawn()
            .map_err(|e| AdapterError::NotReady(format!("spawn {}: {e}", self.program)))?;

        let prompt = input.text();
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AdapterError::Failed("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::Failed("child stdout unavailable".into()))?;

        let (tx, rx) = mpsc::channel::<Result<AdapterEvent, AdapterError>>(256);
        let decoder = self.decoder;
        let cancel = options.cancel.clone();
        let agent_id = self.id.clone();

        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                let _ = tx.send(Err(AdapterError::Failed(format!("write prompt: {e}")))).await;
                return;
            }
            drop(stdin);

            let mut lines = BufReader::new(stdout).lines();
            let mut accumulated = String::new();
            let mut thread_id: Option<String> = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = child.kill().await;
                        let _ = tx.send(Err(AdapterError::Cancelled)).await;
                        return;
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => match decoder(&line) {
                                Decoded::Event(event) => {
                                    if let EventPhase::Delta { text, step: false } = &event.phase {
                                        accumulated.push_str(text);
                                    }
                                    if tx.send(Ok(event)).await.is_err() {
                                        let _ = child.kill().await;
                                        return;
                                    }
                                }
                                Decoded::Thread(id) => thread_id = Some(id),
                                Decoded::Skip => {}
                            },
                            Ok(None) => break,
                            Err(e) => {
                                warn!(agent = %agent_id, "read backend output: {e}");
                                break;
                            }
                        }
                    }
                }
            }

            match child.wait().await {
                Ok(status) if status.success() => {
                    let _ = tx
                        .send(Ok(AdapterEvent::done(accumulated, thread_id)))
                        .await;
                }
                Ok(status) => {
                    let _ = tx
                        .send(Err(AdapterError::Failed(format!(
                            "{agent_id} backend exited with {status}"
                        ))))
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(AdapterError::Failed(format!("wait on backend: {e}"))))
                        .await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn program_on_path(program: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
}

// ─── Line decoders ───────────────────────────────────────────────────────────

fn decode_codex_line(line: &str) -> Decoded {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(line) else {
        return Decoded::Skip;
    };
    match v.get("type").and_then(|t| t.as_str()) {
        Some("agent_message_delta") => Decoded::Event(
            AdapterEvent::delta(str_field(&v, "delta")).with_raw(v.clone()),
        ),
        Some("agent_reasoning_delta") => Decoded::Event(
            AdapterEvent::step_delta(str_field(&v, "delta")).with_raw(v.clone()),
        ),
        Some("exec_command_end") => Decoded::Event(AdapterEvent {
            phase: EventPhase::Command(CommandReport {
                id: str_field(&v, "call_id"),
                line: str_field(&v, "command"),
                status: str_field(&v, "status"),
                exit_code: v.get("exit_code").and_then(|c| c.as_i64()),
                output: str_field(&v, "aggregated_output"),
            }),
            raw: Some(v.clone()),
        }),
        Some("patch_apply_end") => Decoded::Event(AdapterEvent {
            phase: EventPhase::Patch {
                diff: str_field(&v, "unified_diff"),
                files: str_list(&v, "files"),
            },
            raw: Some(v.clone()),
        }),
        Some("plan_update") => Decoded::Event(AdapterEvent {
            phase: EventPhase::Plan {
                items: plan_items(&v),
            },
            raw: Some(v.clone()),
        }),
        Some("thread.started") => Decoded::Thread(str_field(&v, "thread_id")),
        Some("error") => Decoded::Event(AdapterEvent::error(str_field(&v, "message"))),
        _ => Decoded::Skip,
    }
}

fn decode_claude_line(line: &str) -> Decoded {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(line) else {
        return Decoded::Skip;
    };
    match v.get("type").and_then(|t| t.as_str()) {
        Some("assistant") => {
            let text = v
                .pointer("/message/content")
                .and_then(|c| c.as_array())
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();
            if text.is_empty() {
                Decoded::Skip
            } else {
                Decoded::Event(AdapterEvent::delta(text).with_raw(v.clone()))
            }
        }
        Some("system") => match str_field(&v, "session_id") {
            id if id.is_empty() => Decoded::Skip,
            id => Decoded::Thread(id),
        },
        Some("result") => Decoded::Thread(str_field(&v, "session_id")),
        _ => Decoded::Skip,
    }
}

fn decode_gemini_line(line: &str) -> Decoded {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(line) else {
        return Decoded::Skip;
    };
    match v.get("type").and_then(|t| t.as_str()) {
        Some("content") => Decoded::Event(AdapterEvent::delta(str_field(&v, "text")).with_raw(v.clone())),
        Some("thought") => Decoded::Event(AdapterEvent::step_delta(str_field(&v, "text"))),
        Some("error") => Decoded::Event(AdapterEvent::error(str_field(&v, "message"))),
        _ => Decoded::Skip,
    }
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string()
}

fn str_list(v: &serde_json::Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(|x| x.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|x| x.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn plan_items(v: &serde_json::Value) -> Vec<PlanItem> {
    v.get("plan")
        .and_then(|p| p.as_array())
        .map(|items| {
            items
                .iter()
                .map(|i| PlanItem {
                    title: str_field(i, "step"),
                    status: str_field(i, "status"),
                })
                .collect()
        })
        .unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codex_delta_decodes_to_assistant_delta() {
        let d = decode_codex_line(r#"{"type":"agent_message_delta","delta":"hi"}"#);
        match d {
            Decoded::Event(ev) => {
                assert!(matches!(ev.phase, EventPhase::Delta { ref text, step: false } if text == "hi"));
            }
            _ => panic!("expected event"),
        }
    }

    #[test]
    fn codex_reasoning_is_a_step_delta() {
        let d = decode_codex_line(r#"{"type":"agent_reasoning_delta","delta":"mull"}"#);
        assert!(matches!(
            d,
            Decoded::Event(AdapterEvent {
                phase: EventPhase::Delta { step: true, .. },
                ..
            })
        ));
    }

    #[test]
    fn codex_thread_started_is_captured() {
        let d = decode_codex_line(r#"{"type":"thread.started","thread_id":"t-9"}"#);
        assert!(matches!(d, Decoded::Thread(id) if id == "t-9"));
    }

    #[test]
    fn codex_command_end_maps_fields() {
        let d = decode_codex_line(
            r#"{"type":"exec_command_end","call_id":"c1","command":"ls","status":"ok","exit_code":0,"aggregated_output":"a\nb"}"#,
        );
        match d {
            Decoded::Event(AdapterEvent {
                phase: EventPhase::Command(report),
                ..
            }) => {
                assert_eq!(report.id, "c1");
                assert_eq!(report.exit_code, Some(0));
                assert_eq!(report.output, "a\nb");
            }
            _ => panic!("expected command event"),
        }
    }

    #[test]
    fn claude_assistant_text_joins_parts() {
        let d = decode_claude_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"he"},{"type":"text","text":"y"}]}}"#,
        );
        match d {
            Decoded::Event(ev) => {
                assert!(matches!(ev.phase, EventPhase::Delta { ref text, .. } if text == "hey"));
            }
            _ => panic!("expected event"),
        }
    }

    #[test]
    fn gemini_thought_is_step_stream() {
        let d = decode_gemini_line(r#"{"type":"thought","text":"hmm"}"#);
        assert!(matches!(
            d,
            Decoded::Event(AdapterEvent {
                phase: EventPhase::Delta { step: true, .. },
                ..
            })
        ));
    }

    #[test]
    fn non_json_lines_are_skipped() {
        assert!(matches!(decode_codex_line("plain text"), Decoded::Skip));
        assert!(matches!(decode_claude_line(""), Decoded::Skip));
    }

    #[test]
    fn resume_thread_is_remembered() {
        let a = CliAdapter::codex();
        assert!(a.thread_id().is_none());
        futures::executor::block_on(a.resume_thread("t-42")).unwrap();
        assert_eq!(a.thread_id().as_deref(), Some("t-42"));
    }
}
