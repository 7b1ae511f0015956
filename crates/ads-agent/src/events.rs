// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// One event on an adapter's response stream.
///
/// `raw` carries the backend's original payload when a consumer wants more
/// than the normalized phase (e.g. for logging); it is never required.
#[derive(Debug, Clone)]
pub struct AdapterEvent {
    pub phase: EventPhase,
    pub raw: Option<serde_json::Value>,
}

/// The normalized event phases every adapter reduces its backend to.
#[derive(Debug, Clone)]
pub enum EventPhase {
    /// Incremental assistant text.  `step` marks internal chain-of-thought
    /// excerpts streamed on the side.
    Delta { text: String, step: bool },
    /// A command the backend executed on its own side.
    Command(CommandReport),
    /// A todo-list snapshot.
    Plan { items: Vec<PlanItem> },
    /// A produced patch with the affected file list.
    Patch { diff: String, files: Vec<String> },
    /// A recoverable backend error; the stream continues.
    Error { message: String },
    /// Terminal event: the final assistant text and the thread id to resume.
    Done {
        text: String,
        thread_id: Option<String>,
    },
}

/// Command execution as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReport {
    pub id: String,
    pub line: String,
    pub status: String,
    pub exit_code: Option<i64>,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub title: String,
    pub status: String,
}

impl AdapterEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            phase: EventPhase::Delta {
                text: text.into(),
                step: false,
            },
            raw: None,
        }
    }

    pub fn step_delta(text: impl Into<String>) -> Self {
        Self {
            phase: EventPhase::Delta {
                text: text.into(),
                step: true,
            },
            raw: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            phase: EventPhase::Error {
                message: message.into(),
            },
            raw: None,
        }
    }

    pub fn done(text: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            phase: EventPhase::Done {
                text: text.into(),
                thread_id,
            },
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, EventPhase::Done { .. })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_constructor_is_not_a_step() {
        let ev = AdapterEvent::delta("hi");
        assert!(matches!(ev.phase, EventPhase::Delta { step: false, .. }));
    }

    #[test]
    fn step_delta_marks_step_stream() {
        let ev = AdapterEvent::step_delta("thinking");
        assert!(matches!(ev.phase, EventPhase::Delta { step: true, .. }));
    }

    #[test]
    fn done_detection() {
        assert!(AdapterEvent::done("x", None).is_done());
        assert!(!AdapterEvent::delta("x").is_done());
    }

    #[test]
    fn raw_payload_is_attached() {
        let ev = AdapterEvent::delta("x").with_raw(serde_json::json!({"k": 1}));
        assert_eq!(ev.raw.unwrap()["k"], 1);
    }
}
