// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{AdapterEvent, EventPhase};

/// Errors surfaced by adapters.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The backend is not available (binary missing, not authenticated…).
    #[error("adapter not ready: {0}")]
    NotReady(String),

    /// The backend failed mid-turn.
    #[error("adapter failed: {0}")]
    Failed(String),

    /// The cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}

/// A lazily produced, single-pass, ordered event sequence.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AdapterEvent, AdapterError>> + Send>>;

/// Input to an adapter: plain text or an ordered part sequence.
#[derive(Debug, Clone)]
pub enum AgentInput {
    Text(String),
    Parts(Vec<InputPart>),
}

#[derive(Debug, Clone)]
pub enum InputPart {
    Text { text: String },
    LocalImage { path: PathBuf },
}

impl AgentInput {
    /// The textual portion of the input (image parts skipped).
    pub fn text(&self) -> String {
        match self {
            AgentInput::Text(t) => t.clone(),
            AgentInput::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    InputPart::Text { text } => Some(text.as_str()),
                    InputPart::LocalImage { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn image_paths(&self) -> Vec<&PathBuf> {
        match self {
            AgentInput::Text(_) => Vec::new(),
            AgentInput::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    InputPart::LocalImage { path } => Some(path),
                    InputPart::Text { .. } => None,
                })
                .collect(),
        }
    }
}

impl From<&str> for AgentInput {
    fn from(s: &str) -> Self {
        AgentInput::Text(s.to_string())
    }
}

impl From<String> for AgentInput {
    fn from(s: String) -> Self {
        AgentInput::Text(s)
    }
}

/// Per-send options.  The cancellation token is honored by every adapter:
/// closing it stops emissions promptly and surfaces
/// [`AdapterError::Cancelled`] on the final result.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub model: Option<String>,
    /// Opaque model parameters forwarded to the backend.
    pub model_params: Option<serde_json::Value>,
    pub working_dir: Option<PathBuf>,
    pub thread_id: Option<String>,
    pub cancel: CancellationToken,
}

/// Adapter readiness as reported by `status`.
#[derive(Debug, Clone)]
pub struct AdapterStatus {
    pub ready: bool,
    pub error: Option<String>,
}

impl AdapterStatus {
    pub fn ready() -> Self {
        Self {
            ready: true,
            error: None,
        }
    }

    pub fn not_ready(error: impl Into<String>) -> Self {
        Self {
            ready: false,
            error: Some(error.into()),
        }
    }
}

/// Uniform capability surface over one LLM-backed coding agent.
///
/// `send` is single-producer: one event stream per call, events in the
/// order the backend produced them.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable identifier used in delegation blocks and `/agent` commands.
    fn id(&self) -> &str;

    /// Human-readable name for status displays.
    fn name(&self) -> &str;

    async fn status(&self) -> AdapterStatus;

    /// Remember `thread_id` so the next `send` continues that thread.
    async fn resume_thread(&self, thread_id: &str) -> Result<(), AdapterError>;

    /// The thread this adapter would currently resume, if any.
    fn thread_id(&self) -> Option<String> {
        None
    }

    async fn send(&self, input: AgentInput, options: SendOptions)
        -> Result<EventStream, AdapterError>;
}

/// Final result assembled from a drained event stream.
#[derive(Debug, Clone)]
pub struct FinalResult {
    pub text: String,
    pub thread_id: Option<String>,
}

/// Drain a stream to its final result.  Assistant deltas are accumulated as
/// a fallback for backends whose `Done` event carries no text.
pub async fn collect_final(mut stream: EventStream) -> Result<FinalResult, AdapterError> {
    let mut accumulated = String::new();
    while let Some(item) = stream.next().await {
        let event = item?;
        match event.phase {
            EventPhase::Delta { text, step: false } => accumulated.push_str(&text),
            EventPhase::Done { text, thread_id } => {
                return Ok(FinalResult {
                    text: if text.is_empty() { accumulated } else { text },
                    thread_id,
                });
            }
            _ => {}
        }
    }
    // Stream ended without a Done event — treat the accumulation as final.
    Ok(FinalResult {
        text: accumulated,
        thread_id: None,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
