// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Deterministic scripted adapter for tests.  Each `send` pops the next
//! script and replays its events without any process or network access.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::adapter::{
    Adapter, AdapterError, AdapterStatus, AgentInput, EventStream, SendOptions,
};
use crate::events::AdapterEvent;

/// A pre-scripted adapter.  The outer `Vec` is the ordered list of calls;
/// the inner `Vec` the event sequence for that call.  When scripts run out
/// the adapter answers with a single empty `Done`.
pub struct ScriptedAdapter {
    id: String,
    scripts: Arc<Mutex<Vec<Vec<AdapterEvent>>>>,
    /// Delay inserted before each event; lets tests exercise interrupts
    /// against a slowly streaming adapter.
    event_delay: Duration,
    /// Keep replaying the final script instead of answering empty Done.
    repeat_last: bool,
    /// Every prompt text this adapter has been sent, for test inspection.
    pub seen_prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAdapter {
    pub fn new(id: impl Into<String>, scripts: Vec<Vec<AdapterEvent>>) -> Self {
        Self {
            id: id.into(),
            scripts: Arc::new(Mutex::new(scripts)),
            event_delay: Duration::ZERO,
            repeat_last: false,
            seen_prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: an adapter that always answers `reply` in one delta.
    pub fn always(id: impl Into<String>, reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(
            id,
            vec![vec![
                AdapterEvent::delta(reply.clone()),
                AdapterEvent::done(reply, None),
            ]],
        )
        .repeating()
    }

    /// Replay the last script forever instead of falling back to empty Done.
    pub fn repeating(self) -> Self {
        // Marked by keeping one script and cloning it on each send.
        Self {
            repeat_last: true,
            ..self
        }
    }

    /// Stream each event only after `delay`, so a turn stays observable
    /// long enough for cancellation tests.
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    async fn status(&self) -> AdapterStatus {
        AdapterStatus::ready()
    }

    async fn resume_thread(&self, _thread_id: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn send(
        &self,
        input: AgentInput,
        options: SendOptions,
    ) -> Result<EventStream, AdapterError> {
        self.seen_prompts
            .lock()
            .expect("mock lock")
            .push(input.text());

        let events = {
            let mut scripts = self.scripts.lock().expect("mock lock");
            if scripts.is_empty() {
                vec![AdapterEvent::done("", None)]
            } else if self.repeat_last && scripts.len() == 1 {
                scripts[0].clone()
            } else {
                scripts.remove(0)
            }
        };

        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let cancel = options.cancel.clone();
        let delay = self.event_delay;
        tokio::spawn(async move {
            for event in events {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = tx.send(Err(AdapterError::Cancelled)).await;
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                } else if cancel.is_cancelled() {
                    let _ = tx.send(Err(AdapterError::Cancelled)).await;
                    return;
                }
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
