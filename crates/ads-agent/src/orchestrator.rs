// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-session adapter registry with event fan-out.
//!
//! The orchestrator owns the ordered set of adapters for one session, the
//! active-agent selection and the working directory.  `send` forwards to
//! the active adapter and mirrors every event onto a broadcast channel, so
//! any number of subscribers observe the stream in production order; a
//! lagging or dropped subscriber never disturbs the turn.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::debug;

use crate::adapter::{
    collect_final, Adapter, AdapterError, AgentInput, EventStream, FinalResult, SendOptions,
};
use crate::events::AdapterEvent;

/// An adapter event labelled with the agent that produced it.
#[derive(Debug, Clone)]
pub struct AgentEventEnvelope {
    pub agent_id: String,
    pub event: AdapterEvent,
}

/// One row of `status()` output.
#[derive(Debug, Clone)]
pub struct AgentStatusInfo {
    pub id: String,
    pub name: String,
    pub ready: bool,
    pub error: Option<String>,
    pub active: bool,
}

pub struct Orchestrator {
    /// Registration order is subscriber-visible event order.
    adapters: Vec<Arc<dyn Adapter>>,
    active: Mutex<String>,
    cwd: Mutex<PathBuf>,
    event_tx: broadcast::Sender<AgentEventEnvelope>,
}

impl Orchestrator {
    /// Build with the given adapters; the first becomes active.
    pub fn new(adapters: Vec<Arc<dyn Adapter>>, cwd: &Path) -> Result<Self, AdapterError> {
        let first = adapters
            .first()
            .ok_or_else(|| AdapterError::NotReady("no adapters registered".into()))?
            .id()
            .to_string();
        let (event_tx, _) = broadcast::channel(1024);
        Ok(Self {
            adapters,
            active: Mutex::new(first),
            cwd: Mutex::new(cwd.to_path_buf()),
            event_tx,
        })
    }

    pub fn list_agents(&self) -> Vec<(String, String)> {
        self.adapters
            .iter()
            .map(|a| (a.id().to_string(), a.name().to_string()))
            .collect()
    }

    pub fn has_agent(&self, id: &str) -> bool {
        self.adapters.iter().any(|a| a.id() == id)
    }

    pub fn active_agent_id(&self) -> String {
        self.active.lock().expect("active lock").clone()
    }

    pub fn set_active_agent(&self, id: &str) -> Result<(), AdapterError> {
        if !self.has_agent(id) {
            return Err(AdapterError::NotReady(format!("unknown agent {id:?}")));
        }
        *self.active.lock().expect("active lock") = id.to_string();
        debug!(agent = id, "active agent switched");
        Ok(())
    }

    pub fn working_directory(&self) -> PathBuf {
        self.cwd.lock().expect("cwd lock").clone()
    }

    pub fn set_working_directory(&self, dir: &Path) {
        *self.cwd.lock().expect("cwd lock") = dir.to_path_buf();
    }

    /// Readiness of every registered adapter, in registration order.
    pub async fn status(&self) -> Vec<AgentStatusInfo> {
        let active = self.active_agent_id();
        let mut out = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let status = adapter.status().await;
            out.push(AgentStatusInfo {
                id: adapter.id().to_string(),
                name: adapter.name().to_string(),
                ready: status.ready,
                error: status.error,
                active: adapter.id() == active,
            });
        }
        out
    }

    /// Subscribe to the fan-out.  Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Thread id of the active adapter, when it has one to resume.
    pub fn thread_id(&self) -> Option<String> {
        self.adapter(&self.active_agent_id())
            .and_then(|a| a.thread_id())
    }

    pub fn adapter(&self, id: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.iter().find(|a| a.id() == id).cloned()
    }

    /// Forward `input` to the active adapter.  Every event is mirrored to
    /// the broadcast subscribers before it is yielded downstream.
    pub async fn send(
        &self,
        input: AgentInput,
        mut options: SendOptions,
    ) -> Result<EventStream, AdapterError> {
        let active = self.active_agent_id();
        let adapter = self
            .adapter(&active)
            .ok_or_else(|| AdapterError::NotReady(format!("unknown agent {active:?}")))?;
        if options.working_dir.is_none() {
            options.working_dir = Some(self.working_directory());
        }
        let inner = adapter.send(input, options).await?;
        let tx = self.event_tx.clone();
        let stream = inner.map(move |item| {
            if let Ok(event) = &item {
                // No subscribers is fine; fan-out must never abort the turn.
                let _ = tx.send(AgentEventEnvelope {
                    agent_id: active.clone(),
                    event: event.clone(),
                });
            }
            item
        });
        Ok(Box::pin(stream))
    }

    /// Non-streaming convenience: send `prompt` to a specific adapter and
    /// collect the final result.  Used for subordinate delegation.
    pub async fn invoke_agent(
        &self,
        id: &str,
        prompt: &str,
        mut options: SendOptions,
    ) -> Result<FinalResult, AdapterError> {
        let adapter = self
            .adapter(id)
            .ok_or_else(|| AdapterError::NotReady(format!("unknown agent {id:?}")))?;
        if options.working_dir.is_none() {
            options.working_dir = Some(self.working_directory());
        }
        let stream = adapter.send(AgentInput::Text(prompt.to_string()), options).await?;
        collect_final(stream).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
