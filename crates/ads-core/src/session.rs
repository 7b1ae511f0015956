// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-client session runtime.
//!
//! One [`SessionRuntime`] per user id: orchestrator, working directory,
//! the active turn's cancellation token, a FIFO of prompts queued behind
//! the running turn, and a lazily opened log writer.  Thread ids and the
//! pending (unacknowledged) prompt are persisted through the store so
//! reconnects resume where the client left off.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ads_agent::{Adapter, AgentInput, Orchestrator};
use ads_store::Store;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// KV namespaces used by the session layer.
const THREADS_NS: &str = "threads";
const CWD_NS: &str = "cwd";
const PENDING_NS: &str = "pending-prompt";

/// Builds the adapter set for a fresh session orchestrator.
pub type AdapterFactory = Arc<dyn Fn() -> Vec<Arc<dyn Adapter>> + Send + Sync>;

/// Derive the stable user id from the auth token and the client session id.
/// First 16 hex chars of `SHA-256("<token>:<session>")`.
pub fn derive_user_id(token: &str, session_id: &str) -> String {
    let digest = Sha256::digest(format!("{token}:{session_id}").as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// A prompt parked behind the currently running turn.
#[derive(Debug, Clone)]
pub struct QueuedPrompt {
    /// Client-supplied message id, echoed in the `ack` frame.
    pub client_id: Option<String>,
    pub input: AgentInput,
}

/// The persisted pending prompt for reconnect replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPrompt {
    pub client_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredThread {
    thread_id: String,
    agent_id: String,
}

/// Buffered per-session log file under `.ads/run/logs/`.
pub struct SessionLogger {
    file: std::fs::File,
}

impl SessionLogger {
    fn open(dir: &Path, user_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{user_id}.log")))?;
        Ok(Self { file })
    }

    pub fn log(&mut self, level: &str, message: &str) {
        let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let _ = writeln!(self.file, "[{ts}] [{level}] {message}");
    }
}

/// Live state for one connected user.
pub struct SessionRuntime {
    pub user_id: String,
    pub orchestrator: Arc<Orchestrator>,
    active_turn: Mutex<Option<CancellationToken>>,
    queued: Mutex<VecDeque<QueuedPrompt>>,
    logger: Mutex<Option<SessionLogger>>,
    logs_dir: PathBuf,
}

impl SessionRuntime {
    fn new(user_id: String, orchestrator: Arc<Orchestrator>, logs_dir: PathBuf) -> Self {
        Self {
            user_id,
            orchestrator,
            active_turn: Mutex::new(None),
            queued: Mutex::new(VecDeque::new()),
            logger: Mutex::new(None),
            logs_dir,
        }
    }

    /// Start a turn, returning its cancellation token.  `None` when a turn
    /// is already running — queue the prompt instead.
    pub fn begin_turn(&self) -> Option<CancellationToken> {
        let mut active = self.active_turn.lock().expect("turn lock");
        if active.is_some() {
            return None;
        }
        let token = CancellationToken::new();
        *active = Some(token.clone());
        Some(token)
    }

    pub fn end_turn(&self) {
        *self.active_turn.lock().expect("turn lock") = None;
    }

    /// Swap in a fresh token without releasing the turn slot — used when
    /// draining queued prompts back-to-back so no other writer can slip in
    /// between turns.
    pub fn rotate_turn(&self) -> CancellationToken {
        let mut active = self.active_turn.lock().expect("turn lock");
        let token = CancellationToken::new();
        *active = Some(token.clone());
        token
    }

    pub fn turn_active(&self) -> bool {
        self.active_turn.lock().expect("turn lock").is_some()
    }

    /// Cancel the running turn.  Returns `false` when nothing is running.
    pub fn interrupt(&self) -> bool {
        match self.active_turn.lock().expect("turn lock").as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Park a prompt behind the running turn (FIFO).
    pub fn queue_prompt(&self, prompt: QueuedPrompt) {
        self.queued.lock().expect("queue lock").push_back(prompt);
    }

    pub fn dequeue_prompt(&self) -> Option<QueuedPrompt> {
        self.queued.lock().expect("queue lock").pop_front()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.lock().expect("queue lock").len()
    }

    /// Write a line through the lazily opened per-session log.
    pub fn log(&self, level: &str, message: &str) {
        let mut guard = self.logger.lock().expect("logger lock");
        if guard.is_none() {
            match SessionLogger::open(&self.logs_dir, &self.user_id) {
                Ok(logger) => *guard = Some(logger),
                Err(e) => {
                    warn!(user = %self.user_id, "cannot open session log: {e}");
                    return;
                }
            }
        }
        if let Some(logger) = guard.as_mut() {
            logger.log(level, message);
        }
    }
}

/// Owns the user-id → runtime map.
pub struct SessionManager {
    store: Arc<Store>,
    factory: AdapterFactory,
    logs_dir: PathBuf,
    sessions: Mutex<HashMap<String, Arc<SessionRuntime>>>,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, factory: AdapterFactory, logs_dir: PathBuf) -> Self {
        Self {
            store,
            factory,
            logs_dir,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached runtime or construct one.  With `resume_thread`
    /// the stored thread id (if any) is restored into its adapter.
    pub async fn get_or_create(
        &self,
        user_id: &str,
        cwd: &Path,
        resume_thread: bool,
    ) -> anyhow::Result<Arc<SessionRuntime>> {
        if let Some(runtime) = self.get(user_id) {
            return Ok(runtime);
        }

        let orchestrator = Arc::new(Orchestrator::new((self.factory)(), cwd)?);
        if resume_thread {
            if let Some(raw) = self.store.kv_get(THREADS_NS, user_id)? {
                match serde_json::from_str::<StoredThread>(&raw) {
                    Ok(stored) => {
                        if let Some(adapter) = orchestrator.adapter(&stored.agent_id) {
                            adapter.resume_thread(&stored.thread_id).await?;
                            let _ = orchestrator.set_active_agent(&stored.agent_id);
                            info!(user = user_id, agent = %stored.agent_id, "thread restored");
                        }
                    }
                    Err(e) => warn!(user = user_id, "discarding malformed thread record: {e}"),
                }
            }
        }

        let runtime = Arc::new(SessionRuntime::new(
            user_id.to_string(),
            orchestrator,
            self.logs_dir.clone(),
        ));
        self.sessions
            .lock()
            .expect("sessions lock")
            .insert(user_id.to_string(), runtime.clone());
        Ok(runtime)
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<SessionRuntime>> {
        self.sessions.lock().expect("sessions lock").get(user_id).cloned()
    }

    /// Tear down the runtime and forget its thread id.
    pub fn reset(&self, user_id: &str) -> anyhow::Result<()> {
        if let Some(runtime) = self.sessions.lock().expect("sessions lock").remove(user_id) {
            runtime.interrupt();
        }
        self.store.kv_delete(THREADS_NS, user_id)?;
        Ok(())
    }

    /// Persist the thread id so a later session can resume it.
    pub fn save_thread_id(
        &self,
        user_id: &str,
        thread_id: &str,
        agent_id: &str,
    ) -> anyhow::Result<()> {
        let record = StoredThread {
            thread_id: thread_id.to_string(),
            agent_id: agent_id.to_string(),
        };
        self.store.kv_set(
            THREADS_NS,
            user_id,
            &serde_json::to_string(&record)?,
            now_ms(),
        )?;
        Ok(())
    }

    pub fn switch_agent(&self, user_id: &str, agent_id: &str) -> anyhow::Result<()> {
        let runtime = self
            .get(user_id)
            .ok_or_else(|| anyhow::anyhow!("no session for user {user_id}"))?;
        runtime.orchestrator.set_active_agent(agent_id)?;
        Ok(())
    }

    /// Update the runtime cwd, propagate it to the orchestrator, and
    /// remember it for the next session.
    pub fn set_user_cwd(&self, user_id: &str, cwd: &Path) -> anyhow::Result<()> {
        if let Some(runtime) = self.get(user_id) {
            runtime.orchestrator.set_working_directory(cwd);
        }
        self.store
            .kv_set(CWD_NS, user_id, &cwd.display().to_string(), now_ms())?;
        Ok(())
    }

    pub fn user_cwd(&self, user_id: &str) -> Option<PathBuf> {
        self.store
            .kv_get(CWD_NS, user_id)
            .ok()
            .flatten()
            .map(PathBuf::from)
    }

    // ── Pending prompt (ack & replay) ─────────────────────────────────────────

    pub fn set_pending_prompt(
        &self,
        namespace: &str,
        session_id: &str,
        pending: &PendingPrompt,
    ) -> anyhow::Result<()> {
        self.store.kv_set(
            PENDING_NS,
            &pending_key(namespace, session_id),
            &serde_json::to_string(pending)?,
            now_ms(),
        )?;
        Ok(())
    }

    /// Drop the pending prompt once its send acknowledges as delivered.
    pub fn clear_pending_prompt(&self, namespace: &str, session_id: &str) -> anyhow::Result<()> {
        self.store
            .kv_delete(PENDING_NS, &pending_key(namespace, session_id))?;
        Ok(())
    }

    /// The stored prompt awaiting replay on reconnect, if any.
    pub fn pending_prompt(
        &self,
        namespace: &str,
        session_id: &str,
    ) -> anyhow::Result<Option<PendingPrompt>> {
        let raw = self
            .store
            .kv_get(PENDING_NS, &pending_key(namespace, session_id))?;
        Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
    }
}

fn pending_key(namespace: &str, session_id: &str) -> String {
    format!("{namespace}:{session_id}")
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
