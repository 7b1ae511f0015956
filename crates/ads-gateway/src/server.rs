// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP surface and gateway wiring.
//!
//! The HTTP scope is deliberately tiny: `GET /healthz` answers `ok`, any
//! other GET serves the landing page, and any path upgrades to WebSocket
//! when the client asks for it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ads_config::Config;
use ads_core::{CollabEngine, SessionManager, SessionRuntime};
use ads_queue::TaskScheduler;
use ads_store::Store;
use ads_tools::{ToolPolicy, ToolRuntime};
use anyhow::Context;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::info;

use crate::auth::parse_subprotocols;
use crate::commands::CommandRouter;
use crate::frames::{AgentView, WorkspaceSnapshot};
use crate::pidfile::PidFile;
use crate::review::ReviewLock;
use crate::ws;

const LANDING_HTML: &str = "<!doctype html>\n<html><head><title>ads</title></head>\n\
<body><h1>ads gateway</h1>\n\
<p>This endpoint speaks WebSocket. Connect with the console client.</p>\n\
</body></html>\n";

/// Everything a connection handler needs, shared behind an `Arc`.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub sessions: Arc<SessionManager>,
    pub engine: Arc<CollabEngine>,
    pub tools: Arc<ToolRuntime>,
    pub policy: Arc<ToolPolicy>,
    pub scheduler: TaskScheduler,
    pub router: CommandRouter,
    pub review: Arc<ReviewLock>,
    clients: Arc<AtomicUsize>,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        sessions: Arc<SessionManager>,
        engine: Arc<CollabEngine>,
        tools: Arc<ToolRuntime>,
        policy: Arc<ToolPolicy>,
        scheduler: TaskScheduler,
        router: CommandRouter,
    ) -> Self {
        Self {
            config,
            store,
            sessions,
            engine,
            tools,
            policy,
            scheduler,
            router,
            review: Arc::new(ReviewLock::new()),
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Claim one client slot, or `None` at the cap.  The returned guard
    /// releases the slot on drop.
    pub(crate) fn try_acquire_client(&self) -> Option<ClientSlot> {
        let max = self.config.web.max_clients.max(1);
        let mut current = self.clients.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return None;
            }
            match self.clients.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(ClientSlot {
                        clients: self.clients.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Current workspace snapshot for welcome/workspace frames.
    pub(crate) async fn workspace_snapshot(&self, runtime: &SessionRuntime) -> WorkspaceSnapshot {
        let agents = runtime
            .orchestrator
            .status()
            .await
            .into_iter()
            .map(|s| AgentView {
                id: s.id,
                name: s.name,
                ready: s.ready,
                active: s.active,
            })
            .collect();
        WorkspaceSnapshot {
            root: self.config.paths.root.display().to_string(),
            cwd: runtime.orchestrator.working_directory().display().to_string(),
            agents,
        }
    }
}

pub(crate) struct ClientSlot {
    clients: Arc<AtomicUsize>,
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Build the axum application.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(get(root))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Any path: upgrade to WebSocket when requested, otherwise the landing
/// page.  The first client-offered sub-protocol is echoed back so browser
/// clients accept the handshake.
async fn root(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    match upgrade {
        Some(upgrade) => {
            let header = headers
                .get("sec-websocket-protocol")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let hello = parse_subprotocols(header);
            let first = header
                .split(',')
                .map(str::trim)
                .find(|p| !p.is_empty())
                .map(str::to_string);
            let upgrade = match first {
                Some(protocol) => upgrade.protocols([protocol]),
                None => upgrade,
            };
            upgrade.on_upgrade(move |socket| ws::handle_socket(socket, state, hello))
        }
        None => Html(LANDING_HTML).into_response(),
    }
}

/// Bind and serve until ctrl-c.  Holds the workspace PID file for the
/// whole lifetime; the previous gateway (if any) is asked to hand over.
pub async fn run(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let pid_path = state.config.paths.pid_file();
    let _pidfile = PidFile::acquire(&pid_path)
        .with_context(|| format!("acquiring {}", pid_path.display()))?;

    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, workspace = %state.config.paths.root.display(), "gateway listening");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
