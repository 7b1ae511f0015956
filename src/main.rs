// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use ads_agent::{collect_final, Adapter, CliAdapter, Orchestrator, SendOptions};
use ads_config::{Config, WorkspacePaths};
use ads_core::{AdapterFactory, CollabEngine, SessionManager};
use ads_gateway::{CommandRouter, GatewayState, ProcessBackend};
use ads_queue::TaskScheduler;
use ads_store::Store;
use ads_tools::{
    AgentInvoker, HttpSearchClient, KeywordVectorSearch, ToolPolicy, ToolRuntime,
};
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = ads_config::from_env();
    if let Some(workspace) = &cli.workspace {
        let workspace = workspace
            .canonicalize()
            .with_context(|| format!("workspace {} not found", workspace.display()))?;
        config.allowed_dirs = vec![workspace.clone()];
        config.paths = WorkspacePaths::new(&workspace);
    }
    let config = Arc::new(config);

    match cli.command {
        Some(Commands::ShowConfig) => {
            println!("{config:#?}");
            Ok(())
        }
        Some(Commands::Serve) | None => serve(config).await,
    }
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&config.paths.state_db())?);
    store.import_legacy_state(
        &config.paths.legacy_cwd_json(),
        &config.paths.legacy_history_json(),
        chrono::Utc::now().timestamp_millis(),
    )?;

    let factory: AdapterFactory = Arc::new(adapter_set);
    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        factory.clone(),
        config.paths.logs_dir(),
    ));

    let policy = Arc::new(ToolPolicy::new(
        config.tools.clone(),
        config.allowed_dirs.clone(),
    ));
    let tools = Arc::new(ToolRuntime::with_builtins(
        policy.clone(),
        Arc::new(HttpSearchClient::from_env()),
        Arc::new(KeywordVectorSearch::default()),
        Arc::new(DirectAgentInvoker::new(adapter_set())),
    ));

    // The scheduler drives tasks against its own workspace-scoped
    // orchestrator, in parallel with interactive sessions.
    let queue_orchestrator = Arc::new(Orchestrator::new(adapter_set(), &config.paths.root)?);
    let scheduler = TaskScheduler::new(store.clone(), queue_orchestrator)
        .with_attachments_dir(config.paths.temp_images_dir());

    let router = CommandRouter::with_backend(Arc::new(ProcessBackend::new(
        "ad",
        config.command_workspace.clone(),
    )));

    let state = Arc::new(GatewayState::new(
        config,
        store,
        sessions,
        Arc::new(CollabEngine::default()),
        tools,
        policy,
        scheduler,
        router,
    ));

    ads_gateway::run(state).await
}

/// The adapter roster: codex supervises, claude and gemini take delegation.
fn adapter_set() -> Vec<Arc<dyn Adapter>> {
    vec![
        Arc::new(CliAdapter::codex()),
        Arc::new(CliAdapter::claude()),
        Arc::new(CliAdapter::gemini()),
    ]
}

/// `tool.agent` callback: invokes a registered adapter directly, without a
/// back-pointer to any session orchestrator.
struct DirectAgentInvoker {
    adapters: Vec<Arc<dyn Adapter>>,
}

impl DirectAgentInvoker {
    fn new(adapters: Vec<Arc<dyn Adapter>>) -> Self {
        Self { adapters }
    }
}

#[async_trait]
impl AgentInvoker for DirectAgentInvoker {
    async fn invoke(&self, agent_id: &str, prompt: &str) -> anyhow::Result<String> {
        let adapter = self
            .adapters
            .iter()
            .find(|a| a.id() == agent_id)
            .ok_or_else(|| anyhow::anyhow!("agent {agent_id:?} is not registered"))?;
        let stream = adapter
            .send(prompt.into(), SendOptions::default())
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        let result = collect_final(stream).await.map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(result.text)
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("ADS_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
