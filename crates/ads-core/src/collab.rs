// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Supervisor↔subordinate collaboration loop.
//!
//! When the active agent is the designated supervisor it may embed
//! `<<<agent.<id>\nprompt\n>>>` delegation blocks in its output.  The loop
//! extracts them, drives a bounded FIFO queue of subordinate invocations,
//! re-injects the labelled results, and repeats for a bounded number of
//! rounds.  Any other active agent bypasses delegation entirely.
//!
//! Every assistant text passes through the tool runtime before surfacing;
//! agent-block markup never reaches the client.

use std::collections::{HashSet, VecDeque};

use ads_agent::{collect_final, AdapterError, AgentInput, InputPart, Orchestrator, SendOptions};
use ads_tools::{parse_blocks, strip_blocks, Block, BlockKind, ToolError, ToolInvocation, ToolRuntime};
use tracing::{debug, info};

use crate::prompts::{reinjection_prompt, turn_guide};

/// The adapter allowed to delegate.
pub const SUPERVISOR_AGENT: &str = "codex";

/// Subordinate invocations allowed per turn.
pub const DEFAULT_MAX_DELEGATIONS: usize = 6;

/// Delegation rounds allowed per turn.
pub const DEFAULT_MAX_SUPERVISOR_ROUNDS: usize = 2;

/// One completed delegation.
#[derive(Debug, Clone)]
pub struct DelegationRecord {
    pub agent_id: String,
    pub prompt: String,
    pub response: String,
}

/// Everything a finished turn produces.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Tool outputs substituted, delegation markup stripped, trimmed.
    /// This is what the client sees as the final result.
    pub replaced_text: String,
    /// All blocks removed, spacing preserved.  This is what gets persisted
    /// as the assistant message.
    pub stripped_text: String,
    pub delegations: Vec<DelegationRecord>,
    pub rounds: usize,
    pub invocations: Vec<ToolInvocation>,
    /// Thread id reported by the active adapter, for resume-on-reconnect.
    pub thread_id: Option<String>,
}

pub struct CollabEngine {
    pub supervisor_id: String,
    pub max_delegations: usize,
    pub max_rounds: usize,
}

impl Default for CollabEngine {
    fn default() -> Self {
        Self {
            supervisor_id: SUPERVISOR_AGENT.to_string(),
            max_delegations: DEFAULT_MAX_DELEGATIONS,
            max_rounds: DEFAULT_MAX_SUPERVISOR_ROUNDS,
        }
    }
}

impl CollabEngine {
    /// Run one full turn against the orchestrator's active agent.
    pub async fn run_turn(
        &self,
        orchestrator: &Orchestrator,
        tools: &ToolRuntime,
        input: AgentInput,
        options: SendOptions,
    ) -> Result<TurnOutcome, AdapterError> {
        let active = orchestrator.active_agent_id();
        let supervising = active == self.supervisor_id;

        let first_input = if supervising {
            inject_guide(input, &agent_ids(orchestrator))
        } else {
            input
        };

        let stream = orchestrator.send(first_input, options.clone()).await?;
        let first = collect_final(stream).await?;
        let mut text = first.text;
        let mut thread_id = first.thread_id;

        let mut delegations: Vec<DelegationRecord> = Vec::new();
        let mut rounds = 0usize;

        if supervising {
            let mut seen: HashSet<(String, String)> = HashSet::new();
            loop {
                let directives = extract_directives(&text, &mut seen);
                if directives.is_empty() || rounds >= self.max_rounds {
                    break;
                }
                rounds += 1;
                debug!(round = rounds, pending = directives.len(), "delegation round");

                let mut queue: VecDeque<(String, String)> = directives.into();
                let mut round_results: Vec<DelegationRecord> = Vec::new();
                while let Some((agent_id, prompt)) = queue.pop_front() {
                    if delegations.len() + round_results.len() >= self.max_delegations {
                        info!(cap = self.max_delegations, "delegation cap reached");
                        break;
                    }
                    let response = if !orchestrator.has_agent(&agent_id) {
                        format!("[skipped: agent {agent_id:?} is not registered]")
                    } else {
                        match orchestrator
                            .invoke_agent(&agent_id, &prompt, options.clone())
                            .await
                        {
                            Ok(result) => {
                                // Subordinate output passes through the tool
                                // runtime too, and may nest more delegations.
                                let processed = self
                                    .process_tools(tools, orchestrator, &options, &result.text)
                                    .await?;
                                for nested in extract_directives(&processed, &mut seen) {
                                    queue.push_back(nested);
                                }
                                strip_agent_markup(&processed)
                            }
                            Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                            Err(e) => format!("[agent {agent_id} failed: {e}]"),
                        }
                    };
                    round_results.push(DelegationRecord {
                        agent_id,
                        prompt,
                        response,
                    });
                }

                delegations.extend(round_results.iter().cloned());

                let followup = reinjection_prompt(&round_results);
                let stream = orchestrator
                    .send(AgentInput::Text(followup), options.clone())
                    .await?;
                let next = collect_final(stream).await?;
                text = next.text;
                thread_id = next.thread_id.or(thread_id);
            }
        }

        let processed = match tools
            .process(&text, &orchestrator.working_directory(), &options.cancel)
            .await
        {
            Ok(p) => p,
            Err(ToolError::Cancelled) => return Err(AdapterError::Cancelled),
            Err(e) => return Err(AdapterError::Failed(e.to_string())),
        };

        Ok(TurnOutcome {
            replaced_text: strip_agent_markup(&processed.replaced_text).trim().to_string(),
            stripped_text: strip_agent_markup(&processed.stripped_text),
            delegations,
            rounds,
            invocations: processed.invocations,
            thread_id,
        })
    }

    /// Run tool blocks in a subordinate response (same cwd and token).
    async fn process_tools(
        &self,
        tools: &ToolRuntime,
        orchestrator: &Orchestrator,
        options: &SendOptions,
        text: &str,
    ) -> Result<String, AdapterError> {
        match tools
            .process(text, &orchestrator.working_directory(), &options.cancel)
            .await
        {
            Ok(p) => Ok(p.replaced_text),
            Err(ToolError::Cancelled) => Err(AdapterError::Cancelled),
            Err(e) => Err(AdapterError::Failed(e.to_string())),
        }
    }
}

fn agent_ids(orchestrator: &Orchestrator) -> Vec<String> {
    orchestrator
        .list_agents()
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

fn inject_guide(input: AgentInput, agent_ids: &[String]) -> AgentInput {
    let guide = turn_guide(agent_ids);
    match input {
        AgentInput::Text(text) => AgentInput::Text(format!("{guide}{text}")),
        AgentInput::Parts(mut parts) => {
            parts.insert(0, InputPart::Text { text: guide });
            AgentInput::Parts(parts)
        }
    }
}

/// Pull `(agent, prompt)` directives out of `text`, de-duplicated against
/// everything already seen this turn.
fn extract_directives(text: &str, seen: &mut HashSet<(String, String)>) -> Vec<(String, String)> {
    parse_blocks(text)
        .into_iter()
        .filter(|b| b.kind == BlockKind::Agent)
        .map(|b| (b.name, b.payload.trim().to_string()))
        .filter(|d| seen.insert(d.clone()))
        .collect()
}

/// Remove all `agent.` blocks; tool blocks are untouched.
fn strip_agent_markup(text: &str) -> String {
    let blocks: Vec<Block> = parse_blocks(text)
        .into_iter()
        .filter(|b| b.kind == BlockKind::Agent)
        .collect();
    let refs: Vec<&Block> = blocks.iter().collect();
    strip_blocks(text, &refs)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use ads_agent::{Adapter, AdapterEvent, ScriptedAdapter};
    use ads_config::ToolLimits;
    use ads_tools::ToolPolicy;

    use super::*;

    fn tools_for(dir: &Path) -> ToolRuntime {
        let policy = Arc::new(ToolPolicy::new(
            ToolLimits::default(),
            vec![dir.to_path_buf()],
        ));
        let mut rt = ToolRuntime::new(policy);
        rt.register(ads_tools::ReadTool { enabled: true });
        rt
    }

    fn orch(adapters: Vec<Arc<dyn Adapter>>, dir: &Path) -> Orchestrator {
        Orchestrator::new(adapters, dir).unwrap()
    }

    fn script(events: Vec<Vec<AdapterEvent>>) -> ScriptedAdapter {
        ScriptedAdapter::new("codex", events)
    }

    fn reply(text: &str) -> Vec<AdapterEvent> {
        vec![AdapterEvent::done(text, None)]
    }

    #[tokio::test]
    async fn plain_turn_streams_and_returns_text() {
        let dir = tempfile::tempdir().unwrap();
        let o = orch(
            vec![Arc::new(ScriptedAdapter::new(
                "codex",
                vec![vec![
                    AdapterEvent::delta("hi"),
                    AdapterEvent::delta("!"),
                    AdapterEvent::done("hi!", None),
                ]],
            ))],
            dir.path(),
        );
        let tools = tools_for(dir.path());
        let out = CollabEngine::default()
            .run_turn(&o, &tools, "say hi".into(), SendOptions::default())
            .await
            .unwrap();
        assert_eq!(out.replaced_text, "hi!");
        assert_eq!(out.rounds, 0);
        assert!(out.delegations.is_empty());
    }

    #[tokio::test]
    async fn guide_is_injected_for_supervisor_first_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let codex = Arc::new(ScriptedAdapter::new("codex", vec![reply("ok")]));
        let seen = codex.seen_prompts.clone();
        let o = orch(vec![codex], dir.path());
        let tools = tools_for(dir.path());
        CollabEngine::default()
            .run_turn(&o, &tools, "do things".into(), SendOptions::default())
            .await
            .unwrap();
        let prompts = seen.lock().unwrap();
        assert!(prompts[0].contains("tool.read"), "guide missing");
        assert!(prompts[0].ends_with("do things"));
    }

    #[tokio::test]
    async fn non_supervisor_gets_no_guide_and_no_delegation() {
        let dir = tempfile::tempdir().unwrap();
        let claude = Arc::new(ScriptedAdapter::new(
            "claude",
            vec![reply("<<<agent.gemini\nhello\n>>> answer")],
        ));
        let seen = claude.seen_prompts.clone();
        let o = orch(vec![claude, Arc::new(ScriptedAdapter::always("gemini", "x"))], dir.path());
        let tools = tools_for(dir.path());
        let out = CollabEngine::default()
            .run_turn(&o, &tools, "q".into(), SendOptions::default())
            .await
            .unwrap();
        // Not the supervisor: no rounds, markup still stripped.
        assert_eq!(out.rounds, 0);
        assert!(out.delegations.is_empty());
        assert_eq!(out.replaced_text, "answer");
        assert!(!seen.lock().unwrap()[0].contains("tool.read"));
    }

    #[tokio::test]
    async fn single_delegation_round_records_summary() {
        // Spec scenario: supervisor delegates to claude, gets "rewritten.",
        // answers "done." — one round, summary carries the exchange.
        let dir = tempfile::tempdir().unwrap();
        let codex = Arc::new(script(vec![
            reply("<<<agent.claude\nrewrite doc\n>>> done."),
            reply("done."),
        ]));
        let claude = Arc::new(ScriptedAdapter::always("claude", "rewritten."));
        let o = orch(vec![codex, claude], dir.path());
        let tools = tools_for(dir.path());

        let out = CollabEngine::default()
            .run_turn(&o, &tools, "fix the doc".into(), SendOptions::default())
            .await
            .unwrap();

        assert_eq!(out.rounds, 1);
        assert_eq!(out.replaced_text, "done.");
        assert_eq!(out.delegations.len(), 1);
        assert_eq!(out.delegations[0].agent_id, "claude");
        assert_eq!(out.delegations[0].prompt, "rewrite doc");
        assert_eq!(out.delegations[0].response, "rewritten.");
    }

    #[tokio::test]
    async fn unregistered_target_becomes_skip_notice() {
        let dir = tempfile::tempdir().unwrap();
        let codex = Arc::new(script(vec![
            reply("<<<agent.ghost\nhaunt\n>>>"),
            reply("finished"),
        ]));
        let o = orch(vec![codex], dir.path());
        let tools = tools_for(dir.path());
        let out = CollabEngine::default()
            .run_turn(&o, &tools, "go".into(), SendOptions::default())
            .await
            .unwrap();
        assert_eq!(out.delegations.len(), 1);
        assert!(out.delegations[0].response.contains("not registered"));
        assert_eq!(out.replaced_text, "finished");
    }

    #[tokio::test]
    async fn duplicate_directives_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let codex = Arc::new(script(vec![
            reply("<<<agent.claude\nsame\n>>> and <<<agent.claude\nsame\n>>>"),
            reply("done"),
        ]));
        let claude = Arc::new(ScriptedAdapter::always("claude", "resp"));
        let o = orch(vec![codex, claude], dir.path());
        let tools = tools_for(dir.path());
        let out = CollabEngine::default()
            .run_turn(&o, &tools, "go".into(), SendOptions::default())
            .await
            .unwrap();
        assert_eq!(out.delegations.len(), 1, "identical directives collapse");
    }

    #[tokio::test]
    async fn nested_delegations_append_to_queue() {
        let dir = tempfile::tempdir().unwrap();
        let codex = Arc::new(script(vec![
            reply("<<<agent.claude\nstep one\n>>>"),
            reply("all integrated"),
        ]));
        let claude = Arc::new(ScriptedAdapter::always(
            "claude",
            "did step one <<<agent.gemini\nstep two\n>>>",
        ));
        let gemini = Arc::new(ScriptedAdapter::always("gemini", "did step two"));
        let o = orch(vec![codex, claude, gemini], dir.path());
        let tools = tools_for(dir.path());
        let out = CollabEngine::default()
            .run_turn(&o, &tools, "go".into(), SendOptions::default())
            .await
            .unwrap();
        let agents: Vec<&str> = out.delegations.iter().map(|d| d.agent_id.as_str()).collect();
        assert_eq!(agents, vec!["claude", "gemini"]);
        // Nested markup is stripped from the recorded response.
        assert_eq!(out.delegations[0].response.trim(), "did step one");
    }

    #[tokio::test]
    async fn delegation_cap_bounds_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let many: String = (0..10)
            .map(|i| format!("<<<agent.claude\ntask {i}\n>>>\n"))
            .collect();
        let codex = Arc::new(script(vec![reply(&many), reply("done")]));
        let claude = Arc::new(ScriptedAdapter::always("claude", "ok"));
        let o = orch(vec![codex, claude], dir.path());
        let tools = tools_for(dir.path());
        let engine = CollabEngine {
            max_delegations: 3,
            ..CollabEngine::default()
        };
        let out = engine
            .run_turn(&o, &tools, "go".into(), SendOptions::default())
            .await
            .unwrap();
        assert_eq!(out.delegations.len(), 3);
    }

    #[tokio::test]
    async fn rounds_stop_at_the_cap() {
        let dir = tempfile::tempdir().unwrap();
        // The supervisor keeps delegating fresh prompts forever.
        let codex = Arc::new(script(vec![
            reply("<<<agent.claude\nround one\n>>>"),
            reply("<<<agent.claude\nround two\n>>>"),
            reply("<<<agent.claude\nround three\n>>>"),
            reply("never reached"),
        ]));
        let claude = Arc::new(ScriptedAdapter::always("claude", "ok"));
        let o = orch(vec![codex, claude], dir.path());
        let tools = tools_for(dir.path());
        let out = CollabEngine::default()
            .run_turn(&o, &tools, "go".into(), SendOptions::default())
            .await
            .unwrap();
        assert_eq!(out.rounds, 2);
        // The trailing unprocessed directive is still stripped from output.
        assert!(!out.replaced_text.contains("<<<agent."));
    }

    #[tokio::test]
    async fn tool_blocks_in_final_text_are_substituted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.txt"), "ok\n").unwrap();
        let codex = Arc::new(script(vec![reply(
            "prefix <<<tool.read\n{\"path\":\"x.txt\"}\n>>> suffix",
        )]));
        let o = orch(vec![codex], dir.path());
        let tools = tools_for(dir.path());
        let out = CollabEngine::default()
            .run_turn(&o, &tools, "read it".into(), SendOptions::default())
            .await
            .unwrap();
        assert_eq!(out.replaced_text, "prefix 📄 x.txt\n```\nok\n``` suffix");
        assert_eq!(out.stripped_text, "prefix  suffix");
        assert_eq!(out.invocations.len(), 1);
    }
}
