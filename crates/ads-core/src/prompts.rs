// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Prompt fragments injected by the collaboration loop.

use crate::collab::DelegationRecord;

/// Guide prepended to the user's first prompt of a supervisor turn.
/// Teaches the block grammar for tools and delegation.
pub fn turn_guide(agent_ids: &[String]) -> String {
    let subordinates: Vec<&str> = agent_ids
        .iter()
        .map(String::as_str)
        .filter(|id| *id != crate::collab::SUPERVISOR_AGENT)
        .collect();
    format!(
        "You can call local tools by embedding blocks in your reply:\n\
         <<<tool.read\n{{\"path\": \"src/lib.rs\"}}\n>>>\n\
         Available tools: search, vsearch, read, write, grep, find, exec, apply_patch, agent.\n\
         Each block is executed and its output replaces the block in your message.\n\
         \n\
         You may also delegate sub-tasks to subordinate agents ({}):\n\
         <<<agent.claude\nrewrite the README introduction\n>>>\n\
         Delegation results are returned to you for integration.\n\
         ---\n",
        if subordinates.is_empty() {
            "none registered".to_string()
        } else {
            subordinates.join(", ")
        }
    )
}

/// Prompt that re-injects subordinate results into the supervisor.
pub fn reinjection_prompt(results: &[DelegationRecord]) -> String {
    let mut out = String::from(
        "You are the supervising agent. The delegations you requested have completed.\n\n",
    );
    for (i, record) in results.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} — {:?}\n{}\n\n",
            i + 1,
            record.agent_id,
            record.prompt,
            record.response
        ));
    }
    out.push_str(
        "Integrate these results and continue: either delegate further work with \
         <<<agent.<id>\nprompt\n>>> blocks, or produce your final answer now.",
    );
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
