// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool runtime: parses tool blocks embedded in assistant output, runs them
//! under policy, and substitutes their outputs back into the text.
//!
//! Block syntax is literal:
//!
//! ```text
//! <<<tool.read
//! {"path": "src/lib.rs"}
//! >>>
//! ```
//!
//! Contiguous runs of read-only tools (`read`, `grep`, `find`, `search`,
//! `vsearch`) execute concurrently; everything else serializes.  A failing
//! tool never aborts the turn — its block is replaced with a warning line
//! so the model can observe the failure and recover.

pub mod blocks;
mod builtin;
mod clients;
mod policy;
mod runtime;
mod shellwords;

use thiserror::Error;

pub use blocks::{parse_blocks, strip_blocks, Block, BlockKind};
pub use builtin::{
    AgentTool, ApplyPatchTool, ExecTool, FindTool, GrepTool, ReadTool, SearchTool, VsearchTool,
    WriteTool,
};
pub use clients::{
    AgentInvoker, HttpSearchClient, KeywordVectorSearch, SearchClient, SearchHit, SearchRequest,
    VectorHit, VectorSearchClient,
};
pub use policy::ToolPolicy;
pub use runtime::{
    BlockTool, ProcessedText, ToolContext, ToolHooks, ToolInvocation, ToolRuntime,
};
pub use shellwords::split_command_line;

/// Errors a tool execution can surface.  The runtime converts every variant
/// except `Cancelled` into an inline warning line.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The tool is switched off by configuration.
    #[error("tool disabled: {0}")]
    Disabled(String),

    /// A policy check rejected the request (path, allow-list, size…).
    #[error("{0}")]
    Policy(String),

    /// The per-invocation timeout fired.
    #[error("timeout after {ms}ms")]
    Timeout { ms: u64 },

    /// The tool ran but failed (bad payload, process error…).
    #[error("{0}")]
    Failed(String),

    /// The turn's cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}
