// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod apply_patch;
mod exec;
mod find;
mod grep;
mod read;
mod search;
mod vsearch;
mod write;

pub use agent::AgentTool;
pub use apply_patch::ApplyPatchTool;
pub use exec::ExecTool;
pub use find::FindTool;
pub use grep::GrepTool;
pub use read::ReadTool;
pub use search::SearchTool;
pub use vsearch::VsearchTool;
pub use write::WriteTool;
