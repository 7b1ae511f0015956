// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent adapters and the per-session orchestrator.
//!
//! An [`Adapter`] is the uniform capability surface over one LLM-backed
//! coding agent: send input, stream events, resume a thread, report
//! readiness.  The [`Orchestrator`] keeps the registered adapters for one
//! session, tracks the active one, and fans every streamed event out to
//! subscribers.

mod adapter;
mod cli;
mod events;
mod mock;
mod orchestrator;

pub use adapter::{
    collect_final, Adapter, AdapterError, AdapterStatus, AgentInput, EventStream, FinalResult,
    InputPart, SendOptions,
};
pub use cli::CliAdapter;
pub use events::{AdapterEvent, CommandReport, EventPhase, PlanItem};
pub use mock::ScriptedAdapter;
pub use orchestrator::{AgentEventEnvelope, AgentStatusInfo, Orchestrator};
