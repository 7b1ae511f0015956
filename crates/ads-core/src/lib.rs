// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Session core: the supervisor↔subordinate collaboration loop and the
//! per-client session runtime.

mod collab;
mod prompts;
mod session;

pub use collab::{
    CollabEngine, DelegationRecord, TurnOutcome, DEFAULT_MAX_DELEGATIONS,
    DEFAULT_MAX_SUPERVISOR_ROUNDS, SUPERVISOR_AGENT,
};
pub use session::{
    derive_user_id, AdapterFactory, PendingPrompt, QueuedPrompt, SessionLogger, SessionManager,
    SessionRuntime,
};
