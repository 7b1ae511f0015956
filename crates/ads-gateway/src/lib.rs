// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket gateway and slash-command router.
//!
//! One gateway process per workspace: it accepts a bounded number of
//! WebSocket clients (authenticated through sub-protocol entries), feeds
//! prompts into the collaboration engine, streams turn and task events
//! back as JSON frames, and dispatches slash commands either to gateway
//! built-ins or to the workspace command table.

mod auth;
mod commands;
mod error;
mod frames;
mod pidfile;
mod review;
mod server;
mod ws;

pub use auth::{parse_subprotocols, ClientHello};
pub use commands::{
    parse_command, CommandHandler, CommandOutput, CommandRouter, ParsedCommand, ProcessBackend,
    COMMAND_VERBS,
};
pub use error::{GatewayError, CLOSE_AUTH, CLOSE_CAPACITY, CLOSE_IDLE};
pub use frames::{
    AgentView, HistoryItem, ImagePayload, Inbound, Outbound, PlanItemView, WorkspaceSnapshot,
};
pub use pidfile::PidFile;
pub use review::ReviewLock;
pub use server::{run, GatewayState};
