// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Durable task queue and scheduler.
//!
//! The scheduler ticks when the queue is started, when a task completes,
//! and when a task is created while the queue is active.  A tick claims
//! the head of the pending order only when no task is planning or running
//! — the store's claim transaction is the single admission point, so the
//! single-active-task invariant holds across concurrent tickers.

mod events;
mod scheduler;

pub use events::{TaskEvent, TaskEventKind};
pub use scheduler::{TaskScheduler, DEFAULT_PURGE_BATCH, DEFAULT_PURGE_RETENTION_MS};
