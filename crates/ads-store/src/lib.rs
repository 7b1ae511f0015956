// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Workspace-local persistence: tasks, plans, messages, conversations,
//! history, and namespaced key/value state in one embedded SQLite database.
//!
//! The store is the single owner of every persisted record.  Writers are
//! serialized through one connection behind a mutex; every operation that
//! touches more than one row runs inside a transaction, so readers never
//! observe a half-applied mutation.

mod conversations;
mod history;
mod kv;
mod legacy;
mod plan;
mod schema;
mod tasks;
mod types;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use thiserror::Error;

pub use types::{
    Admission, Conversation, ConversationMessage, ConversationStatus, CreateTask, HistoryEntry,
    HistoryKind, HistoryRole, MessageRole, MoveDirection, NewHistoryEntry, NewPlanStep,
    NewTaskMessage, PlanStep, StepStatus, Task, TaskContext, TaskMessage, TaskStatus,
};

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Caller handed us an unusable payload (empty prompt, unknown id set…).
    #[error("validation error: {0}")]
    Validation(String),

    /// A database constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying I/O or SQL failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(e.to_string()),
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(e.to_string())
            }
            _ => StoreError::Storage(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The embedded store.  Cheap to share behind an `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if necessary) the database at `path` and apply any
    /// pending schema migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("creating {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Storage(format!("opening {}: {e}", path.display())))?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with the shared connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Storage("store mutex poisoned".into()))?;
        f(&conn)
    }

    /// Run `f` inside a serialized transaction; commit on `Ok`.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Storage("store mutex poisoned".into()))?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
