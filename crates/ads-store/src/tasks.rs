// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Task repository: creation, claiming, ordering and lifecycle transitions.
//!
//! Claim order is `(queue_order, created_at, id)` ascending — deterministic
//! even when two rows share a `queue_order`.  All multi-row mutations run in
//! one transaction on the single write connection, so two concurrent callers
//! can never claim the same row.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::types::{Admission, CreateTask, MoveDirection, Task, TaskStatus};
use crate::{Result, Store, StoreError};

/// Maximum glyphs of a derived task title before the ellipsis.
const TITLE_MAX_GLYPHS: usize = 32;

const TASK_COLUMNS: &str = "id, title, prompt, model, model_params, status, priority, \
     queue_order, created_at, queued_at, started_at, completed_at, prompt_injected_at, \
     archived_at, parent_id, thread_id, result, error, retry_count, max_retries, \
     created_by, inherit_context";

const PENDING_ORDER: &str = "ORDER BY queue_order ASC, created_at ASC, id ASC";

impl Store {
    /// Create a task.  Fails with [`StoreError::Validation`] on an empty
    /// prompt.  When no title is supplied one is derived from the first
    /// non-empty prompt line.  `queue_order` becomes
    /// `max(existing queue_order) + 1`, or `now` for the first task.
    pub fn create_task(&self, input: CreateTask, now: i64, admission: Admission) -> Result<Task> {
        if input.prompt.trim().is_empty() {
            return Err(StoreError::Validation("task prompt must not be empty".into()));
        }

        let title = input
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| derive_title(&input.prompt));

        let (status, queued_at) = match admission {
            Admission::Pending => (TaskStatus::Pending, None),
            Admission::Queued { queued_at } => (TaskStatus::Queued, Some(queued_at)),
        };

        let id = format!("task-{}", uuid::Uuid::new_v4());
        let model_params = input
            .model_params
            .as_ref()
            .map(|v| v.to_string());

        self.with_tx(|tx| {
            let max_order: Option<i64> =
                tx.query_row("SELECT MAX(queue_order) FROM tasks", [], |r| r.get(0))?;
            let queue_order = max_order.map(|m| m + 1).unwrap_or(now);

            tx.execute(
                "INSERT INTO tasks (id, title, prompt, model, model_params, status, priority, \
                 queue_order, created_at, queued_at, retry_count, max_retries, parent_id, \
                 created_by, inherit_context) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?13, ?14)",
                params![
                    id,
                    title,
                    input.prompt,
                    input.model,
                    model_params,
                    status.as_str(),
                    input.priority,
                    queue_order,
                    now,
                    queued_at,
                    input.max_retries,
                    input.parent_id,
                    input.created_by,
                    input.inherit_context as i64,
                ],
            )?;
            get_task_tx(tx, &id)
        })
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.with_conn(|conn| get_task_tx(conn, id))
    }

    pub fn find_task(&self, id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id],
                task_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// All tasks, optionally filtered by status, in claim order.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let (sql, args): (String, Vec<String>) = match status {
                Some(s) => (
                    format!(
                        "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 {PENDING_ORDER}"
                    ),
                    vec![s.as_str().to_string()],
                ),
                None => (
                    format!("SELECT {TASK_COLUMNS} FROM tasks {PENDING_ORDER}"),
                    vec![],
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), task_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The single planning/running task, when one exists.
    pub fn active_task(&self) -> Result<Option<Task>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE status IN ('planning', 'running') LIMIT 1"
                ),
                [],
                task_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Atomically claim the head of the pending order: the selected row
    /// transitions to `planning` with `started_at` stamped if null.  Returns
    /// `None` when no pending row exists.
    pub fn claim_next_pending_task(&self, now: i64) -> Result<Option<Task>> {
        self.with_tx(|tx| {
            let head: Option<String> = tx
                .query_row(
                    &format!(
                        "SELECT id FROM tasks WHERE status = 'pending' {PENDING_ORDER} LIMIT 1"
                    ),
                    [],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(id) = head else { return Ok(None) };

            tx.execute(
                "UPDATE tasks SET status = 'planning', \
                 started_at = COALESCE(started_at, ?2) WHERE id = ?1",
                params![id, now],
            )?;
            Ok(Some(get_task_tx(tx, &id)?))
        })
    }

    /// Promote the head of the queued order to `pending`.
    pub fn dequeue_next_queued_task(&self, now: i64) -> Result<Option<Task>> {
        let _ = now;
        self.with_tx(|tx| {
            let head: Option<String> = tx
                .query_row(
                    &format!(
                        "SELECT id FROM tasks WHERE status = 'queued' {PENDING_ORDER} LIMIT 1"
                    ),
                    [],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(id) = head else { return Ok(None) };

            tx.execute("UPDATE tasks SET status = 'pending' WHERE id = ?1", [&id])?;
            Ok(Some(get_task_tx(tx, &id)?))
        })
    }

    /// Swap a pending task with its neighbour in the pending order.
    /// Returns `false` (no-op) at the boundary.
    pub fn move_pending_task(&self, id: &str, direction: MoveDirection) -> Result<bool> {
        self.with_tx(|tx| {
            let pending = pending_ids_tx(tx)?;
            let Some(pos) = pending.iter().position(|p| p == id) else {
                return Err(StoreError::NotFound(format!("pending task {id}")));
            };

            let neighbour = match direction {
                MoveDirection::Up if pos > 0 => pos - 1,
                MoveDirection::Down if pos + 1 < pending.len() => pos + 1,
                _ => return Ok(false),
            };

            // Renumber the pending subset to consecutive orders first so a
            // swap is well-defined even when historical orders collide.
            renumber_pending_tx(tx, &pending)?;
            tx.execute(
                "UPDATE tasks SET queue_order = ?2 WHERE id = ?1",
                params![pending[pos], (neighbour + 1) as i64],
            )?;
            tx.execute(
                "UPDATE tasks SET queue_order = ?2 WHERE id = ?1",
                params![pending[neighbour], (pos + 1) as i64],
            )?;
            Ok(true)
        })
    }

    /// Move the listed pending tasks to the front of the pending order, in
    /// the given sequence.  Unlisted pending tasks keep their prior relative
    /// order behind them.  `ids` must be a subset of the current pending set.
    pub fn reorder_pending_tasks(&self, ids: &[String]) -> Result<()> {
        self.with_tx(|tx| {
            let pending = pending_ids_tx(tx)?;
            for id in ids {
                if !pending.contains(id) {
                    return Err(StoreError::Validation(format!(
                        "task {id} is not in the pending set"
                    )));
                }
            }
            let mut seen = std::collections::HashSet::new();
            let mut sequence: Vec<&String> = Vec::with_capacity(pending.len());
            for id in ids {
                if seen.insert(id.as_str()) {
                    sequence.push(id);
                }
            }
            for id in &pending {
                if !seen.contains(id.as_str()) {
                    sequence.push(id);
                }
            }
            for (i, id) in sequence.iter().enumerate() {
                tx.execute(
                    "UPDATE tasks SET queue_order = ?2 WHERE id = ?1",
                    params![id, (i + 1) as i64],
                )?;
            }
            Ok(())
        })
    }

    /// Write-once prompt-injection stamp.  Returns `true` exactly once per
    /// task; later calls leave the row untouched and return `false`.
    pub fn mark_prompt_injected(&self, id: &str, now: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET prompt_injected_at = ?2 \
                 WHERE id = ?1 AND prompt_injected_at IS NULL",
                params![id, now],
            )?;
            Ok(changed == 1)
        })
    }

    /// Transition a task, enforcing the lifecycle state machine.
    pub fn set_task_status(&self, id: &str, next: TaskStatus, now: i64) -> Result<Task> {
        self.with_tx(|tx| {
            let task = get_task_tx(tx, id)?;
            if !task.status.can_transition_to(next) {
                return Err(StoreError::Constraint(format!(
                    "illegal transition {} -> {} for task {id}",
                    task.status.as_str(),
                    next.as_str()
                )));
            }
            let completed_at: Option<i64> = next.is_terminal().then_some(now);
            tx.execute(
                "UPDATE tasks SET status = ?2, \
                 started_at = CASE WHEN ?2 = 'running' THEN COALESCE(started_at, ?3) ELSE started_at END, \
                 completed_at = COALESCE(?4, completed_at) \
                 WHERE id = ?1",
                params![id, next.as_str(), now, completed_at],
            )?;
            get_task_tx(tx, id)
        })
    }

    /// Terminal success: stores the result text.
    pub fn complete_task(&self, id: &str, result_text: &str, now: i64) -> Result<Task> {
        self.with_tx(|tx| {
            let task = get_task_tx(tx, id)?;
            if !task.status.can_transition_to(TaskStatus::Completed) {
                return Err(StoreError::Constraint(format!(
                    "illegal transition {} -> completed for task {id}",
                    task.status.as_str()
                )));
            }
            tx.execute(
                "UPDATE tasks SET status = 'completed', result = ?2, completed_at = ?3 \
                 WHERE id = ?1",
                params![id, result_text, now],
            )?;
            get_task_tx(tx, id)
        })
    }

    /// Terminal failure: stores the error text.
    pub fn fail_task(&self, id: &str, error: &str, now: i64) -> Result<Task> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE tasks SET status = 'failed', error = ?2, completed_at = ?3 \
                 WHERE id = ?1",
                params![id, error, now],
            )?;
            get_task_tx(tx, id)
        })
    }

    pub fn cancel_task(&self, id: &str, now: i64) -> Result<Task> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE tasks SET status = 'cancelled', completed_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            get_task_tx(tx, id)
        })
    }

    /// Reset a terminal task to pending at the tail of the queue.
    /// Fails once `retry_count` has reached `max_retries`.
    pub fn retry_task(&self, id: &str, now: i64) -> Result<Task> {
        self.with_tx(|tx| {
            let task = get_task_tx(tx, id)?;
            if !task.status.is_terminal() {
                return Err(StoreError::Constraint(format!(
                    "task {id} is {} — only terminal tasks can be retried",
                    task.status.as_str()
                )));
            }
            if task.retry_count >= task.max_retries {
                return Err(StoreError::Validation(format!(
                    "task {id} exhausted its {} retries",
                    task.max_retries
                )));
            }
            let max_order: Option<i64> =
                tx.query_row("SELECT MAX(queue_order) FROM tasks", [], |r| r.get(0))?;
            let tail = max_order.map(|m| m + 1).unwrap_or(now);
            tx.execute(
                "UPDATE tasks SET status = 'pending', retry_count = retry_count + 1, \
                 error = NULL, completed_at = NULL, queue_order = ?2 WHERE id = ?1",
                params![id, tail],
            )?;
            get_task_tx(tx, id)
        })
    }

    /// Re-enqueue a failed task as a fresh pending copy at the queue tail,
    /// preserving title/prompt/model and carrying the incremented retry
    /// count.  The copy points back at the original through `parent_id`.
    pub fn create_retry_copy(&self, original: &Task, now: i64) -> Result<Task> {
        let id = format!("task-{}", uuid::Uuid::new_v4());
        self.with_tx(|tx| {
            let max_order: Option<i64> =
                tx.query_row("SELECT MAX(queue_order) FROM tasks", [], |r| r.get(0))?;
            let queue_order = max_order.map(|m| m + 1).unwrap_or(now);
            tx.execute(
                "INSERT INTO tasks (id, title, prompt, model, model_params, status, priority, \
                 queue_order, created_at, retry_count, max_retries, parent_id, created_by, \
                 inherit_context) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id,
                    original.title,
                    original.prompt,
                    original.model,
                    original.model_params.as_ref().map(|v| v.to_string()),
                    original.priority,
                    queue_order,
                    now,
                    original.retry_count + 1,
                    original.max_retries,
                    original.id,
                    original.created_by,
                    original.inherit_context as i64,
                ],
            )?;
            get_task_tx(tx, &id)
        })
    }

    /// Stamp a terminal task as archived.
    pub fn archive_task(&self, id: &str, now: i64) -> Result<Task> {
        self.with_tx(|tx| {
            let task = get_task_tx(tx, id)?;
            if !task.status.is_terminal() {
                return Err(StoreError::Constraint(format!(
                    "task {id} is {} — only terminal tasks can be archived",
                    task.status.as_str()
                )));
            }
            tx.execute(
                "UPDATE tasks SET archived_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            get_task_tx(tx, id)
        })
    }

    pub fn set_task_thread(&self, id: &str, thread_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET thread_id = ?2 WHERE id = ?1",
                params![id, thread_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("task {id}")));
            }
            Ok(())
        })
    }

    /// Delete a batch of archived completed tasks older than `before_ms`.
    /// Children are detached (their parent pointer nulled) before deletion.
    /// Returns the attachment storage keys held by the deleted tasks so the
    /// caller can garbage-collect the backing files.
    pub fn purge_archived_completed_tasks_batch(
        &self,
        before_ms: i64,
        limit: usize,
    ) -> Result<Vec<String>> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT id FROM tasks \
                 WHERE status = 'completed' AND archived_at IS NOT NULL AND archived_at < ?1 \
                 ORDER BY archived_at ASC LIMIT ?2",
            )?;
            let ids: Vec<String> = stmt
                .query_map(params![before_ms, limit as i64], |r| r.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);

            let mut attachment_keys = Vec::new();
            for id in &ids {
                let mut ctx = tx.prepare(
                    "SELECT content FROM task_contexts \
                     WHERE task_id = ?1 AND context_type = 'attachment'",
                )?;
                let keys: Vec<String> = ctx
                    .query_map([id], |r| r.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                attachment_keys.extend(keys);
                drop(ctx);

                tx.execute("UPDATE tasks SET parent_id = NULL WHERE parent_id = ?1", [id])?;
                tx.execute(
                    "UPDATE task_messages SET plan_step_id = NULL WHERE task_id = ?1",
                    [id],
                )?;
                tx.execute("DELETE FROM task_messages WHERE task_id = ?1", [id])?;
                tx.execute("DELETE FROM task_contexts WHERE task_id = ?1", [id])?;
                tx.execute("DELETE FROM plan_steps WHERE task_id = ?1", [id])?;
                tx.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
            }
            Ok(attachment_keys)
        })
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn invalid(e: StoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

pub(crate) fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(5)?;
    let model_params: Option<String> = row.get(4)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        prompt: row.get(2)?,
        model: row.get(3)?,
        model_params: model_params
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok()),
        status: TaskStatus::parse(&status).map_err(invalid)?,
        priority: row.get(6)?,
        queue_order: row.get(7)?,
        created_at: row.get(8)?,
        queued_at: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
        prompt_injected_at: row.get(12)?,
        archived_at: row.get(13)?,
        parent_id: row.get(14)?,
        thread_id: row.get(15)?,
        result: row.get(16)?,
        error: row.get(17)?,
        retry_count: row.get(18)?,
        max_retries: row.get(19)?,
        created_by: row.get(20)?,
        inherit_context: row.get::<_, i64>(21)? != 0,
    })
}

fn get_task_tx(conn: &Connection, id: &str) -> Result<Task> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        [id],
        task_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("task {id}")))
}

fn pending_ids_tx(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM tasks WHERE status = 'pending' {PENDING_ORDER}"
    ))?;
    let ids = stmt
        .query_map([], |r| r.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn renumber_pending_tx(conn: &Connection, pending: &[String]) -> Result<()> {
    for (i, id) in pending.iter().enumerate() {
        conn.execute(
            "UPDATE tasks SET queue_order = ?2 WHERE id = ?1",
            params![id, (i + 1) as i64],
        )?;
    }
    Ok(())
}

/// Derive a task title from the first non-empty prompt line, truncated to
/// [`TITLE_MAX_GLYPHS`] characters with a trailing ellipsis.
fn derive_title(prompt: &str) -> String {
    let line = prompt
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("untitled task");
    let mut chars = line.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_GLYPHS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
