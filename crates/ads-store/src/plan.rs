// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Plan steps, task messages and append-only task context.

use rusqlite::{params, Row};

use crate::types::{
    MessageRole, NewPlanStep, NewTaskMessage, PlanStep, StepStatus, TaskContext, TaskMessage,
};
use crate::{Result, Store, StoreError};

impl Store {
    /// Replace a task's plan.  Messages pointing at the old steps have their
    /// step pointer nulled first so no dangling reference survives, then the
    /// old steps are deleted and the new set inserted — all in one
    /// transaction.
    pub fn replace_plan(&self, task_id: &str, steps: &[NewPlanStep]) -> Result<Vec<PlanStep>> {
        for step in steps {
            if step.step_number < 1 {
                return Err(StoreError::Validation(format!(
                    "step_number must be >= 1, got {}",
                    step.step_number
                )));
            }
        }
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE task_messages SET plan_step_id = NULL WHERE task_id = ?1",
                [task_id],
            )?;
            tx.execute("DELETE FROM plan_steps WHERE task_id = ?1", [task_id])?;
            for step in steps {
                tx.execute(
                    "INSERT INTO plan_steps (task_id, step_number, title, description, status) \
                     VALUES (?1, ?2, ?3, ?4, 'pending')",
                    params![task_id, step.step_number, step.title, step.description],
                )?;
            }
            let mut stmt = tx.prepare(
                "SELECT id, task_id, step_number, title, description, status, \
                 started_at, completed_at FROM plan_steps WHERE task_id = ?1 \
                 ORDER BY step_number ASC",
            )?;
            let out = stmt
                .query_map([task_id], plan_step_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(out)
        })
    }

    pub fn list_plan_steps(&self, task_id: &str) -> Result<Vec<PlanStep>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, step_number, title, description, status, \
                 started_at, completed_at FROM plan_steps WHERE task_id = ?1 \
                 ORDER BY step_number ASC",
            )?;
            let out = stmt
                .query_map([task_id], plan_step_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(out)
        })
    }

    /// Update a step's status, stamping `started_at` / `completed_at`.
    pub fn set_plan_step_status(
        &self,
        task_id: &str,
        step_number: i64,
        status: StepStatus,
        now: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let started: Option<i64> = matches!(status, StepStatus::Running).then_some(now);
            let completed: Option<i64> = matches!(
                status,
                StepStatus::Completed | StepStatus::Skipped | StepStatus::Failed
            )
            .then_some(now);
            let changed = conn.execute(
                "UPDATE plan_steps SET status = ?3, \
                 started_at = COALESCE(started_at, ?4), \
                 completed_at = COALESCE(?5, completed_at) \
                 WHERE task_id = ?1 AND step_number = ?2",
                params![task_id, step_number, status.as_str(), started, completed],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!(
                    "plan step {step_number} of task {task_id}"
                )));
            }
            Ok(())
        })
    }

    /// Append a message to a task.  Content must be non-empty.
    pub fn add_task_message(&self, msg: NewTaskMessage, now: i64) -> Result<TaskMessage> {
        if msg.content.is_empty() {
            return Err(StoreError::Validation("message content must not be empty".into()));
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO task_messages \
                 (task_id, plan_step_id, role, content, message_type, model_used, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    msg.task_id,
                    msg.plan_step_id,
                    msg.role.as_str(),
                    msg.content,
                    msg.message_type,
                    msg.model_used,
                    now
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(TaskMessage {
                id,
                task_id: msg.task_id,
                plan_step_id: msg.plan_step_id,
                role: msg.role,
                content: msg.content,
                message_type: msg.message_type,
                model_used: msg.model_used,
                created_at: now,
            })
        })
    }

    pub fn list_task_messages(&self, task_id: &str) -> Result<Vec<TaskMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, plan_step_id, role, content, message_type, model_used, \
                 created_at FROM task_messages WHERE task_id = ?1 ORDER BY id ASC",
            )?;
            let out = stmt
                .query_map([task_id], task_message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(out)
        })
    }

    /// Append a (context_type, content) triple.  The context log is
    /// append-only; there is deliberately no update or delete operation.
    pub fn add_task_context(
        &self,
        task_id: &str,
        context_type: &str,
        content: &str,
        now: i64,
    ) -> Result<TaskContext> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO task_contexts (task_id, context_type, content, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![task_id, context_type, content, now],
            )?;
            Ok(TaskContext {
                id: conn.last_insert_rowid(),
                task_id: task_id.to_string(),
                context_type: context_type.to_string(),
                content: content.to_string(),
                created_at: now,
            })
        })
    }

    pub fn list_task_contexts(&self, task_id: &str) -> Result<Vec<TaskContext>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, context_type, content, created_at \
                 FROM task_contexts WHERE task_id = ?1 ORDER BY id ASC",
            )?;
            let out = stmt
                .query_map([task_id], |row| {
                    Ok(TaskContext {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        context_type: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(out)
        })
    }
}

fn plan_step_from_row(row: &Row<'_>) -> rusqlite::Result<PlanStep> {
    let status: String = row.get(5)?;
    Ok(PlanStep {
        id: row.get(0)?,
        task_id: row.get(1)?,
        step_number: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: StepStatus::parse(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

fn task_message_from_row(row: &Row<'_>) -> rusqlite::Result<TaskMessage> {
    let role: String = row.get(3)?;
    Ok(TaskMessage {
        id: row.get(0)?,
        task_id: row.get(1)?,
        plan_step_id: row.get(2)?,
        role: MessageRole::parse(&role).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        content: row.get(4)?,
        message_type: row.get(5)?,
        model_used: row.get(6)?,
        created_at: row.get(7)?,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Admission, CreateTask};
    use crate::Store;

    fn store_with_task() -> (Store, String) {
        let s = Store::open_in_memory().unwrap();
        let t = s
            .create_task(CreateTask::new("plan me"), 1, Admission::Pending)
            .unwrap();
        (s, t.id)
    }

    fn step(n: i64, title: &str) -> NewPlanStep {
        NewPlanStep {
            step_number: n,
            title: title.to_string(),
            description: None,
        }
    }

    #[test]
    fn replace_plan_inserts_steps_in_order() {
        let (s, id) = store_with_task();
        let steps = s
            .replace_plan(&id, &[step(1, "read"), step(2, "write")])
            .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].title, "read");
        assert_eq!(steps[1].step_number, 2);
        assert_eq!(steps[0].status, StepStatus::Pending);
    }

    #[test]
    fn step_number_zero_is_rejected() {
        let (s, id) = store_with_task();
        let err = s.replace_plan(&id, &[step(0, "bad")]).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn replanning_nulls_message_step_pointers() {
        let (s, id) = store_with_task();
        let steps = s.replace_plan(&id, &[step(1, "one")]).unwrap();
        s.add_task_message(
            NewTaskMessage {
                task_id: id.clone(),
                plan_step_id: Some(steps[0].id),
                role: MessageRole::Assistant,
                content: "working on step one".into(),
                message_type: None,
                model_used: None,
            },
            2,
        )
        .unwrap();

        // Replan: the message must survive with a nulled step pointer.
        s.replace_plan(&id, &[step(1, "redone")]).unwrap();
        let msgs = s.list_task_messages(&id).unwrap();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].plan_step_id.is_none());
    }

    #[test]
    fn duplicate_step_numbers_violate_constraint() {
        let (s, id) = store_with_task();
        let err = s
            .replace_plan(&id, &[step(1, "a"), step(1, "b")])
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[test]
    fn step_status_stamps_timestamps() {
        let (s, id) = store_with_task();
        s.replace_plan(&id, &[step(1, "a")]).unwrap();
        s.set_plan_step_status(&id, 1, StepStatus::Running, 10).unwrap();
        s.set_plan_step_status(&id, 1, StepStatus::Completed, 20).unwrap();
        let steps = s.list_plan_steps(&id).unwrap();
        assert_eq!(steps[0].started_at, Some(10));
        assert_eq!(steps[0].completed_at, Some(20));
    }

    #[test]
    fn empty_message_content_is_rejected() {
        let (s, id) = store_with_task();
        let err = s
            .add_task_message(
                NewTaskMessage {
                    task_id: id,
                    plan_step_id: None,
                    role: MessageRole::User,
                    content: String::new(),
                    message_type: None,
                    model_used: None,
                },
                1,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn contexts_append_in_order() {
        let (s, id) = store_with_task();
        s.add_task_context(&id, "session", "cwd=/ws", 1).unwrap();
        s.add_task_context(&id, "attachment", "key-1", 2).unwrap();
        let ctx = s.list_task_contexts(&id).unwrap();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[0].context_type, "session");
        assert_eq!(ctx[1].content, "key-1");
    }
}
